//! Note frontmatter metadata.
//!
//! Frontmatter is the YAML block delimited by `---` lines at the top of a
//! note. Parsing is tolerant: a missing or malformed block yields default
//! metadata rather than an error, because user-edited notes routinely carry
//! half-written headers.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Semantic document type of a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSemanticType {
    Article,
    Podcast,
    Interview,
    Report,
    Note,
    #[default]
    Unknown,
}

impl DocumentSemanticType {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("article") => Self::Article,
            Some("podcast") => Self::Podcast,
            Some("interview") => Self::Interview,
            Some("report") => Self::Report,
            Some("note") => Self::Note,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Podcast => "podcast",
            Self::Interview => "interview",
            Self::Report => "report",
            Self::Note => "note",
            Self::Unknown => "unknown",
        }
    }
}

/// Frontmatter fields of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub title: String,
    pub tags: Vec<String>,
    pub summary: String,
    pub category: String,
    pub subcategory: String,
    pub created: Option<String>,
    pub last_modified: Option<String>,
    pub source: String,
    pub author: String,
    pub status: String,
    pub project: String,
    pub doc_type: DocumentSemanticType,
    pub provider: String,
    pub media_source: String,
}

impl Default for NoteMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            tags: Vec::new(),
            summary: String::new(),
            category: String::new(),
            subcategory: String::new(),
            created: None,
            last_modified: None,
            source: String::new(),
            author: String::new(),
            status: "draft".to_string(),
            project: String::new(),
            doc_type: DocumentSemanticType::Unknown,
            provider: String::new(),
            media_source: String::new(),
        }
    }
}

fn value_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl NoteMetadata {
    /// Build metadata from a parsed YAML mapping.
    ///
    /// Accepts `sub category` for `subcategory`, `type` for `doc_type`, and
    /// tags either as a list or as a comma-separated string.
    pub fn from_yaml_value(value: &Value) -> Self {
        let Some(map) = value.as_mapping() else {
            return Self::default();
        };
        let get = |key: &str| map.get(Value::String(key.to_string()));

        let subcategory = get("subcategory").or_else(|| get("sub category"));

        let tags = match get("tags") {
            Some(Value::String(csv)) => csv
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|t| value_to_string(Some(t)).trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        let doc_type_raw = non_empty(value_to_string(get("doc_type")))
            .or_else(|| non_empty(value_to_string(get("type"))));

        Self {
            title: value_to_string(get("title")),
            tags,
            summary: value_to_string(get("summary")),
            category: value_to_string(get("category")),
            subcategory: value_to_string(subcategory),
            created: non_empty(value_to_string(get("created"))),
            last_modified: non_empty(value_to_string(get("last_modified"))),
            source: value_to_string(get("source")),
            author: value_to_string(get("author")),
            status: non_empty(value_to_string(get("status"))).unwrap_or_else(|| "draft".into()),
            project: value_to_string(get("project")),
            doc_type: DocumentSemanticType::parse(doc_type_raw.as_deref()),
            provider: value_to_string(get("provider")),
            media_source: value_to_string(get("media_source")),
        }
    }

    /// Parse a YAML frontmatter body (without the `---` fences).
    pub fn from_yaml_str(yaml: &str) -> Self {
        match serde_yaml::from_str::<Value>(yaml) {
            Ok(value) => Self::from_yaml_value(&value),
            Err(e) => {
                tracing::debug!(error = %e, "Unparsable frontmatter, using defaults");
                Self::default()
            }
        }
    }

    /// Export as the ordered YAML mapping written to note headers.
    pub fn to_yaml_value(&self) -> Value {
        let mut map = Mapping::new();
        let mut put = |key: &str, value: Value| {
            map.insert(Value::String(key.to_string()), value);
        };
        let s = |v: &str| Value::String(v.to_string());

        put("title", s(&self.title));
        put(
            "tags",
            Value::Sequence(self.tags.iter().map(|t| s(&t.replace(' ', "_"))).collect()),
        );
        put("summary", s(self.summary.trim()));
        put("category", s(&self.category));
        put("sub category", s(&self.subcategory));
        put("created", s(self.created.as_deref().unwrap_or("")));
        let last_modified = self
            .last_modified
            .clone()
            .unwrap_or_else(|| Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        put("last_modified", s(&last_modified));
        put("source", s(&self.source));
        put("author", s(&self.author));
        put("status", s(&self.status));
        put("project", s(&self.project));
        put("doc_type", s(self.doc_type.as_str()));
        put("provider", s(&self.provider));
        put("media_source", s(&self.media_source));
        Value::Mapping(map)
    }

    pub fn to_yaml_string(&self) -> crate::Result<String> {
        Ok(serde_yaml::to_string(&self.to_yaml_value())?)
    }

    /// Field-by-field merge where the left-most non-empty value wins.
    pub fn merge(sources: &[&NoteMetadata]) -> NoteMetadata {
        let mut result = NoteMetadata::default();
        for source in sources.iter().rev() {
            macro_rules! take {
                ($($field:ident),*) => {
                    $(if !source.$field.is_empty() {
                        result.$field = source.$field.clone();
                    })*
                };
            }
            take!(
                title,
                tags,
                summary,
                category,
                subcategory,
                source,
                author,
                status,
                project,
                provider,
                media_source
            );
            if source.created.is_some() {
                result.created = source.created.clone();
            }
            if source.last_modified.is_some() {
                result.last_modified = source.last_modified.clone();
            }
            if source.doc_type != DocumentSemanticType::Unknown {
                result.doc_type = source.doc_type;
            }
        }
        result
    }
}

/// Split a note into its frontmatter block (without fences) and body.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }
    (None, content)
}

/// Parse a full note into metadata and body.
pub fn parse_note(content: &str) -> (NoteMetadata, &str) {
    match split_frontmatter(content) {
        (Some(yaml), body) => (NoteMetadata::from_yaml_str(yaml), body),
        (None, body) => (NoteMetadata::default(), body),
    }
}

/// Render a note with a fresh frontmatter block in front of `body`.
pub fn render_note(metadata: &NoteMetadata, body: &str) -> crate::Result<String> {
    let yaml = metadata.to_yaml_string()?;
    Ok(format!("---\n{}---\n{}", yaml, body.trim_start_matches('\n')))
}
