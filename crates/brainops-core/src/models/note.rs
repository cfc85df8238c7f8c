//! Persisted note record and the per-event note context.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::metadata::NoteMetadata;

/// Primary key of a persisted note.
pub type NoteId = i64;

/// Lifecycle status of a persisted note.
///
/// Statuses unknown to this crate are kept verbatim in [`NoteStatus::Other`]
/// so that a round-trip through the queue never loses information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NoteStatus {
    Draft,
    Processing,
    Synthesis,
    Archive,
    Duplicate,
    Error,
    Other(String),
}

impl NoteStatus {
    pub fn as_str(&self) -> &str {
        match self {
            NoteStatus::Draft => "draft",
            NoteStatus::Processing => "processing",
            NoteStatus::Synthesis => "synthesis",
            NoteStatus::Archive => "archive",
            NoteStatus::Duplicate => "duplicate",
            NoteStatus::Error => "error",
            NoteStatus::Other(s) => s.as_str(),
        }
    }

    /// Terminal statuses are never imported again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NoteStatus::Synthesis | NoteStatus::Archive | NoteStatus::Duplicate | NoteStatus::Error
        )
    }

    /// Terminal statuses reached through a completed import. `Error` is
    /// terminal but not imported: moving the note back re-runs the import.
    pub fn is_imported(&self) -> bool {
        self.is_terminal() && *self != NoteStatus::Error
    }
}

impl From<&str> for NoteStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "draft" => NoteStatus::Draft,
            "processing" => NoteStatus::Processing,
            "synthesis" => NoteStatus::Synthesis,
            "archive" => NoteStatus::Archive,
            "duplicate" => NoteStatus::Duplicate,
            "error" => NoteStatus::Error,
            _ => NoteStatus::Other(s.to_string()),
        }
    }
}

impl From<String> for NoteStatus {
    fn from(s: String) -> Self {
        NoteStatus::from(s.as_str())
    }
}

impl From<NoteStatus> for String {
    fn from(status: NoteStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Note row as stored by the persistence layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Option<NoteId>,
    pub status: Option<NoteStatus>,
    pub file_path: String,
    #[serde(default)]
    pub parent_id: Option<NoteId>,
    #[serde(default)]
    pub cat_id: Option<i64>,
    #[serde(default)]
    pub subcat_id: Option<i64>,
    #[serde(default)]
    pub cat_name: Option<String>,
    #[serde(default)]
    pub subcat_name: Option<String>,
    #[serde(default)]
    pub media_id: Option<i64>,
}

impl Note {
    pub fn new(id: NoteId, status: NoteStatus, file_path: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            status: Some(status),
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: NoteId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_media(mut self, media_id: i64) -> Self {
        self.media_id = Some(media_id);
        self
    }

    pub fn has_status(&self, status: &NoteStatus) -> bool {
        self.status.as_ref() == Some(status)
    }
}

/// Category/subcategory candidate produced by classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteClassification {
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub category_name: Option<String>,
    pub subcategory_name: Option<String>,
}

/// Everything known about one note while a single event is processed.
///
/// Built by the context loader from the persisted record and the file on
/// disk. It is transient: nothing in it survives the event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteContext {
    pub note: Note,
    pub metadata: Option<NoteMetadata>,
    pub classification: Option<NoteClassification>,
    pub content: Option<String>,
    pub file_path: String,
    pub src_path: Option<String>,
}

impl NoteContext {
    pub fn new(note: Note, file_path: impl Into<String>, src_path: Option<String>) -> Self {
        Self {
            note,
            file_path: file_path.into(),
            src_path,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: NoteMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_classification(mut self, classification: NoteClassification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn note_id(&self) -> Option<NoteId> {
        self.note.id
    }

    pub fn is_synthesis(&self) -> bool {
        self.note.has_status(&NoteStatus::Synthesis)
    }
}
