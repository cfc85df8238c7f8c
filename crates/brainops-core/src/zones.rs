//! Vault zones used to route lifecycle events.
//!
//! A vault has three disjoint named folders. The lifecycle state machine
//! classifies the folder of an event path (and of its move source) into one
//! of them to pick a workflow.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::env_string;
use crate::defaults;
use crate::error::{Error, Result};

/// Named routing zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// Notes whose classification failed.
    Uncategorized,
    /// Freshly dropped notes waiting for import.
    Imports,
    /// Classified notes.
    Storage,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Uncategorized => "uncategorized",
            Zone::Imports => "imports",
            Zone::Storage => "storage",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved, validated locations of the three zones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneLayout {
    base: PathBuf,
    imports: PathBuf,
    uncategorized: PathBuf,
    storage: PathBuf,
}

impl ZoneLayout {
    /// Build a layout. Zone paths may be absolute or relative to `base`.
    ///
    /// Fails with [`Error::Config`] when two zones overlap (one equal to or
    /// nested inside another).
    pub fn new(
        base: impl AsRef<Path>,
        imports: impl AsRef<Path>,
        uncategorized: impl AsRef<Path>,
        storage: impl AsRef<Path>,
    ) -> Result<Self> {
        let base = normalize(base.as_ref());
        let resolve = |p: &Path| {
            if p.is_absolute() {
                normalize(p)
            } else {
                normalize(&base.join(p))
            }
        };
        let layout = Self {
            imports: resolve(imports.as_ref()),
            uncategorized: resolve(uncategorized.as_ref()),
            storage: resolve(storage.as_ref()),
            base,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Layout from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `BRAINOPS_BASE_PATH` | `notes` | Vault root |
    /// | `BRAINOPS_IMPORTS_PATH` | `Imports` | Imports zone |
    /// | `BRAINOPS_UNCATEGORIZED_PATH` | `Z_Storage/Uncategorized` | Uncategorized zone |
    /// | `BRAINOPS_STORAGE_PATH` | `Z_Storage/Notes` | Storage zone |
    pub fn from_env() -> Result<Self> {
        Self::new(
            env_string("BRAINOPS_BASE_PATH", defaults::BASE_PATH),
            env_string("BRAINOPS_IMPORTS_PATH", defaults::IMPORTS_PATH),
            env_string("BRAINOPS_UNCATEGORIZED_PATH", defaults::UNCATEGORIZED_PATH),
            env_string("BRAINOPS_STORAGE_PATH", defaults::STORAGE_PATH),
        )
    }

    /// Default layout rooted at `base`.
    pub fn with_base(base: impl AsRef<Path>) -> Result<Self> {
        Self::new(
            base,
            defaults::IMPORTS_PATH,
            defaults::UNCATEGORIZED_PATH,
            defaults::STORAGE_PATH,
        )
    }

    fn validate(&self) -> Result<()> {
        let zones = [
            (Zone::Imports, &self.imports),
            (Zone::Uncategorized, &self.uncategorized),
            (Zone::Storage, &self.storage),
        ];
        for (i, (a, pa)) in zones.iter().enumerate() {
            for (b, pb) in zones.iter().skip(i + 1) {
                if path_is_inside(pa, pb) || path_is_inside(pb, pa) {
                    return Err(Error::Config(format!(
                        "zones {} ({}) and {} ({}) overlap",
                        a,
                        pa.display(),
                        b,
                        pb.display()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn path_of(&self, zone: Zone) -> &Path {
        match zone {
            Zone::Imports => &self.imports,
            Zone::Uncategorized => &self.uncategorized,
            Zone::Storage => &self.storage,
        }
    }

    /// Absolute form of an event path (relative paths hang off the vault root).
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.base.join(path))
        }
    }

    /// Zone containing `folder`, if any.
    pub fn zone_of(&self, folder: impl AsRef<Path>) -> Option<Zone> {
        let folder = self.resolve(folder);
        [Zone::Uncategorized, Zone::Imports, Zone::Storage]
            .into_iter()
            .find(|zone| path_is_inside(self.path_of(*zone), &folder))
    }

    /// Zone of the folder holding the file at `file_path`.
    pub fn zone_of_file(&self, file_path: impl AsRef<Path>) -> Option<Zone> {
        let resolved = self.resolve(file_path);
        resolved.parent().and_then(|folder| self.zone_of(folder))
    }
}

impl Default for ZoneLayout {
    fn default() -> Self {
        let base = normalize(Path::new(defaults::BASE_PATH));
        Self {
            imports: base.join(defaults::IMPORTS_PATH),
            uncategorized: base.join(defaults::UNCATEGORIZED_PATH),
            storage: base.join(defaults::STORAGE_PATH),
            base,
        }
    }
}

/// Whether `path` is `parent` itself or lies below it (component-wise).
pub fn path_is_inside(parent: &Path, path: &Path) -> bool {
    normalize(path).starts_with(normalize(parent))
}

/// Lexical normalization: drops `.` and folds `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
