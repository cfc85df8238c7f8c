//! Filesystem events and their queued wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::note::{Note, NoteId};

/// What the watcher saw change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    File,
    Directory,
    Script,
}

/// Action name of an [`EventChange`], for logging and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Created,
    Deleted,
    Modified,
    Moved,
    Reconcile,
    Audio,
}

/// The change itself. Only `Moved` carries a source path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum EventChange {
    Created { path: String },
    Deleted { path: String },
    Modified { path: String },
    Moved { src_path: String, path: String },
    Reconcile { path: String },
    Audio { path: String },
}

impl EventChange {
    pub fn action(&self) -> EventAction {
        match self {
            EventChange::Created { .. } => EventAction::Created,
            EventChange::Deleted { .. } => EventAction::Deleted,
            EventChange::Modified { .. } => EventAction::Modified,
            EventChange::Moved { .. } => EventAction::Moved,
            EventChange::Reconcile { .. } => EventAction::Reconcile,
            EventChange::Audio { .. } => EventAction::Audio,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            EventChange::Created { path }
            | EventChange::Deleted { path }
            | EventChange::Modified { path }
            | EventChange::Moved { path, .. }
            | EventChange::Reconcile { path }
            | EventChange::Audio { path } => path,
        }
    }

    pub fn src_path(&self) -> Option<&str> {
        match self {
            EventChange::Moved { src_path, .. } => Some(src_path),
            _ => None,
        }
    }
}

/// One watcher event.
///
/// Wire shape: `{"type": "file", "action": "moved", "path": "...", "src_path": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(flatten)]
    pub change: EventChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Note>,
}

impl Event {
    pub fn new(kind: EventKind, change: EventChange) -> Self {
        Self {
            kind,
            change,
            note: None,
        }
    }

    pub fn file_created(path: impl Into<String>) -> Self {
        Self::new(EventKind::File, EventChange::Created { path: path.into() })
    }

    pub fn file_modified(path: impl Into<String>) -> Self {
        Self::new(EventKind::File, EventChange::Modified { path: path.into() })
    }

    pub fn file_moved(src_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(
            EventKind::File,
            EventChange::Moved {
                src_path: src_path.into(),
                path: path.into(),
            },
        )
    }

    pub fn file_deleted(path: impl Into<String>) -> Self {
        Self::new(EventKind::File, EventChange::Deleted { path: path.into() })
    }

    pub fn with_note(mut self, note: Note) -> Self {
        self.note = Some(note);
        self
    }

    pub fn action(&self) -> EventAction {
        self.change.action()
    }

    pub fn path(&self) -> &str {
        self.change.path()
    }

    pub fn src_path(&self) -> Option<&str> {
        self.change.src_path()
    }
}

/// A processing unit sitting in the note queue.
///
/// Values are never shared mutably: the GPU guard produces an incremented
/// copy with [`QueuedNoteContext::with_incremented_retry`] and hands that copy
/// to the requeue port. `id` and `lock_key` survive every requeue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedNoteContext {
    pub id: Uuid,
    pub event: Event,
    pub note: Option<Note>,
    pub lock_key: String,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl QueuedNoteContext {
    /// Wrap an event, deriving the lock key from the note id when known.
    pub fn new(event: Event) -> Self {
        let note = event.note.clone();
        let lock_key = Self::lock_key_for(&event, note.as_ref());
        Self {
            id: Uuid::now_v7(),
            event,
            note,
            lock_key,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Attach a previously loaded note snapshot; the lock key follows it.
    pub fn with_note(mut self, note: Note) -> Self {
        self.lock_key = Self::lock_key_for(&self.event, Some(&note));
        self.note = Some(note);
        self
    }

    pub fn with_lock_key(mut self, lock_key: impl Into<String>) -> Self {
        self.lock_key = lock_key.into();
        self
    }

    /// Copy of this context with `retry_count + 1`; everything else unchanged.
    pub fn with_incremented_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn note_id(&self) -> Option<NoteId> {
        self.note.as_ref().and_then(|n| n.id)
    }

    fn lock_key_for(event: &Event, note: Option<&Note>) -> String {
        match note.and_then(|n| n.id) {
            Some(id) => format!("note:{}", id),
            None => format!("path:{}", event.path()),
        }
    }
}
