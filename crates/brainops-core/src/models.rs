//! Core data models used throughout brainops.

mod event;
mod metadata;
mod note;

pub use event::{Event, EventAction, EventChange, EventKind, QueuedNoteContext};
pub use metadata::{parse_note, render_note, split_frontmatter, DocumentSemanticType, NoteMetadata};
pub use note::{Note, NoteClassification, NoteContext, NoteId, NoteStatus};
