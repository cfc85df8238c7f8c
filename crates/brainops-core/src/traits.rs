//! Collaborator ports consumed by the lifecycle engine.
//!
//! These traits define the interfaces that persistence, workflows and probes
//! must satisfy, so the state machine and the GPU guard can be driven by real
//! backends in production and by recording fakes in tests.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::*;

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Persisted note records.
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Fetch a note by primary key.
    async fn get_note_by_id(&self, id: NoteId) -> Result<Option<Note>>;

    /// Upsert the note record, metadata and classification held by `ctx`.
    ///
    /// Idempotent: writing the same context twice leaves the same state.
    async fn update_note_context(&self, ctx: &NoteContext) -> Result<()>;
}

/// Best-effort maintenance operations on a single note.
#[async_trait]
pub trait NoteMaintenance: Send + Sync {
    /// Build a full context for a persisted note (metadata, content, classification).
    async fn load_note_context(&self, note: &Note) -> Result<NoteContext>;

    /// Copy the persisted classification into the note frontmatter.
    ///
    /// Returns `true` when the header was rewritten.
    async fn sync_classification_to_metadata(&self, note_id: NoteId, ctx: &NoteContext)
        -> Result<bool>;

    /// Generate missing tags. Returns `true` when tags were written.
    async fn regenerate_tags(&self, file_path: &str, note_id: NoteId, ctx: &NoteContext)
        -> Result<bool>;

    /// Archive a synthesis note once its archive counterpart is complete.
    async fn check_synthesis_and_trigger_archive(
        &self,
        note_id: NoteId,
        file_path: &str,
        ctx: &NoteContext,
    ) -> Result<()>;

    /// Rewrite the frontmatter of the note at `file_path`, keeping `content`'s body.
    async fn write_metadata_to_note(
        &self,
        file_path: &str,
        content: &str,
        metadata: &NoteMetadata,
    ) -> Result<()>;
}

// =============================================================================
// WORKFLOWS
// =============================================================================

/// GPU-bound import of a note (classification, synthesis, embeddings).
#[async_trait]
pub trait ImportWorkflow: Send + Sync {
    /// Import the note. `force_categ` lets the folder override the classifier.
    ///
    /// Returns the success flag; domain failures are returned as errors.
    async fn import_normal(
        &self,
        file_path: &str,
        note_id: NoteId,
        ctx: &NoteContext,
        force_categ: bool,
    ) -> Result<bool>;
}

/// Regeneration of derived artefacts after a note in storage was edited.
#[async_trait]
pub trait RegenWorkflow: Send + Sync {
    /// Returns `true` when the edit was handled and the caller must stop.
    async fn regen_hub(
        &self,
        file_path: &str,
        note_id: NoteId,
        ctx: &NoteContext,
        queued: &QueuedNoteContext,
    ) -> Result<bool>;
}

/// Relocation of notes whose processing failed.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Move the file out of the pipeline and record `error` against the note.
    async fn handle_errored_file(&self, note_id: NoteId, file_path: &str, error: &Error);
}

// =============================================================================
// GPU GUARD PORTS
// =============================================================================

/// Free VRAM gauge.
#[async_trait]
pub trait VramProbe: Send + Sync {
    /// Free VRAM in MiB. Tool failures are [`Error::GpuProbe`].
    async fn free_vram_mb(&self) -> Result<u64>;
}

/// Local model server health.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(true)` when the model server answers. Errors count as unhealthy.
    async fn check_health(&self) -> Result<bool>;
}

/// Re-submission of a queued context after a guard timeout.
#[async_trait]
pub trait RequeuePort: Send + Sync {
    /// Enqueue `queued` as is. Implementations must not reset `retry_count`
    /// or change `lock_key`.
    async fn replay_enqueue(&self, queued: QueuedNoteContext) -> Result<()>;
}

// =============================================================================
// QUEUE PORTS
// =============================================================================

/// Builds the per-event [`NoteContext`] for a dequeued item.
#[async_trait]
pub trait ContextLoader: Send + Sync {
    /// `Ok(None)` when the event does not refer to a persisted note.
    async fn load(&self, queued: &QueuedNoteContext) -> Result<Option<NoteContext>>;
}
