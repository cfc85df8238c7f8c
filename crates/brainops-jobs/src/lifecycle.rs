//! Note lifecycle state machine.
//!
//! For each filesystem event the state machine runs exactly one workflow,
//! chosen first by the [`EventChange`] variant, then by the zones of the
//! destination (and source) folders:
//!
//! | Event | Zones | Branch | Guard |
//! |-------|-------|--------|-------|
//! | move | Uncategorized → Storage | forced import | yes |
//! | move | any → Imports | import | yes |
//! | move | any other → Storage | classification resync, archive check | no |
//! | move | other | tag regeneration, context refresh | no |
//! | create/modify | Imports | import, unless already imported | yes |
//! | create/modify | Storage | regeneration, else refresh and parent propagation | no |
//! | create/modify | other | context refresh, archive check | no |
//! | delete | any | ignored | no |
//!
//! Reconcile and audio events follow the create/modify rows.
//!
//! Non-fatal errors raised inside a branch are enriched with the dispatch
//! context, logged, and handed to the error sink. Only fatal errors
//! ([`Error::is_fatal`]) reach the caller.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use brainops_core::{
    defaults, Error, ErrorSink, EventChange, ImportWorkflow, NoteContext, NoteId, NoteMaintenance,
    NoteRepository, NoteStatus, QueuedNoteContext, RegenWorkflow, Result, Zone, ZoneLayout,
};

use crate::gpu_guard::{GpuGuard, GuardOutcome};

/// Step name attached to errors caught at a branch boundary.
const STEP: &str = "process_single_note";

/// Why an event was ignored before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The note has no persisted id or status.
    MissingIdentity,
    /// The file is not a Markdown note.
    NotANote,
    /// The file no longer exists on disk.
    FileMissing,
    /// The queue item does not refer to a persisted note.
    NoPersistedNote,
    /// Deletions are reconciled outside the lifecycle.
    Deleted,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "branch", rename_all = "snake_case")]
pub enum Dispatch {
    /// Preconditions not met; nothing happened.
    Ignored { reason: IgnoreReason },
    /// Create or modify replay skipped because the persisted note was
    /// already imported.
    Skipped { status: NoteStatus },
    /// The GPU guard declined; the event was requeued or dropped.
    Deferred { guard: GuardOutcome },
    /// Import workflow ran.
    Imported { force_categ: bool, success: bool },
    /// Move into storage from anywhere but Uncategorized: classification
    /// copied into the frontmatter.
    Resynced {
        header_updated: bool,
        archive_checked: bool,
    },
    /// Move out of the managed zones, or into Uncategorized: best-effort tag
    /// regeneration.
    Retagged { tags_written: bool },
    /// Regeneration workflow handled the edit.
    Regenerated,
    /// Context refreshed without a workflow.
    Refreshed {
        parent_updated: bool,
        archive_checked: bool,
    },
    /// A non-fatal error was routed to the error sink.
    Errored { error: String },
}

/// Collaborators of the state machine.
#[derive(Clone)]
pub struct LifecyclePorts {
    pub repository: Arc<dyn NoteRepository>,
    pub maintenance: Arc<dyn NoteMaintenance>,
    pub import: Arc<dyn ImportWorkflow>,
    pub regen: Arc<dyn RegenWorkflow>,
    pub errors: Arc<dyn ErrorSink>,
}

/// Event-driven note lifecycle engine.
pub struct NoteLifecycle {
    layout: ZoneLayout,
    guard: GpuGuard,
    ports: LifecyclePorts,
}

impl NoteLifecycle {
    pub fn new(layout: ZoneLayout, guard: GpuGuard, ports: LifecyclePorts) -> Self {
        Self {
            layout,
            guard,
            ports,
        }
    }

    pub fn layout(&self) -> &ZoneLayout {
        &self.layout
    }

    /// Dispatch one event for one note.
    ///
    /// The caller guarantees that no other dispatch for the same `lock_key`
    /// runs concurrently.
    #[instrument(
        skip(self, ctx, queued),
        fields(
            subsystem = "lifecycle",
            component = "state_machine",
            request_id = %queued.id,
            note_id = ?ctx.note.id,
            file_path = %ctx.file_path,
        )
    )]
    pub async fn process_single_note(
        &self,
        ctx: &NoteContext,
        queued: &QueuedNoteContext,
    ) -> Result<Dispatch> {
        let (Some(note_id), Some(_)) = (ctx.note.id, ctx.note.status.as_ref()) else {
            return Ok(Dispatch::Ignored {
                reason: IgnoreReason::MissingIdentity,
            });
        };
        if !is_note_file(&ctx.file_path) {
            debug!("Ignored, not a note file");
            return Ok(Dispatch::Ignored {
                reason: IgnoreReason::NotANote,
            });
        }
        if !self.layout.resolve(&ctx.file_path).exists() {
            warn!("File does not exist, ignoring event");
            return Ok(Dispatch::Ignored {
                reason: IgnoreReason::FileMissing,
            });
        }

        let action = queued.event.action();
        debug!(?action, src_path = ?queued.event.src_path(), "Dispatch start");

        let result = match &queued.event.change {
            EventChange::Moved { src_path, .. } => {
                self.handle_move(ctx, queued, note_id, src_path).await
            }
            EventChange::Created { .. }
            | EventChange::Modified { .. }
            | EventChange::Reconcile { .. }
            | EventChange::Audio { .. } => self.handle_create_or_modify(ctx, queued, note_id).await,
            EventChange::Deleted { .. } => {
                debug!("Deletion event, nothing to dispatch");
                return Ok(Dispatch::Ignored {
                    reason: IgnoreReason::Deleted,
                });
            }
        };

        match result {
            Ok(dispatch) => Ok(dispatch),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(self.route_error(ctx, note_id, e).await),
        }
    }

    // =========================================================================
    // MOVES
    // =========================================================================

    async fn handle_move(
        &self,
        ctx: &NoteContext,
        queued: &QueuedNoteContext,
        note_id: NoteId,
        src_path: &str,
    ) -> Result<Dispatch> {
        let dest = self.layout.zone_of_file(&ctx.file_path);
        let src = self.layout.zone_of_file(src_path);
        debug!(?src, ?dest, "Move event");

        match (src, dest) {
            (Some(Zone::Uncategorized), Some(Zone::Storage)) => {
                info!(note_id, "Moved uncategorized to storage, forced import");
                self.import(ctx, queued, note_id, true).await
            }
            (_, Some(Zone::Imports)) => {
                info!(note_id, "Moved to imports, import");
                self.import(ctx, queued, note_id, false).await
            }
            (_, Some(Zone::Storage)) => self.resync_storage(ctx, note_id).await,
            _ => {
                info!(note_id, %src_path, "Unrecognized move, refreshing tags");
                let tags_written = self
                    .ports
                    .maintenance
                    .regenerate_tags(&ctx.file_path, note_id, ctx)
                    .await?;
                if tags_written {
                    info!(note_id, "Tags generated");
                }
                self.ports.repository.update_note_context(ctx).await?;
                Ok(Dispatch::Retagged { tags_written })
            }
        }
    }

    async fn resync_storage(&self, ctx: &NoteContext, note_id: NoteId) -> Result<Dispatch> {
        let Some(classification) = ctx.classification.as_ref() else {
            warn!(note_id, "Moved into storage but no category detected");
            return Ok(Dispatch::Resynced {
                header_updated: false,
                archive_checked: false,
            });
        };
        info!(
            note_id,
            from_category = ?ctx.note.cat_name,
            from_subcategory = ?ctx.note.subcat_name,
            to_category = ?classification.category_name,
            to_subcategory = ?classification.subcategory_name,
            "Moved into storage"
        );

        let header_updated = self
            .ports
            .maintenance
            .sync_classification_to_metadata(note_id, ctx)
            .await?;
        if header_updated {
            info!(note_id, "Frontmatter updated");
        }
        self.ports.repository.update_note_context(ctx).await?;
        let archive_checked = self.archive_check_if_synthesis(ctx, note_id).await?;

        Ok(Dispatch::Resynced {
            header_updated,
            archive_checked,
        })
    }

    // =========================================================================
    // CREATE / MODIFY
    // =========================================================================

    async fn handle_create_or_modify(
        &self,
        ctx: &NoteContext,
        queued: &QueuedNoteContext,
        note_id: NoteId,
    ) -> Result<Dispatch> {
        match self.layout.zone_of_file(&ctx.file_path) {
            Some(Zone::Imports) => {
                let current = self.ports.repository.get_note_by_id(note_id).await?;
                if let Some(status) = current.and_then(|n| n.status) {
                    if status.is_imported() {
                        info!(note_id, %status, "Note already imported, replay skipped");
                        return Ok(Dispatch::Skipped { status });
                    }
                }
                info!(note_id, "Created in imports, import");
                self.import(ctx, queued, note_id, false).await
            }
            Some(Zone::Storage) => self.update_in_storage(ctx, queued, note_id).await,
            _ => {
                info!(note_id, "No routing rule, refreshing context");
                self.ports.repository.update_note_context(ctx).await?;
                let archive_checked = self.archive_check_if_synthesis(ctx, note_id).await?;
                Ok(Dispatch::Refreshed {
                    parent_updated: false,
                    archive_checked,
                })
            }
        }
    }

    async fn update_in_storage(
        &self,
        ctx: &NoteContext,
        queued: &QueuedNoteContext,
        note_id: NoteId,
    ) -> Result<Dispatch> {
        let handled = self
            .ports
            .regen
            .regen_hub(&ctx.file_path, note_id, ctx, queued)
            .await?;
        if handled {
            info!(note_id, "Updated in storage, regenerated");
            return Ok(Dispatch::Regenerated);
        }

        self.ports.repository.update_note_context(ctx).await?;
        let parent_updated = match ctx.note.parent_id {
            Some(parent_id) if ctx.is_synthesis() => self.propagate_to_parent(ctx, parent_id).await?,
            _ => false,
        };
        Ok(Dispatch::Refreshed {
            parent_updated,
            archive_checked: false,
        })
    }

    /// Copy the synthesis header fields into the parent note and rewrite its
    /// frontmatter. Returns `true` when the parent file was rewritten.
    async fn propagate_to_parent(&self, ctx: &NoteContext, parent_id: NoteId) -> Result<bool> {
        let Some(parent) = self.ports.repository.get_note_by_id(parent_id).await? else {
            warn!(parent_id, "Parent note not found, skipping propagation");
            return Ok(false);
        };
        if parent.id.is_none() {
            return Err(Error::context(
                "propagate_to_parent",
                format!("parent record {} carries no id", parent_id),
            ));
        }

        let mut parent_ctx = self.ports.maintenance.load_note_context(&parent).await?;

        if let (Some(target), Some(source)) = (parent_ctx.metadata.as_mut(), ctx.metadata.as_ref())
        {
            target.title = source.title.clone();
            target.source = source.source.clone();
            target.project = source.project.clone();
            target.author = source.author.clone();
            if ctx.note.media_id.is_some() && parent_ctx.note.media_id.is_some() {
                parent_ctx.note.media_id = ctx.note.media_id;
                target.doc_type = source.doc_type;
                target.provider = source.provider.clone();
                target.media_source = source.media_source.clone();
            }
        }
        if let (Some(target), Some(source)) = (
            parent_ctx.classification.as_mut(),
            ctx.classification.as_ref(),
        ) {
            target.category_id = source.category_id;
            target.subcategory_id = source.subcategory_id;
        }

        let (Some(content), Some(metadata)) = (&parent_ctx.content, &parent_ctx.metadata) else {
            debug!(parent_id, "Parent has no content or metadata, nothing to write");
            return Ok(false);
        };
        self.ports
            .maintenance
            .write_metadata_to_note(&parent_ctx.file_path, content, metadata)
            .await?;
        self.ports.repository.update_note_context(&parent_ctx).await?;
        info!(parent_id, "Parent frontmatter updated from synthesis");
        Ok(true)
    }

    // =========================================================================
    // SHARED STEPS
    // =========================================================================

    /// Guarded import.
    async fn import(
        &self,
        ctx: &NoteContext,
        queued: &QueuedNoteContext,
        note_id: NoteId,
        force_categ: bool,
    ) -> Result<Dispatch> {
        let guard = self.guard.guard(queued).await?;
        if !guard.is_ready() {
            return Ok(Dispatch::Deferred { guard });
        }

        let success = self
            .ports
            .import
            .import_normal(&ctx.file_path, note_id, ctx, force_categ)
            .await?;
        if success {
            info!(note_id, force_categ, "Import complete");
        } else {
            warn!(note_id, force_categ, "Import reported failure");
        }
        Ok(Dispatch::Imported {
            force_categ,
            success,
        })
    }

    async fn archive_check_if_synthesis(&self, ctx: &NoteContext, note_id: NoteId) -> Result<bool> {
        if !ctx.is_synthesis() {
            return Ok(false);
        }
        self.ports
            .maintenance
            .check_synthesis_and_trigger_archive(note_id, &ctx.file_path, ctx)
            .await?;
        Ok(true)
    }

    async fn route_error(&self, ctx: &NoteContext, note_id: NoteId, err: Error) -> Dispatch {
        let err = err.with_context(STEP, note_id, &ctx.file_path);
        error!(
            note_id,
            file_path = %ctx.file_path,
            error = %err,
            "Processing failed, moving note to error folder"
        );
        self.ports
            .errors
            .handle_errored_file(note_id, &ctx.file_path, &err)
            .await;
        Dispatch::Errored {
            error: err.to_string(),
        }
    }
}

fn is_note_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(defaults::NOTE_EXTENSION))
}
