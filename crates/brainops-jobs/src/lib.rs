//! # brainops-jobs
//!
//! Event-driven note processing for the brainops pipeline.
//!
//! This crate provides:
//! - The note lifecycle state machine (one workflow per filesystem event)
//! - The GPU guard gating GPU-bound workflows, with bounded requeue
//! - An in-process note queue and worker with per-note mutual exclusion
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use brainops_jobs::{
//!     GpuGuard, GuardConfig, LifecyclePorts, NoteLifecycle, NoteQueue, NoteWorker,
//!     PersistedContextLoader, QueueConfig, ZoneLayout,
//! };
//!
//! let config = QueueConfig::from_env();
//! let (queue, rx) = NoteQueue::channel(config.capacity);
//!
//! let guard = GpuGuard::with_local_probes(Arc::new(queue.clone()), GuardConfig::from_env());
//! let lifecycle = NoteLifecycle::new(ZoneLayout::from_env()?, guard, ports);
//! let loader = PersistedContextLoader::new(repository, maintenance);
//!
//! let handle = NoteWorker::new(Arc::new(lifecycle), Arc::new(loader), rx, config).start();
//!
//! queue.enqueue(QueuedNoteContext::new(event)).await?;
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod gpu_guard;
pub mod lifecycle;
pub mod queue;

// Re-export core types
pub use brainops_core::*;

pub use gpu_guard::{GpuGuard, GuardConfig, GuardOutcome};
pub use lifecycle::{Dispatch, IgnoreReason, LifecyclePorts, NoteLifecycle};
pub use queue::{
    KeyLocks, NoteQueue, NoteWorker, PersistedContextLoader, QueueConfig, WorkerEvent,
    WorkerHandle,
};
