//! In-process note queue and worker.
//!
//! The queue carries [`QueuedNoteContext`] values by ownership. Requeues hand
//! over the incremented copy produced by the GPU guard, so `id`, `lock_key`
//! and `retry_count` cross the boundary unchanged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use brainops_core::config::env_or;
use brainops_core::{
    defaults, ContextLoader, Error, NoteContext, NoteMaintenance, NoteRepository,
    QueuedNoteContext, RequeuePort, Result,
};

use crate::lifecycle::{Dispatch, IgnoreReason, NoteLifecycle};

/// Configuration for the note queue and worker.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Bounded queue capacity.
    pub capacity: usize,
    /// Maximum number of notes processed at once.
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::QUEUE_CAPACITY,
            max_concurrent: defaults::WORKER_MAX_CONCURRENT,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `NOTE_QUEUE_CAPACITY` | `1024` | Bounded queue size |
    /// | `NOTE_WORKER_MAX_CONCURRENT` | `2` | Notes processed at once |
    pub fn from_env() -> Self {
        Self {
            capacity: env_or("NOTE_QUEUE_CAPACITY", defaults::QUEUE_CAPACITY).max(1),
            max_concurrent: env_or("NOTE_WORKER_MAX_CONCURRENT", defaults::WORKER_MAX_CONCURRENT)
                .max(1),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Producer side of the note queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NoteQueue {
    tx: mpsc::Sender<QueuedNoteContext>,
}

impl NoteQueue {
    /// Create a bounded queue and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<QueuedNoteContext>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a context, waiting for capacity.
    pub async fn enqueue(&self, queued: QueuedNoteContext) -> Result<()> {
        debug!(
            subsystem = "queue",
            request_id = %queued.id,
            lock_key = %queued.lock_key,
            "Enqueue"
        );
        self.tx
            .send(queued)
            .await
            .map_err(|_| Error::Queue("note queue is closed".into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl RequeuePort for NoteQueue {
    /// Push the context back without waiting for capacity. On a full queue
    /// the send moves to a spawned task.
    async fn replay_enqueue(&self, queued: QueuedNoteContext) -> Result<()> {
        let request_id = queued.id;
        let retry_count = queued.retry_count;
        match self.tx.try_send(queued) {
            Ok(()) => {
                info!(
                    subsystem = "queue",
                    %request_id,
                    retry_count,
                    "Requeued"
                );
                Ok(())
            }
            Err(TrySendError::Full(queued)) => {
                warn!(
                    subsystem = "queue",
                    %request_id,
                    retry_count,
                    "Queue full, requeue deferred"
                );
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(queued).await.is_err() {
                        error!(subsystem = "queue", %request_id, "Queue closed, requeue lost");
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::Queue(format!(
                "note queue is closed, cannot requeue {}",
                request_id
            ))),
        }
    }
}

// =============================================================================
// KEY LOCKS
// =============================================================================

/// One async mutex per `lock_key`.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop entries nobody holds or waits for.
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Event emitted by the note worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// A note was taken from the queue and its lock acquired.
    NoteStarted { request_id: Uuid, lock_key: String },
    /// The state machine returned a dispatch outcome.
    NoteCompleted {
        request_id: Uuid,
        lock_key: String,
        outcome: Dispatch,
    },
    /// Loading or dispatch failed with an error the state machine did not absorb.
    NoteFailed {
        request_id: Uuid,
        lock_key: String,
        error: String,
    },
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to stop taking new notes. In-flight notes finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that drains the note queue into the lifecycle state machine.
pub struct NoteWorker {
    lifecycle: Arc<NoteLifecycle>,
    loader: Arc<dyn ContextLoader>,
    rx: mpsc::Receiver<QueuedNoteContext>,
    config: QueueConfig,
    locks: Arc<KeyLocks>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl NoteWorker {
    pub fn new(
        lifecycle: Arc<NoteLifecycle>,
        loader: Arc<dyn ContextLoader>,
        rx: mpsc::Receiver<QueuedNoteContext>,
        config: QueueConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            lifecycle,
            loader,
            rx,
            config,
            locks: Arc::new(KeyLocks::new()),
            event_tx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(self.run(shutdown_rx));

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop.
    ///
    /// Takes notes as long as a concurrency slot is free. Stops on shutdown
    /// or when every producer is gone, then waits for in-flight notes.
    #[instrument(skip_all, fields(subsystem = "queue", component = "worker"))]
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            capacity = self.config.capacity,
            max_concurrent = self.config.max_concurrent,
            "Note worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let slots = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Note worker received shutdown signal");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = ?e, "Note task panicked");
                    }
                    self.locks.prune();
                    continue;
                }
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let queued = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Note worker received shutdown signal");
                    break;
                }
                item = self.rx.recv() => match item {
                    Some(queued) => queued,
                    None => {
                        info!("Note queue closed");
                        break;
                    }
                },
            };

            let worker = self.clone_refs();
            tasks.spawn(async move {
                worker.process(queued).await;
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = ?e, "Note task panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Note worker stopped");
    }

    /// Clone references needed for spawned note tasks.
    fn clone_refs(&self) -> NoteWorkerRef {
        NoteWorkerRef {
            lifecycle: self.lifecycle.clone(),
            loader: self.loader.clone(),
            locks: self.locks.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

/// Reference bundle for processing a single note in a spawned task.
struct NoteWorkerRef {
    lifecycle: Arc<NoteLifecycle>,
    loader: Arc<dyn ContextLoader>,
    locks: Arc<KeyLocks>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl NoteWorkerRef {
    async fn process(self, queued: QueuedNoteContext) {
        let start = Instant::now();
        let request_id = queued.id;
        let lock_key = queued.lock_key.clone();

        let _guard = self.locks.acquire(&lock_key).await;
        debug!(
            %request_id,
            %lock_key,
            retry_count = queued.retry_count,
            "Processing note"
        );
        let _ = self.event_tx.send(WorkerEvent::NoteStarted {
            request_id,
            lock_key: lock_key.clone(),
        });

        match self.dispatch(&queued).await {
            Ok(outcome) => {
                info!(
                    %request_id,
                    %lock_key,
                    ?outcome,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Note processed"
                );
                let _ = self.event_tx.send(WorkerEvent::NoteCompleted {
                    request_id,
                    lock_key,
                    outcome,
                });
            }
            Err(e) => {
                error!(
                    %request_id,
                    %lock_key,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Note processing failed"
                );
                let _ = self.event_tx.send(WorkerEvent::NoteFailed {
                    request_id,
                    lock_key,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn dispatch(&self, queued: &QueuedNoteContext) -> Result<Dispatch> {
        match self.loader.load(queued).await? {
            Some(ctx) => self.lifecycle.process_single_note(&ctx, queued).await,
            None => Ok(Dispatch::Ignored {
                reason: IgnoreReason::NoPersistedNote,
            }),
        }
    }
}

// =============================================================================
// CONTEXT LOADER
// =============================================================================

/// Builds contexts from the repository and the maintenance port.
///
/// The note id comes from the event snapshot; events without one are not
/// persisted notes yet and yield `None`.
pub struct PersistedContextLoader {
    repository: Arc<dyn NoteRepository>,
    maintenance: Arc<dyn NoteMaintenance>,
}

impl PersistedContextLoader {
    pub fn new(repository: Arc<dyn NoteRepository>, maintenance: Arc<dyn NoteMaintenance>) -> Self {
        Self {
            repository,
            maintenance,
        }
    }
}

#[async_trait]
impl ContextLoader for PersistedContextLoader {
    async fn load(&self, queued: &QueuedNoteContext) -> Result<Option<NoteContext>> {
        let Some(note_id) = queued.note_id() else {
            debug!(subsystem = "queue", path = %queued.event.path(), "Event carries no note id");
            return Ok(None);
        };
        let Some(note) = self.repository.get_note_by_id(note_id).await? else {
            warn!(subsystem = "queue", note_id, "Note not found in repository");
            return Ok(None);
        };

        let mut ctx = self.maintenance.load_note_context(&note).await?;
        ctx.file_path = queued.event.path().to_string();
        ctx.src_path = queued.event.src_path().map(str::to_string);
        Ok(Some(ctx))
    }
}
