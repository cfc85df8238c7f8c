//! Recording fakes shared by the lifecycle and worker tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use brainops_jobs::{
    parse_note, render_note, Error, ErrorContext, ErrorSink, GpuGuard, GuardConfig, HealthProbe,
    ImportWorkflow, LifecyclePorts, Note, NoteContext, NoteId, NoteLifecycle, NoteMaintenance,
    NoteMetadata, NoteRepository, NoteStatus, QueuedNoteContext, RegenWorkflow, RequeuePort,
    Result, VramProbe, ZoneLayout,
};

// ============================================================================
// VAULT
// ============================================================================

/// Temporary vault with the default zone folders.
pub struct Vault {
    pub dir: TempDir,
    pub layout: ZoneLayout,
}

impl Vault {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp vault");
        let layout = ZoneLayout::with_base(dir.path()).expect("Default zones are disjoint");
        for folder in ["Imports", "Z_Storage/Uncategorized", "Z_Storage/Notes/Tech/Rust"] {
            std::fs::create_dir_all(dir.path().join(folder)).expect("Failed to create zone");
        }
        Self { dir, layout }
    }

    /// Write a file relative to the vault root and return the relative path.
    pub fn write(&self, rel: &str, content: &str) -> String {
        let full = self.dir.path().join(rel);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create folder");
        }
        std::fs::write(&full, content).expect("Failed to write note");
        rel.to_string()
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(rel)).expect("Failed to read note")
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

#[derive(Default)]
pub struct FakeRepo {
    pub notes: Mutex<HashMap<NoteId, Note>>,
    pub updates: Mutex<Vec<NoteContext>>,
    pub fail_updates: Mutex<bool>,
}

impl FakeRepo {
    pub fn with_notes(notes: impl IntoIterator<Item = Note>) -> Arc<Self> {
        let repo = Self::default();
        {
            let mut map = repo.notes.lock().unwrap();
            for note in notes {
                map.insert(note.id.expect("fake notes carry ids"), note);
            }
        }
        Arc::new(repo)
    }

    pub fn set_status(&self, id: NoteId, status: NoteStatus) {
        if let Some(note) = self.notes.lock().unwrap().get_mut(&id) {
            note.status = Some(status);
        }
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

#[async_trait]
impl NoteRepository for FakeRepo {
    async fn get_note_by_id(&self, id: NoteId) -> Result<Option<Note>> {
        Ok(self.notes.lock().unwrap().get(&id).cloned())
    }

    async fn update_note_context(&self, ctx: &NoteContext) -> Result<()> {
        if *self.fail_updates.lock().unwrap() {
            return Err(Error::Internal("database unavailable".into()));
        }
        self.updates.lock().unwrap().push(ctx.clone());
        Ok(())
    }
}

// ============================================================================
// MAINTENANCE
// ============================================================================

/// Counts calls and writes frontmatter into the vault.
pub struct FakeMaintenance {
    pub base: std::path::PathBuf,
    pub contexts: Mutex<HashMap<NoteId, NoteContext>>,
    pub sync_result: bool,
    pub tags_result: bool,
    pub syncs: AtomicUsize,
    pub retags: AtomicUsize,
    pub archive_checks: AtomicUsize,
    pub writes: Mutex<Vec<(String, NoteMetadata)>>,
}

impl FakeMaintenance {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            contexts: Mutex::new(HashMap::new()),
            sync_result: true,
            tags_result: true,
            syncs: AtomicUsize::new(0),
            retags: AtomicUsize::new(0),
            archive_checks: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Context returned by `load_note_context` for `id`.
    pub fn with_context(self, id: NoteId, ctx: NoteContext) -> Self {
        self.contexts.lock().unwrap().insert(id, ctx);
        self
    }

    pub fn archive_checks(&self) -> usize {
        self.archive_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NoteMaintenance for FakeMaintenance {
    async fn load_note_context(&self, note: &Note) -> Result<NoteContext> {
        let stored = note
            .id
            .and_then(|id| self.contexts.lock().unwrap().get(&id).cloned());
        Ok(stored.unwrap_or_else(|| NoteContext::new(note.clone(), note.file_path.clone(), None)))
    }

    async fn sync_classification_to_metadata(
        &self,
        _note_id: NoteId,
        _ctx: &NoteContext,
    ) -> Result<bool> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(self.sync_result)
    }

    async fn regenerate_tags(
        &self,
        _file_path: &str,
        _note_id: NoteId,
        _ctx: &NoteContext,
    ) -> Result<bool> {
        self.retags.fetch_add(1, Ordering::SeqCst);
        Ok(self.tags_result)
    }

    async fn check_synthesis_and_trigger_archive(
        &self,
        _note_id: NoteId,
        _file_path: &str,
        _ctx: &NoteContext,
    ) -> Result<()> {
        self.archive_checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_metadata_to_note(
        &self,
        file_path: &str,
        content: &str,
        metadata: &NoteMetadata,
    ) -> Result<()> {
        let (_, body) = parse_note(content);
        let rendered = render_note(metadata, body)?;
        std::fs::write(self.base.join(file_path), rendered)?;
        self.writes
            .lock()
            .unwrap()
            .push((file_path.to_string(), metadata.clone()));
        Ok(())
    }
}

// ============================================================================
// WORKFLOWS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportBehavior {
    Succeed,
    ReportFailure,
    Fail,
    Fatal,
}

/// Import fake. On success it marks the note as synthesis in the repository,
/// like the real import does once the note is processed.
pub struct FakeImport {
    pub repo: Arc<FakeRepo>,
    pub behavior: ImportBehavior,
    pub delay: Duration,
    pub calls: Mutex<Vec<(NoteId, bool)>>,
    active: Mutex<HashMap<NoteId, usize>>,
    pub max_active_per_note: AtomicUsize,
}

impl FakeImport {
    pub fn new(repo: Arc<FakeRepo>) -> Self {
        Self {
            repo,
            behavior: ImportBehavior::Succeed,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            max_active_per_note: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(mut self, behavior: ImportBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn forced(&self) -> Vec<bool> {
        self.calls.lock().unwrap().iter().map(|(_, f)| *f).collect()
    }
}

#[async_trait]
impl ImportWorkflow for FakeImport {
    async fn import_normal(
        &self,
        _file_path: &str,
        note_id: NoteId,
        _ctx: &NoteContext,
        force_categ: bool,
    ) -> Result<bool> {
        self.calls.lock().unwrap().push((note_id, force_categ));
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(note_id).or_insert(0);
            *count += 1;
            self.max_active_per_note.fetch_max(*count, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        {
            let mut active = self.active.lock().unwrap();
            if let Some(count) = active.get_mut(&note_id) {
                *count -= 1;
            }
        }

        match self.behavior {
            ImportBehavior::Succeed => {
                self.repo.set_status(note_id, NoteStatus::Synthesis);
                Ok(true)
            }
            ImportBehavior::ReportFailure => Ok(false),
            ImportBehavior::Fail => Err(Error::workflow("classifier returned no category")),
            ImportBehavior::Fatal => Err(Error::context("import_normal", "note id vanished")),
        }
    }
}

pub struct FakeRegen {
    pub handled: bool,
    pub calls: AtomicUsize,
}

impl FakeRegen {
    pub fn new(handled: bool) -> Self {
        Self {
            handled,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegenWorkflow for FakeRegen {
    async fn regen_hub(
        &self,
        _file_path: &str,
        _note_id: NoteId,
        _ctx: &NoteContext,
        _queued: &QueuedNoteContext,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.handled)
    }
}

/// Recorded call to the error sink.
#[derive(Debug, Clone)]
pub struct ErroredFile {
    pub note_id: NoteId,
    pub file_path: String,
    pub message: String,
    pub context: Option<ErrorContext>,
}

#[derive(Default)]
pub struct FakeErrorSink {
    pub calls: Mutex<Vec<ErroredFile>>,
}

impl FakeErrorSink {
    pub fn calls(&self) -> Vec<ErroredFile> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorSink for FakeErrorSink {
    async fn handle_errored_file(&self, note_id: NoteId, file_path: &str, error: &Error) {
        self.calls.lock().unwrap().push(ErroredFile {
            note_id,
            file_path: file_path.to_string(),
            message: error.to_string(),
            context: error.error_context().cloned(),
        });
    }
}

// ============================================================================
// PROBES
// ============================================================================

pub struct FixedVram {
    pub free_mb: Option<u64>,
    pub calls: AtomicUsize,
}

impl FixedVram {
    pub fn free(free_mb: u64) -> Self {
        Self {
            free_mb: Some(free_mb),
            calls: AtomicUsize::new(0),
        }
    }

    /// Probe whose tool is missing.
    pub fn broken() -> Self {
        Self {
            free_mb: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VramProbe for FixedVram {
    async fn free_vram_mb(&self) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.free_mb
            .ok_or_else(|| Error::GpuProbe("failed to run nvidia-smi".into()))
    }
}

pub struct FixedHealth(pub bool);

#[async_trait]
impl HealthProbe for FixedHealth {
    async fn check_health(&self) -> Result<bool> {
        Ok(self.0)
    }
}

#[derive(Default)]
pub struct RecordingRequeue {
    pub sent: Mutex<Vec<QueuedNoteContext>>,
}

impl RecordingRequeue {
    pub fn sent(&self) -> Vec<QueuedNoteContext> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequeuePort for RecordingRequeue {
    async fn replay_enqueue(&self, queued: QueuedNoteContext) -> Result<()> {
        self.sent.lock().unwrap().push(queued);
        Ok(())
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// State machine wired to recording fakes.
pub struct Harness {
    pub vault: Vault,
    pub repo: Arc<FakeRepo>,
    pub maintenance: Arc<FakeMaintenance>,
    pub import: Arc<FakeImport>,
    pub regen: Arc<FakeRegen>,
    pub errors: Arc<FakeErrorSink>,
    pub vram: Arc<FixedVram>,
    pub requeue: Arc<RecordingRequeue>,
    pub lifecycle: Arc<NoteLifecycle>,
}

pub struct HarnessBuilder {
    vault: Vault,
    notes: Vec<Note>,
    maintenance: Option<FakeMaintenance>,
    import: ImportBehavior,
    regen_handled: bool,
    import_delay: Duration,
    vram: FixedVram,
    healthy: bool,
    guard: GuardConfig,
    requeue_to: Option<Arc<dyn RequeuePort>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            vault: Vault::new(),
            notes: Vec::new(),
            maintenance: None,
            import: ImportBehavior::Succeed,
            import_delay: Duration::ZERO,
            regen_handled: false,
            vram: FixedVram::free(16_000),
            healthy: true,
            guard: GuardConfig::default().with_timeout(Duration::ZERO),
            requeue_to: None,
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn note(mut self, note: Note) -> Self {
        self.notes.push(note);
        self
    }

    pub fn maintenance(mut self, f: impl FnOnce(FakeMaintenance) -> FakeMaintenance) -> Self {
        let base = FakeMaintenance::new(self.vault.dir.path());
        self.maintenance = Some(f(base));
        self
    }

    pub fn import(mut self, behavior: ImportBehavior) -> Self {
        self.import = behavior;
        self
    }

    pub fn import_delay(mut self, delay: Duration) -> Self {
        self.import_delay = delay;
        self
    }

    pub fn guard(mut self, config: GuardConfig) -> Self {
        self.guard = config;
        self
    }

    /// Send guard requeues to `port` instead of the recording fake.
    pub fn requeue_to(mut self, port: Arc<dyn RequeuePort>) -> Self {
        self.requeue_to = Some(port);
        self
    }

    pub fn regen_handled(mut self, handled: bool) -> Self {
        self.regen_handled = handled;
        self
    }

    pub fn vram(mut self, vram: FixedVram) -> Self {
        self.vram = vram;
        self
    }

    pub fn healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn build(self) -> Harness {
        let repo = FakeRepo::with_notes(self.notes);
        let maintenance = Arc::new(
            self.maintenance
                .unwrap_or_else(|| FakeMaintenance::new(self.vault.dir.path())),
        );
        let import = Arc::new(
            FakeImport::new(repo.clone())
                .with_behavior(self.import)
                .with_delay(self.import_delay),
        );
        let regen = Arc::new(FakeRegen::new(self.regen_handled));
        let errors = Arc::new(FakeErrorSink::default());
        let vram = Arc::new(self.vram);
        let requeue = Arc::new(RecordingRequeue::default());

        let requeue_port: Arc<dyn RequeuePort> = match self.requeue_to {
            Some(port) => port,
            None => requeue.clone(),
        };
        let guard = GpuGuard::new(
            vram.clone(),
            Arc::new(FixedHealth(self.healthy)),
            requeue_port,
            self.guard,
        );
        let ports = LifecyclePorts {
            repository: repo.clone(),
            maintenance: maintenance.clone(),
            import: import.clone(),
            regen: regen.clone(),
            errors: errors.clone(),
        };
        let lifecycle = Arc::new(NoteLifecycle::new(self.vault.layout.clone(), guard, ports));

        Harness {
            vault: self.vault,
            repo,
            maintenance,
            import,
            regen,
            errors,
            vram,
            requeue,
            lifecycle,
        }
    }
}
