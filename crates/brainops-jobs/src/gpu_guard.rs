//! GPU resource guard.
//!
//! Before a GPU-bound branch runs, the guard polls the VRAM probe until
//! enough memory is free and the model server is healthy. When the timeout
//! elapses first, the queued context is requeued with an incremented retry
//! counter, or dropped once the counter exceeds `max_retries`.
//!
//! The wait occupies the calling worker slot; there is no external
//! cancellation. VRAM is an advisory gauge: two guards running at the same
//! time may both see enough memory.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

use brainops_core::config::env_or;
use brainops_core::{
    defaults, HealthProbe, QueuedNoteContext, RequeuePort, Result, VramProbe,
};
use brainops_inference::{NvidiaSmiProbe, OllamaHealthProbe};

/// Configuration for the GPU guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Free VRAM required to proceed (MiB).
    pub min_required_mb: u64,
    /// Delay between two polls.
    pub check_interval: Duration,
    /// Total wait before giving up on this invocation.
    pub timeout: Duration,
    /// Requeues allowed before the event is dropped.
    pub max_retries: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_required_mb: defaults::GPU_MIN_VRAM_MB,
            check_interval: Duration::from_secs(defaults::GPU_CHECK_INTERVAL_SECS),
            timeout: Duration::from_secs(defaults::GPU_TIMEOUT_SECS),
            max_retries: defaults::GPU_MAX_RETRIES,
        }
    }
}

impl GuardConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `GPU_MIN_VRAM_MB` | `8192` | Free VRAM required |
    /// | `GPU_CHECK_INTERVAL_SECS` | `180` | Delay between polls |
    /// | `GPU_TIMEOUT_SECS` | `3600` | Wait before requeue |
    /// | `GPU_MAX_RETRIES` | `20` | Requeues before drop |
    pub fn from_env() -> Self {
        Self {
            min_required_mb: env_or("GPU_MIN_VRAM_MB", defaults::GPU_MIN_VRAM_MB),
            check_interval: Duration::from_secs(
                env_or("GPU_CHECK_INTERVAL_SECS", defaults::GPU_CHECK_INTERVAL_SECS).max(1),
            ),
            timeout: Duration::from_secs(env_or("GPU_TIMEOUT_SECS", defaults::GPU_TIMEOUT_SECS)),
            max_retries: env_or("GPU_MAX_RETRIES", defaults::GPU_MAX_RETRIES),
        }
    }

    pub fn with_min_required_mb(mut self, mb: u64) -> Self {
        self.min_required_mb = mb;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Terminal state of one guard invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GuardOutcome {
    /// Conditions met; the caller may start GPU work.
    Ready,
    /// Timed out; an incremented copy was handed to the requeue port.
    Requeued { retry_count: u32 },
    /// Timed out with retries exhausted; the event is gone.
    Dropped { retry_count: u32 },
}

impl GuardOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, GuardOutcome::Ready)
    }
}

/// Gate in front of GPU-bound work.
pub struct GpuGuard {
    vram: Arc<dyn VramProbe>,
    health: Arc<dyn HealthProbe>,
    requeue: Arc<dyn RequeuePort>,
    config: GuardConfig,
}

impl GpuGuard {
    pub fn new(
        vram: Arc<dyn VramProbe>,
        health: Arc<dyn HealthProbe>,
        requeue: Arc<dyn RequeuePort>,
        config: GuardConfig,
    ) -> Self {
        Self {
            vram,
            health,
            requeue,
            config,
        }
    }

    /// Guard using `nvidia-smi` and the Ollama endpoint from the environment.
    pub fn with_local_probes(requeue: Arc<dyn RequeuePort>, config: GuardConfig) -> Self {
        Self::new(
            Arc::new(NvidiaSmiProbe::new()),
            Arc::new(OllamaHealthProbe::from_env()),
            requeue,
            config,
        )
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Wait for the GPU, then report whether the caller may proceed.
    ///
    /// `queued` is never mutated. On timeout the requeue port receives a copy
    /// carrying `retry_count + 1`. A VRAM probe failure is returned as an
    /// error and is not retried.
    #[instrument(
        skip(self, queued),
        fields(
            subsystem = "gpu",
            component = "guard",
            request_id = %queued.id,
            lock_key = %queued.lock_key,
        )
    )]
    pub async fn guard(&self, queued: &QueuedNoteContext) -> Result<GuardOutcome> {
        let required = self.config.min_required_mb;
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        loop {
            let free = self.vram.free_vram_mb().await?;
            if free >= required {
                match self.health.check_health().await {
                    Ok(true) => {
                        debug!(
                            free_vram_mb = free,
                            required_vram_mb = required,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "GPU ready"
                        );
                        return Ok(GuardOutcome::Ready);
                    }
                    Ok(false) => warn!(free_vram_mb = free, "Model server unhealthy, waiting"),
                    Err(e) => warn!(error = %e, "Model health check failed, waiting"),
                }
            } else {
                warn!(
                    free_vram_mb = free,
                    required_vram_mb = required,
                    "Insufficient VRAM, waiting"
                );
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            let wait = self.config.check_interval.min(remaining);
            sleep(if wait.is_zero() { remaining } else { wait }).await;
        }

        let next = queued.with_incremented_retry();
        let retry_count = next.retry_count;
        if retry_count > self.config.max_retries {
            error!(
                retry_count,
                max_retries = self.config.max_retries,
                "GPU unavailable, retries exhausted, dropping event"
            );
            return Ok(GuardOutcome::Dropped { retry_count });
        }

        self.requeue.replay_enqueue(next).await?;
        info!(
            retry_count,
            max_retries = self.config.max_retries,
            "GPU unavailable, event requeued"
        );
        Ok(GuardOutcome::Requeued { retry_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use brainops_core::{Error, Event};

    /// VRAM probe replaying a script; the last value repeats.
    struct ScriptedVram {
        values: Mutex<VecDeque<Result<u64>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedVram {
        fn new(values: Vec<Result<u64>>) -> Arc<Self> {
            Arc::new(Self {
                values: Mutex::new(values.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl VramProbe for ScriptedVram {
        async fn free_vram_mb(&self) -> Result<u64> {
            *self.calls.lock().unwrap() += 1;
            let mut values = self.values.lock().unwrap();
            if values.len() > 1 {
                values.pop_front().unwrap()
            } else {
                match values.front() {
                    Some(Ok(v)) => Ok(*v),
                    Some(Err(e)) => Err(Error::GpuProbe(e.to_string())),
                    None => Ok(0),
                }
            }
        }
    }

    struct FixedHealth(bool);

    #[async_trait]
    impl HealthProbe for FixedHealth {
        async fn check_health(&self) -> Result<bool> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct RecordingRequeue {
        sent: Mutex<Vec<QueuedNoteContext>>,
    }

    #[async_trait]
    impl RequeuePort for RecordingRequeue {
        async fn replay_enqueue(&self, queued: QueuedNoteContext) -> Result<()> {
            self.sent.lock().unwrap().push(queued);
            Ok(())
        }
    }

    fn guard_with(
        vram: Arc<ScriptedVram>,
        healthy: bool,
        config: GuardConfig,
    ) -> (GpuGuard, Arc<RecordingRequeue>) {
        let requeue = Arc::new(RecordingRequeue::default());
        let guard = GpuGuard::new(vram, Arc::new(FixedHealth(healthy)), requeue.clone(), config);
        (guard, requeue)
    }

    fn queued() -> QueuedNoteContext {
        QueuedNoteContext::new(Event::file_created("Imports/a.md"))
    }

    // =========================================================================
    // Config
    // =========================================================================

    #[test]
    fn test_guard_config_default() {
        let config = GuardConfig::default();
        assert_eq!(config.min_required_mb, 8192);
        assert_eq!(config.check_interval, Duration::from_secs(180));
        assert_eq!(config.timeout, Duration::from_secs(3600));
        assert_eq!(config.max_retries, 20);
    }

    #[test]
    fn test_guard_config_builder() {
        let config = GuardConfig::default()
            .with_min_required_mb(4096)
            .with_check_interval(Duration::from_secs(5))
            .with_timeout(Duration::ZERO)
            .with_max_retries(3);
        assert_eq!(config.min_required_mb, 4096);
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert!(config.timeout.is_zero());
        assert_eq!(config.max_retries, 3);
    }

    // =========================================================================
    // Guard states
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_ready_leaves_context_untouched() {
        let vram = ScriptedVram::new(vec![Ok(16_000)]);
        let (guard, requeue) = guard_with(vram.clone(), true, GuardConfig::default());
        let ctx = queued();

        let outcome = guard.guard(&ctx).await.unwrap();
        assert_eq!(outcome, GuardOutcome::Ready);
        assert_eq!(ctx.retry_count, 0);
        assert!(requeue.sent.lock().unwrap().is_empty());
        assert_eq!(vram.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_requeues_once_with_increment() {
        let vram = ScriptedVram::new(vec![Ok(1024)]);
        let (guard, requeue) = guard_with(
            vram,
            true,
            GuardConfig::default().with_timeout(Duration::ZERO),
        );
        let ctx = queued();

        let outcome = guard.guard(&ctx).await.unwrap();
        assert_eq!(outcome, GuardOutcome::Requeued { retry_count: 1 });
        assert!(!outcome.is_ready());

        let sent = requeue.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].retry_count, 1);
        assert_eq!(sent[0].lock_key, ctx.lock_key);
        assert_eq!(sent[0].id, ctx.id);
        assert_eq!(ctx.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_drops_without_requeue() {
        let vram = ScriptedVram::new(vec![Ok(0)]);
        let (guard, requeue) = guard_with(
            vram,
            true,
            GuardConfig::default()
                .with_timeout(Duration::ZERO)
                .with_max_retries(2),
        );
        let mut ctx = queued();
        ctx.retry_count = 2;

        let outcome = guard.guard(&ctx).await.unwrap();
        assert_eq!(outcome, GuardOutcome::Dropped { retry_count: 3 });
        assert!(requeue.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_vram_frees() {
        let vram = ScriptedVram::new(vec![Ok(1000), Ok(2000), Ok(9000)]);
        let (guard, requeue) = guard_with(vram.clone(), true, GuardConfig::default());
        let start = Instant::now();

        let outcome = guard.guard(&queued()).await.unwrap();
        assert!(outcome.is_ready());
        assert_eq!(vram.calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(360));
        assert!(requeue.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_poll_lands_on_timeout() {
        let vram = ScriptedVram::new(vec![Ok(0)]);
        let (guard, _requeue) = guard_with(
            vram.clone(),
            true,
            GuardConfig::default()
                .with_check_interval(Duration::from_secs(180))
                .with_timeout(Duration::from_secs(200)),
        );
        let start = Instant::now();

        let outcome = guard.guard(&queued()).await.unwrap();
        assert_eq!(outcome, GuardOutcome::Requeued { retry_count: 1 });
        // Polls at t=0, t=180 and t=200.
        assert_eq!(vram.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_model_counts_as_unavailable() {
        let vram = ScriptedVram::new(vec![Ok(16_000)]);
        let (guard, requeue) = guard_with(
            vram,
            false,
            GuardConfig::default().with_timeout(Duration::from_secs(360)),
        );

        let outcome = guard.guard(&queued()).await.unwrap();
        assert_eq!(outcome, GuardOutcome::Requeued { retry_count: 1 });
        assert_eq!(requeue.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_is_fatal_and_not_retried() {
        let vram = ScriptedVram::new(vec![Err(Error::GpuProbe("nvidia-smi missing".into()))]);
        let (guard, requeue) = guard_with(vram.clone(), true, GuardConfig::default());

        let err = guard.guard(&queued()).await.unwrap_err();
        assert!(matches!(err, Error::GpuProbe(_)));
        assert_eq!(vram.calls(), 1);
        assert!(requeue.sent.lock().unwrap().is_empty());
    }
}
