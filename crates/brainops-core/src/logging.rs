//! Structured logging schema and field name constants for brainops.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query by the same keys across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Event dropped, workflow failure routed to the error sink |
//! | WARN  | Recoverable issue (insufficient VRAM, unhealthy model, oversize chunk) |
//! | INFO  | Branch decisions, lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (individual chunks) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID of a queued note context, kept across requeues.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "split", "gpu", "lifecycle", "queue", "inference"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "segmenter", "guard", "state_machine", "worker", "ollama"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "segment", "guard", "dispatch", "replay_enqueue"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Persisted note id being operated on.
pub const NOTE_ID: &str = "note_id";

/// Queue mutual-exclusion key.
pub const LOCK_KEY: &str = "lock_key";

/// Vault-relative path of the note file.
pub const FILE_PATH: &str = "file_path";

/// Move origin of the note file.
pub const SRC_PATH: &str = "src_path";

/// Dispatch step name attached to workflow errors.
pub const STEP: &str = "step";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks produced by segmentation.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Size of a chunk or section in the active unit.
pub const SIZE: &str = "size";

/// Active segmentation budget.
pub const LIMIT: &str = "limit";

/// Active segmentation unit ("tokens" or "chars").
pub const UNIT: &str = "unit";

// ─── GPU fields ────────────────────────────────────────────────────────────

/// Free VRAM reported by the probe.
pub const FREE_VRAM_MB: &str = "free_vram_mb";

/// VRAM required before GPU work may start.
pub const REQUIRED_VRAM_MB: &str = "required_vram_mb";

/// Guard retry counter after increment.
pub const RETRY_COUNT: &str = "retry_count";

/// Maximum retries before an event is dropped.
pub const MAX_RETRIES: &str = "max_retries";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_unique_snake_case() {
        let fields = [
            REQUEST_ID,
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            NOTE_ID,
            LOCK_KEY,
            FILE_PATH,
            SRC_PATH,
            STEP,
            DURATION_MS,
            CHUNK_COUNT,
            SIZE,
            LIMIT,
            UNIT,
            FREE_VRAM_MB,
            REQUIRED_VRAM_MB,
            RETRY_COUNT,
            MAX_RETRIES,
            SUCCESS,
            ERROR_MSG,
        ];
        let unique: std::collections::HashSet<_> = fields.iter().collect();
        assert_eq!(unique.len(), fields.len());
        assert!(fields
            .iter()
            .all(|f| f.chars().all(|c| c.is_ascii_lowercase() || c == '_')));
    }
}
