//! Centralized default constants for the brainops pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration types read their defaults from here and may override them
//! from the environment.

// =============================================================================
// NOTES
// =============================================================================

/// Extension (without dot) of files handled by the lifecycle state machine.
pub const NOTE_EXTENSION: &str = "md";

/// Default vault root.
pub const BASE_PATH: &str = "notes";

/// Default folder (relative to the vault root) for freshly imported notes.
pub const IMPORTS_PATH: &str = "Imports";

/// Default folder for notes whose classification failed.
pub const UNCATEGORIZED_PATH: &str = "Z_Storage/Uncategorized";

/// Default folder for classified notes.
pub const STORAGE_PATH: &str = "Z_Storage/Notes";

// =============================================================================
// SEGMENTATION
// =============================================================================

/// Character budget per chunk when no token budget is configured.
pub const SPLIT_MAX_CHARS: usize = 3800;

/// Overlap between consecutive linear windows, in the active unit.
pub const SPLIT_OVERLAP: usize = 350;

/// Heading injected in front of text preceding the first Markdown heading.
pub const SPLIT_INTRO_HEADING: &str = "## Introduction";

// =============================================================================
// GPU GUARD
// =============================================================================

/// Free VRAM required before GPU-bound work may start.
pub const GPU_MIN_VRAM_MB: u64 = 8192;

/// Delay between two VRAM polls.
pub const GPU_CHECK_INTERVAL_SECS: u64 = 180;

/// Total time the guard waits before requeueing.
pub const GPU_TIMEOUT_SECS: u64 = 3600;

/// Requeues allowed before an event is dropped.
pub const GPU_MAX_RETRIES: u32 = 20;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Timeout for the Ollama health check (seconds).
pub const HEALTH_TIMEOUT_SECS: u64 = 5;

/// VRAM probe command.
pub const NVIDIA_SMI: &str = "nvidia-smi";

// =============================================================================
// QUEUE
// =============================================================================

/// Capacity of the in-process note queue.
pub const QUEUE_CAPACITY: usize = 1024;

/// Notes processed concurrently by the worker (distinct lock keys only).
pub const WORKER_MAX_CONCURRENT: usize = 2;

/// Broadcast capacity for worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;
