//! # brainops-core
//!
//! Core types, traits, and abstractions for the brainops note pipeline.
//!
//! This crate provides the data model shared by the lifecycle engine and its
//! collaborators, the error taxonomy, configuration defaults, the ports that
//! concrete backends implement, and the text segmentation engine.

pub mod chunking;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod tokenizer;
pub mod traits;
pub mod zones;

// Re-export commonly used types at crate root
pub use chunking::{
    Chunk, ChunkKind, Segmenter, SplitBudget, SplitConfig, SplitStrategy,
};
pub use error::{Error, ErrorContext, Result};
pub use models::*;
pub use tokenizer::*;
pub use traits::*;
pub use zones::{path_is_inside, Zone, ZoneLayout};
