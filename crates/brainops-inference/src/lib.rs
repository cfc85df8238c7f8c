//! # brainops-inference
//!
//! Probes for the local inference host.
//!
//! This crate provides:
//! - [`NvidiaSmiProbe`]: free VRAM through `nvidia-smi`
//! - [`OllamaHealthProbe`]: model server health (feature `ollama`, default)
//!
//! Both implement the ports the GPU guard consumes
//! ([`brainops_core::VramProbe`] and [`brainops_core::HealthProbe`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use brainops_core::{HealthProbe, VramProbe};
//! use brainops_inference::{NvidiaSmiProbe, OllamaHealthProbe};
//!
//! #[tokio::main]
//! async fn main() {
//!     let free = NvidiaSmiProbe::new().free_vram_mb().await.unwrap();
//!     let healthy = OllamaHealthProbe::from_env().check_health().await.unwrap();
//!     println!("free={}MiB healthy={}", free, healthy);
//! }
//! ```

pub mod hardware;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use hardware::{parse_free_vram_mb, NvidiaSmiProbe};

#[cfg(feature = "ollama")]
pub use ollama::OllamaHealthProbe;
