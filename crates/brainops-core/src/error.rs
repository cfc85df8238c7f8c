//! Error types for the brainops note pipeline.
//!
//! Contract violations ([`Error::Context`]), GPU probe failures
//! ([`Error::GpuProbe`]) and a closed note queue ([`Error::Queue`]) are fatal.
//! Everything else is an operational failure that callers catch at a branch
//! boundary, log, and route to the error sink.

use std::fmt;

use thiserror::Error;

use crate::models::NoteId;

/// Result type alias using brainops' Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Enrichment attached to a workflow error at the branch boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Dispatch step that caught the error (e.g. `"process_single_note"`).
    pub step: Option<String>,
    /// Note being processed.
    pub note_id: Option<NoteId>,
    /// File path of the note being processed.
    pub file_path: Option<String>,
}

impl ErrorContext {
    pub fn is_empty(&self) -> bool {
        self.step.is_none() && self.note_id.is_none() && self.file_path.is_none()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(step) = &self.step {
            parts.push(format!("step={}", step));
        }
        if let Some(id) = self.note_id {
            parts.push(format!("note_id={}", id));
        }
        if let Some(path) = &self.file_path {
            parts.push(format!("file_path={}", path));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// Core error type for brainops operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Required note identity missing where the contract demands it (fatal)
    #[error("Context error at {step}: {reason}")]
    Context { step: String, reason: String },

    /// Import or regeneration workflow failed (recovered at branch boundary)
    #[error("Workflow error: {message} [{context}]")]
    Workflow {
        message: String,
        context: ErrorContext,
    },

    /// VRAM probe tool failed (fatal, never retried)
    #[error("GPU probe error: {0}")]
    GpuProbe(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Note queue is closed (fatal, the note itself is not at fault)
    #[error("Queue error: {0}")]
    Queue(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a fatal context error.
    pub fn context(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Context {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a workflow error with no enrichment yet.
    pub fn workflow(message: impl Into<String>) -> Self {
        Error::Workflow {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Whether this error must be raised to the caller instead of being
    /// converted into a logged side effect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Context { .. } | Error::GpuProbe(_) | Error::Queue(_)
        )
    }

    /// Enrich the error with dispatch context.
    ///
    /// Workflow errors keep any field already set and fill the missing ones.
    /// Other non-fatal errors are converted into workflow errors carrying
    /// their display text. Fatal errors are returned unchanged.
    pub fn with_context(self, step: &str, note_id: NoteId, file_path: &str) -> Self {
        match self {
            Error::Workflow {
                message,
                mut context,
            } => {
                context.step.get_or_insert_with(|| step.to_string());
                context.note_id.get_or_insert(note_id);
                context
                    .file_path
                    .get_or_insert_with(|| file_path.to_string());
                Error::Workflow { message, context }
            }
            fatal if fatal.is_fatal() => fatal,
            other => Error::Workflow {
                message: other.to_string(),
                context: ErrorContext {
                    step: Some(step.to_string()),
                    note_id: Some(note_id),
                    file_path: Some(file_path.to_string()),
                },
            },
        }
    }

    /// Enrichment carried by a workflow error, if any.
    pub fn error_context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Workflow { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
