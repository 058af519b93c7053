//! Error types for Curator.
//!
//! Library crates use [`CuratorError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Curator operations.
#[derive(Debug, thiserror::Error)]
pub enum CuratorError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error raised by a fetch collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// Response body or document could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Sink or database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A collaborator could not judge a candidate (unsupported language, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Snapshot encoding, decoding, or version mismatch.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An external call exceeded its time budget.
    #[error("timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    /// Operation not permitted in the pipeline's current lifecycle state.
    #[error("invalid state: {0}")]
    State(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CuratorError>;

impl CuratorError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a timeout error for `operation`.
    pub fn timeout(operation: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
