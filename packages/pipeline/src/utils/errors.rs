// packages/pipeline/src/utils/errors.rs
//! Error types shared by every pipeline component

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, LoggerError>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Malformed writer or logger configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Writer `type` that no backend is registered for
    #[error("unknown writer kind: {0}")]
    UnknownWriterKind(String),

    /// Backend could not reach its medium
    #[error("connection failed: {0}")]
    Connection(String),

    /// Transient failure while persisting a single event
    #[error("write failed: {0}")]
    Write(String),

    /// Value could not be rendered as text
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Operation not meaningful for the receiver
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// Writer collection has no usable backend left
    #[error("no usable writers after {0}")]
    NoWriters(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl LoggerError {
    /// Whether the error means the backend should be dropped rather than retried
    pub fn is_fatal_for_backend(&self) -> bool {
        matches!(
            self,
            LoggerError::Configuration(_)
                | LoggerError::UnknownWriterKind(_)
                | LoggerError::Connection(_)
                | LoggerError::Timeout(_)
        )
    }
}
