//! Offline queue errors.

use jarvis_protocols::ErrorKind;
use thiserror::Error;

/// Offline queue error types.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Durable store failed.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Operation not found: {0}")]
    NotFound(String),

    /// Rejected before anything was persisted.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Handler reported a failure.
    #[error("Operation failed: {0}")]
    Handler(String),

    /// Handler failed on connectivity.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid classifier pattern: {0}")]
    Pattern(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Store(_) => ErrorKind::Unavailable,
            QueueError::NotFound(_) => ErrorKind::NotFound,
            QueueError::InvalidOperation(_) | QueueError::Pattern(_) => ErrorKind::Validation,
            QueueError::Handler(_) => ErrorKind::Execution,
            QueueError::Network(_) => ErrorKind::Network,
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        QueueError::Handler(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        QueueError::Network(message.into())
    }

    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        QueueError::Store(err.to_string())
    }
}
