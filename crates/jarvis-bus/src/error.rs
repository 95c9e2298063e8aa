//! Event bus errors.

use jarvis_protocols::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid channel pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },

    #[error("No reply on {channel} within {timeout_ms}ms")]
    Timeout { channel: String, timeout_ms: u64 },

    #[error("Event on {0} carries no correlation id")]
    NoCorrelation(String),

    #[error("Reply subscription closed before a response arrived")]
    Closed,

    #[error("Handler failed: {0}")]
    Handler(String),
}

impl BusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::InvalidPattern { .. }
            | BusError::InvalidChannel { .. }
            | BusError::NoCorrelation(_) => ErrorKind::Validation,
            BusError::Timeout { .. } => ErrorKind::Timeout,
            BusError::Closed => ErrorKind::Unavailable,
            BusError::Handler(_) => ErrorKind::Execution,
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        BusError::Handler(message.into())
    }
}
