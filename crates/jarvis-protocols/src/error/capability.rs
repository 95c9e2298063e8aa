//! Capability-related errors.

use thiserror::Error;

use super::ErrorKind;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Permission denied: plugin {plugin} lacks '{permission}'")]
    PermissionDenied { plugin: String, permission: String },

    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Capability already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid capability arguments: {0}")]
    InvalidArguments(String),

    #[error("Admission denied for plugin {plugin}: {reason}")]
    AdmissionDenied { plugin: String, reason: String },

    #[error("Capability call timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Capability execution failed: {0}")]
    Execution(String),

    #[error("Capability unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CapabilityError::PermissionDenied { .. } => ErrorKind::Permission,
            CapabilityError::NotFound(_) => ErrorKind::NotFound,
            CapabilityError::AlreadyRegistered(_) => ErrorKind::State,
            CapabilityError::InvalidArguments(_) => ErrorKind::Validation,
            CapabilityError::AdmissionDenied { .. } => ErrorKind::Admission,
            CapabilityError::Timeout(_) => ErrorKind::Timeout,
            CapabilityError::Network(_) => ErrorKind::Network,
            CapabilityError::Execution(_) => ErrorKind::Execution,
            CapabilityError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }
}
