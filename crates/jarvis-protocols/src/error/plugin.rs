//! Plugin-related errors.

use thiserror::Error;

use super::{CapabilityError, ErrorKind};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),

    #[error("Incompatible engine: plugin requires {required}, kernel provides {provided}")]
    IncompatibleEngine { required: String, provided: String },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("No plugin factory registered for entry: {0}")]
    UnknownEntry(String),

    #[error("Plugin {plugin} cannot {action} while {state}")]
    InvalidTransition {
        plugin: String,
        action: String,
        state: String,
    },

    #[error("Admission denied for plugin {plugin}: {reason}")]
    AdmissionDenied { plugin: String, reason: String },

    #[error("Plugin {plugin} hook '{hook}' timed out after {timeout_ms}ms")]
    HookTimeout {
        plugin: String,
        hook: String,
        timeout_ms: u64,
    },

    #[error("Plugin {plugin} hook '{hook}' failed: {message}")]
    HookFailed {
        plugin: String,
        hook: String,
        message: String,
    },

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Plugin execution failed: {0}")]
    Execution(String),

    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::InvalidManifest(_)
            | PluginError::IncompatibleEngine { .. }
            | PluginError::UnknownEntry(_) => ErrorKind::Validation,
            PluginError::NotFound(_) => ErrorKind::NotFound,
            PluginError::InvalidTransition { .. } => ErrorKind::State,
            PluginError::AdmissionDenied { .. } => ErrorKind::Admission,
            PluginError::HookTimeout { .. } => ErrorKind::Timeout,
            PluginError::HookFailed { .. } | PluginError::Execution(_) | PluginError::Custom(_) => {
                ErrorKind::Execution
            }
            PluginError::Capability(e) => e.kind(),
        }
    }
}
