//! Core errors.

use jarvis_config::ConfigError;
use jarvis_offline::QueueError;
use jarvis_protocols::{ErrorKind, PluginError};
use jarvis_workpool::PoolError;
use thiserror::Error;

use crate::resources::AdmissionDenial;

/// Resource manager errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("Invalid quota for {tenant}: {message}")]
    InvalidQuota { tenant: String, message: String },

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Admission denied for {tenant}: {reason}")]
    Admission {
        tenant: String,
        reason: AdmissionDenial,
    },
}

impl ResourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResourceError::InvalidQuota { .. } => ErrorKind::Validation,
            ResourceError::UnknownTenant(_) => ErrorKind::NotFound,
            ResourceError::Admission { .. } => ErrorKind::Admission,
        }
    }
}

/// Kernel assembly and lifecycle errors.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Invalid engine version '{0}'")]
    InvalidEngine(String),

    #[error("Cannot {action} kernel while {state}")]
    InvalidState { action: String, state: String },

    #[error("Lifecycle hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },

    #[error("Lifecycle hook '{0}' timed out")]
    HookTimeout(String),

    #[error("{count} lifecycle hook(s) failed during shutdown")]
    Shutdown { count: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl KernelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::InvalidEngine(_) | KernelError::Config(_) => ErrorKind::Validation,
            KernelError::InvalidState { .. } => ErrorKind::State,
            KernelError::Hook { .. } | KernelError::Shutdown { .. } => ErrorKind::Execution,
            KernelError::HookTimeout(_) => ErrorKind::Timeout,
            KernelError::Pool(e) => e.kind(),
            KernelError::Queue(e) => e.kind(),
            KernelError::Plugin(e) => e.kind(),
            KernelError::Resource(e) => e.kind(),
        }
    }

    pub(crate) fn hook(hook: impl Into<String>, message: impl ToString) -> Self {
        KernelError::Hook {
            hook: hook.into(),
            message: message.to_string(),
        }
    }
}
