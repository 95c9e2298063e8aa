//! Pool errors.

use jarvis_protocols::ErrorKind;
use thiserror::Error;

/// Worker pool error types.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Task exceeded its timeout. The worker running it was torn down.
    #[error("Task {task_id} timed out after {timeout_ms}ms")]
    Timeout { task_id: String, timeout_ms: u64 },

    /// Job code failed or panicked.
    #[error("Job execution failed: {0}")]
    Execution(String),

    /// Payload rejected at the executor boundary.
    #[error("Invalid payload for job '{kind}': {message}")]
    InvalidPayload { kind: String, message: String },

    /// No executor for this job kind.
    #[error("Unknown job kind: {0}")]
    UnknownJob(String),

    /// Worker thread went away mid-task.
    #[error("Worker {0} crashed")]
    WorkerCrashed(u64),

    /// Pool was terminated.
    #[error("Worker pool terminated")]
    Terminated,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Timeout { .. } => ErrorKind::Timeout,
            PoolError::Execution(_) | PoolError::WorkerCrashed(_) => ErrorKind::Execution,
            PoolError::InvalidPayload { .. }
            | PoolError::UnknownJob(_)
            | PoolError::InvalidConfig(_) => ErrorKind::Validation,
            PoolError::Terminated => ErrorKind::Unavailable,
        }
    }

    pub fn invalid_payload(kind: impl Into<String>, message: impl Into<String>) -> Self {
        PoolError::InvalidPayload {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
