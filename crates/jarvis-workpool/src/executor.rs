//! Job executors run inside worker threads.

use serde_json::Value;

use crate::error::PoolError;
use crate::jobs::Job;

/// Executes a job on the calling worker thread.
///
/// Implementations may block. A panic is caught by the worker and
/// reported as [`PoolError::Execution`].
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, kind: &str, payload: &Value) -> Result<Value, PoolError>;
}

impl<F> JobExecutor for F
where
    F: Fn(&str, &Value) -> Result<Value, PoolError> + Send + Sync + 'static,
{
    fn execute(&self, kind: &str, payload: &Value) -> Result<Value, PoolError> {
        self(kind, payload)
    }
}

/// Executor for the built-in [`Job`] catalogue.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinJobs;

impl JobExecutor for BuiltinJobs {
    fn execute(&self, kind: &str, payload: &Value) -> Result<Value, PoolError> {
        let job = Job::decode(kind, payload)?;
        job.run().map(|output| output.to_value())
    }
}
