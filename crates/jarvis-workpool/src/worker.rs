//! OS-thread workers.
//!
//! A worker shares nothing with the pool except its command channel and
//! the per-task reply channel.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::PoolError;
use crate::executor::JobExecutor;

pub(crate) type WorkerReply = oneshot::Sender<Result<Value, PoolError>>;

pub(crate) enum WorkerCommand {
    Run {
        kind: String,
        payload: Value,
        reply: WorkerReply,
    },
    Shutdown,
}

/// Spawn a worker thread and return its command sender.
pub(crate) fn spawn_worker(
    id: u64,
    executor: Arc<dyn JobExecutor>,
) -> Result<Sender<WorkerCommand>, PoolError> {
    let (tx, rx) = unbounded::<WorkerCommand>();
    thread::Builder::new()
        .name(format!("jarvis-worker-{}", id))
        .spawn(move || worker_loop(id, executor, rx))
        .map_err(|e| PoolError::Execution(format!("failed to spawn worker {}: {}", id, e)))?;
    debug!("Worker {} started", id);
    Ok(tx)
}

fn worker_loop(id: u64, executor: Arc<dyn JobExecutor>, rx: Receiver<WorkerCommand>) {
    while let Ok(command) = rx.recv() {
        match command {
            WorkerCommand::Run {
                kind,
                payload,
                reply,
            } => {
                trace!("Worker {} running '{}'", id, kind);
                let result = run_job(executor.as_ref(), &kind, &payload);
                if reply.send(result).is_err() {
                    // Caller gave up (timeout or termination)
                    trace!("Worker {} result for '{}' discarded", id, kind);
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }
    debug!("Worker {} exited", id);
}

fn run_job(executor: &dyn JobExecutor, kind: &str, payload: &Value) -> Result<Value, PoolError> {
    match catch_unwind(AssertUnwindSafe(|| executor.execute(kind, payload))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("Job '{}' panicked: {}", kind, message);
            Err(PoolError::Execution(format!("job panicked: {}", message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BuiltinJobs;
    use serde_json::json;

    #[tokio::test]
    async fn test_worker_runs_and_shuts_down() {
        let tx = spawn_worker(1, Arc::new(BuiltinJobs)).unwrap();
        let (reply, rx) = oneshot::channel();
        tx.send(WorkerCommand::Run {
            kind: "fibonacci".to_string(),
            payload: json!({ "n": 10 }),
            reply,
        })
        .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), json!(55));

        tx.send(WorkerCommand::Shutdown).unwrap();
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let exec = |_: &str, _: &Value| -> Result<Value, PoolError> { panic!("kaboom") };
        let tx = spawn_worker(2, Arc::new(exec)).unwrap();

        let (reply, rx) = oneshot::channel();
        tx.send(WorkerCommand::Run {
            kind: "x".to_string(),
            payload: Value::Null,
            reply,
        })
        .unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, PoolError::Execution(ref m) if m.contains("kaboom")));

        // Worker survives the panic
        let (reply, rx) = oneshot::channel();
        tx.send(WorkerCommand::Run {
            kind: "x".to_string(),
            payload: Value::Null,
            reply,
        })
        .unwrap();
        assert!(rx.await.unwrap().is_err());
    }
}
