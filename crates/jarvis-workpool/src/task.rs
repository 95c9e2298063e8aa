//! Task definition and queue ordering.

use chrono::{DateTime, Utc};
use jarvis_protocols::Priority;
use serde_json::Value;
use std::cmp::Ordering;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::PoolError;

/// Per-task submission options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOptions {
    pub priority: Priority,
    /// Falls back to the pool's default timeout.
    pub timeout: Option<Duration>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One entry of a batch submitted through [`crate::WorkerPool::execute_all`].
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub kind: String,
    pub payload: Value,
    pub options: TaskOptions,
}

impl TaskRequest {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            options: TaskOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }
}

/// A task accepted by the pool.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub id: Uuid,
    /// Job kind routed to the executor.
    pub kind: String,
    pub payload: Value,
    pub priority: Priority,
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
}

impl WorkerTask {
    pub fn new(kind: impl Into<String>, payload: Value, priority: Priority, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            priority,
            timeout,
            created_at: Utc::now(),
        }
    }
}

/// Queue entry: the task plus its resolver.
pub(crate) struct QueuedTask {
    pub task: WorkerTask,
    /// Submission sequence, keeps equal priorities FIFO.
    pub seq: u64,
    pub resolver: oneshot::Sender<Result<Value, PoolError>>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier submission
        match self.task.priority.cmp(&other.task.priority) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn queued(name: &str, priority: Priority, seq: u64) -> QueuedTask {
        let (tx, _rx) = oneshot::channel();
        QueuedTask {
            task: WorkerTask::new(name, Value::Null, priority, Duration::from_secs(1)),
            seq,
            resolver: tx,
        }
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(queued("low", Priority::Low, 0));
        heap.push(queued("normal-1", Priority::Normal, 1));
        heap.push(queued("high", Priority::High, 2));
        heap.push(queued("normal-2", Priority::Normal, 3));
        heap.push(queued("normal-3", Priority::Normal, 4));

        let order: Vec<String> = std::iter::from_fn(|| heap.pop().map(|q| q.task.kind)).collect();
        assert_eq!(
            order,
            vec!["high", "normal-1", "normal-2", "normal-3", "low"]
        );
    }

    #[test]
    fn test_task_options_builder() {
        let options = TaskOptions::new()
            .with_priority(Priority::Critical)
            .with_timeout(Duration::from_millis(5));
        assert_eq!(options.priority, Priority::Critical);
        assert_eq!(options.timeout, Some(Duration::from_millis(5)));
        assert!(TaskOptions::default().timeout.is_none());
    }
}
