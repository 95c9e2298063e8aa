//! Queued operation model.

use chrono::{DateTime, Utc};
use jarvis_protocols::Priority;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Operation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    /// Waiting for its retry time.
    Pending,
    /// An attempt is in flight.
    Processing,
    Completed,
    /// Out of retries. Only `retry_now` revives it.
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub const ALL: [OperationStatus; 5] = [
        OperationStatus::Pending,
        OperationStatus::Processing,
        OperationStatus::Completed,
        OperationStatus::Failed,
        OperationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Processing => "PROCESSING",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
            OperationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown operation status: {}", s))
    }
}

/// Enqueue options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    /// Falls back to the queue's default.
    pub max_retries: Option<u32>,
    /// Free-form caller context stored with the operation.
    pub context: Value,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// A durable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub op_type: String,
    pub payload: Value,
    /// Enqueue time.
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: Priority,
    pub status: OperationStatus,
    /// Earliest time of the next attempt.
    pub next_retry_at: DateTime<Utc>,
    #[serde(default)]
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedOperation {
    pub fn new(op_type: impl Into<String>, payload: Value, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            op_type: op_type.into(),
            payload,
            timestamp: now,
            retry_count: 0,
            max_retries,
            priority: Priority::Normal,
            status: OperationStatus::Pending,
            next_retry_at: now,
            context: Value::Null,
            last_error: None,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub(crate) fn set_status(&mut self, status: OperationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending && self.next_retry_at <= now
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Attempts currently running in this process.
    pub in_flight: usize,
    pub online: bool,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }

    pub(crate) fn add(&mut self, status: OperationStatus, count: usize) {
        match status {
            OperationStatus::Pending => self.pending += count,
            OperationStatus::Processing => self.processing += count,
            OperationStatus::Completed => self.completed += count,
            OperationStatus::Failed => self.failed += count,
            OperationStatus::Cancelled => self.cancelled += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parse() {
        assert_eq!("PENDING".parse::<OperationStatus>().unwrap(), OperationStatus::Pending);
        assert_eq!("failed".parse::<OperationStatus>().unwrap(), OperationStatus::Failed);
        assert!("paused".parse::<OperationStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&OperationStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    #[test]
    fn test_terminal() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::Processing.is_terminal());
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_operation_is_due() {
        let op = QueuedOperation::new("ai.complete", json!({ "prompt": "hi" }), 3)
            .with_priority(Priority::High);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.is_due(Utc::now()));
        assert!(!op.is_due(op.timestamp - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_stats_total() {
        let mut stats = QueueStats::default();
        stats.add(OperationStatus::Pending, 2);
        stats.add(OperationStatus::Failed, 1);
        assert_eq!(stats.total(), 3);
    }
}
