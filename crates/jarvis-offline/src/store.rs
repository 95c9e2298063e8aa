//! Durable operation stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::QueueError;
use crate::operation::{OperationStatus, QueuedOperation};

/// Operation persistence.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Persist a new operation. Fails if the id already exists.
    async fn insert(&self, operation: &QueuedOperation) -> Result<(), QueueError>;

    /// Overwrite an existing operation.
    async fn update(&self, operation: &QueuedOperation) -> Result<(), QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>, QueueError>;

    /// Operations with `status`, or all of them, oldest first.
    async fn list(&self, status: Option<OperationStatus>) -> Result<Vec<QueuedOperation>, QueueError>;

    /// Pending operations whose retry time has passed, by priority then age.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedOperation>, QueueError>;

    /// Move every `PROCESSING` operation back to `PENDING`.
    async fn reset_processing(&self) -> Result<usize, QueueError>;

    /// Delete terminal operations last updated before `before`.
    async fn delete_terminal(&self, before: DateTime<Utc>) -> Result<usize, QueueError>;

    async fn counts(&self) -> Result<HashMap<OperationStatus, usize>, QueueError>;
}

/// In-memory store, lost on restart.
#[derive(Default)]
pub struct MemoryOperationStore {
    // seq keeps insertion order for equal timestamps
    operations: RwLock<HashMap<Uuid, (u64, QueuedOperation)>>,
    next_seq: AtomicU64,
}

impl MemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted<F>(&self, filter: F) -> Vec<(u64, QueuedOperation)>
    where
        F: Fn(&QueuedOperation) -> bool,
    {
        let mut ops: Vec<_> = self
            .operations
            .read()
            .values()
            .filter(|(_, op)| filter(op))
            .cloned()
            .collect();
        ops.sort_by(|(sa, a), (sb, b)| a.timestamp.cmp(&b.timestamp).then(sa.cmp(sb)));
        ops
    }
}

#[async_trait]
impl OperationStore for MemoryOperationStore {
    async fn insert(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        let mut ops = self.operations.write();
        if ops.contains_key(&operation.id) {
            return Err(QueueError::Store(format!(
                "operation {} already exists",
                operation.id
            )));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        ops.insert(operation.id, (seq, operation.clone()));
        Ok(())
    }

    async fn update(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        match self.operations.write().get_mut(&operation.id) {
            Some((_, existing)) => {
                *existing = operation.clone();
                Ok(())
            }
            None => Err(QueueError::NotFound(operation.id.to_string())),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>, QueueError> {
        Ok(self.operations.read().get(&id).map(|(_, op)| op.clone()))
    }

    async fn list(&self, status: Option<OperationStatus>) -> Result<Vec<QueuedOperation>, QueueError> {
        Ok(self
            .sorted(|op| status.is_none_or(|s| op.status == s))
            .into_iter()
            .map(|(_, op)| op)
            .collect())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedOperation>, QueueError> {
        let mut due = self.sorted(|op| op.is_due(now));
        // stable sort keeps age order inside a priority
        due.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority));
        Ok(due.into_iter().map(|(_, op)| op).collect())
    }

    async fn reset_processing(&self) -> Result<usize, QueueError> {
        let mut count = 0;
        for (_, op) in self.operations.write().values_mut() {
            if op.status == OperationStatus::Processing {
                op.set_status(OperationStatus::Pending);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_terminal(&self, before: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut ops = self.operations.write();
        let len = ops.len();
        ops.retain(|_, (_, op)| !(op.status.is_terminal() && op.updated_at < before));
        Ok(len - ops.len())
    }

    async fn counts(&self) -> Result<HashMap<OperationStatus, usize>, QueueError> {
        let mut counts = HashMap::new();
        for (_, op) in self.operations.read().values() {
            *counts.entry(op.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
