//! # Jarvis Offline
//!
//! Durable, priority-aware retry queue for operations that need
//! connectivity.
//!
//! ## Features
//!
//! - Every enqueue and transition is persisted before it takes effect
//! - Exponential backoff with jitter, terminal `FAILED` after `max_retries`
//! - Connectivity tracking: network-bound operations wait while offline
//! - Memory and SQLite stores
//! - Transitions announced on the event bus (`queue.*`, `connectivity.*`)

pub mod backoff;
pub mod classify;
pub mod config;
pub mod error;
pub mod handler;
pub mod operation;
pub mod queue;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use backoff::BackoffPolicy;
pub use classify::NetworkClassifier;
pub use config::QueueSettings;
pub use error::QueueError;
pub use handler::{OperationHandler, operation_fn};
pub use operation::{EnqueueOptions, OperationStatus, QueueStats, QueuedOperation};
pub use queue::OfflineQueue;
pub use sqlite::SqliteOperationStore;
pub use store::{MemoryOperationStore, OperationStore};
