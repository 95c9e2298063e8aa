//! # Jarvis Workpool
//!
//! Worker pool for CPU-bound and long-running jobs.
//!
//! ## Features
//!
//! - Priority queue, FIFO within a priority
//! - Dedicated OS-thread workers talking to the pool only through channels
//! - Auto-scaling between a floor and a ceiling, idle reaping
//! - Per-task timeouts that tear down the wedged worker
//! - Built-in job catalogue (`sort`, `similarity`, `tokenize`, `fibonacci`, `sleep`, `fail`)

pub mod config;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod pool;
pub mod task;
mod worker;

pub use config::PoolConfig;
pub use error::PoolError;
pub use executor::{BuiltinJobs, JobExecutor};
pub use jobs::{Job, JobOutput, MAX_FIBONACCI, MAX_SLEEP_MS};
pub use pool::{PoolStats, WorkerPool};
pub use task::{TaskOptions, TaskRequest, WorkerTask};
