//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod schema_runtime;

pub use schema_runtime::*;

/// Shared default helper used by submodules.
pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kernel: KernelConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub resources: ResourcesConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Location of the durable queue database.
    pub fn queue_db_path(&self) -> PathBuf {
        match self.queue.db_path {
            Some(ref path) => path.clone(),
            None => self.kernel.data_dir.join("queue.db"),
        }
    }
}

/// Kernel-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Engine version advertised to plugins (`major.minor`).
    #[serde(default = "default_engine_version")]
    pub engine_version: String,

    /// Data directory for durable state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Budget for the whole shutdown sequence.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            engine_version: default_engine_version(),
            data_dir: default_data_dir(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

fn default_engine_version() -> String {
    "1.0".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".jarvis")
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum number of events retained in history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Default timeout for request/reply.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_history_limit() -> usize {
    1000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files. Defaults to `<data_dir>/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Write the file log as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Also log to stderr.
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            json: false,
            console: default_true(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
