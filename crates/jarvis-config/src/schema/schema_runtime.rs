//! Runtime component configuration (resources, pool, plugins, offline queue).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::default_true;

/// Resource manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Sliding window for request-rate accounting.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Fraction of `max_memory_mb` that raises a warning event.
    #[serde(default = "default_memory_warning_ratio")]
    pub memory_warning_ratio: f64,

    /// Fraction of `max_memory_mb` that raises a critical event.
    #[serde(default = "default_memory_critical_ratio")]
    pub memory_critical_ratio: f64,

    /// Quota assigned to plugins that do not request one.
    #[serde(default)]
    pub default_quota: QuotaConfig,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            memory_warning_ratio: default_memory_warning_ratio(),
            memory_critical_ratio: default_memory_critical_ratio(),
            default_quota: QuotaConfig::default(),
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_memory_warning_ratio() -> f64 {
    0.75
}

fn default_memory_critical_ratio() -> f64 {
    0.90
}

/// Per-tenant limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: u32,

    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,

    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_requests_per_minute: default_max_requests_per_minute(),
        }
    }
}

fn default_max_memory_mb() -> u64 {
    100
}

fn default_max_cpu_percent() -> u32 {
    25
}

fn default_max_concurrent_tasks() -> u32 {
    5
}

fn default_max_requests_per_minute() -> u32 {
    60
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Floor of execution contexts kept alive.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Ceiling of execution contexts.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Timeout applied to tasks that do not set one.
    #[serde(default = "default_task_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Idle time after which a context above the floor is retired.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            default_timeout_ms: default_task_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    4
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

/// Plugin loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Bound on every lifecycle hook invocation.
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,

    /// Bound on cross-plugin capability invocations.
    #[serde(default = "default_capability_timeout_ms")]
    pub capability_timeout_ms: u64,

    /// Report plugin failures to the host notifier.
    #[serde(default = "default_true")]
    pub notify_failures: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            hook_timeout_ms: default_hook_timeout_ms(),
            capability_timeout_ms: default_capability_timeout_ms(),
            notify_failures: default_true(),
        }
    }
}

fn default_hook_timeout_ms() -> u64 {
    5_000
}

fn default_capability_timeout_ms() -> u64 {
    10_000
}

/// Offline queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Whether the queue is backed by SQLite. Falls back to memory otherwise.
    #[serde(default = "default_true")]
    pub persistent: bool,

    /// Database path. Defaults to `<data_dir>/queue.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// Interval between dispatch passes.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Maximum operations processed at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retries before an operation is marked failed.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Backoff base delay.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Relative jitter applied to each delay (0.3 = ±30%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            persistent: default_true(),
            db_path: None,
            dispatch_interval_ms: default_dispatch_interval_ms(),
            max_concurrency: default_max_concurrency(),
            default_max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_dispatch_interval_ms() -> u64 {
    5_000
}

fn default_max_concurrency() -> usize {
    3
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_jitter() -> f64 {
    0.3
}
