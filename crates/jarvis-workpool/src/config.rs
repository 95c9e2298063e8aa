//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Worker pool limits and timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers kept alive even when idle.
    pub min_workers: usize,
    /// Upper bound on concurrently alive workers.
    pub max_workers: usize,
    /// Timeout for tasks submitted without one.
    pub default_timeout: Duration,
    /// Idle time after which a worker above the floor is retired.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&jarvis_config::PoolConfig::default())
    }
}

impl From<&jarvis_config::PoolConfig> for PoolConfig {
    fn from(config: &jarvis_config::PoolConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
        }
    }
}

impl PoolConfig {
    pub fn with_bounds(mut self, min_workers: usize, max_workers: usize) -> Self {
        self.min_workers = min_workers;
        self.max_workers = max_workers;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub(crate) fn validate_bounds(min_workers: usize, max_workers: usize) -> Result<(), PoolError> {
        if max_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        if min_workers > max_workers {
            return Err(PoolError::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                min_workers, max_workers
            )));
        }
        Ok(())
    }
}
