//! Queue runtime settings.

use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Runtime settings derived from the `[queue]` config section.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Interval between background dispatch passes.
    pub dispatch_interval: Duration,
    /// Attempts allowed in flight at once.
    pub max_concurrency: usize,
    pub default_max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&jarvis_config::QueueConfig::default())
    }
}

impl From<&jarvis_config::QueueConfig> for QueueSettings {
    fn from(config: &jarvis_config::QueueConfig) -> Self {
        Self {
            dispatch_interval: Duration::from_millis(config.dispatch_interval_ms),
            max_concurrency: config.max_concurrency.max(1),
            default_max_retries: config.default_max_retries,
            backoff: BackoffPolicy::from(config),
        }
    }
}

impl QueueSettings {
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }
}
