//! Subscription and publish options, bus statistics.

use jarvis_protocols::Priority;
use serde::{Deserialize, Serialize};

/// Options for [`crate::EventBus::subscribe`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    pub priority: Priority,
    /// Remove the subscription after its first delivery.
    pub once: bool,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn once() -> Self {
        Self {
            once: true,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Options for [`crate::EventBus::publish`].
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: Priority,
    /// Defaults to `kernel`.
    pub source: Option<String>,
    pub correlation_id: Option<String>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    /// Successful handler invocations.
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
    pub subscriptions: usize,
    pub history_len: usize,
}
