//! Event types carried by the event bus.
//!
//! Events are immutable once constructed. Payloads are a tagged union so
//! kernel-originated events stay strongly typed while plugins and host code
//! can still publish arbitrary JSON through [`EventPayload::Custom`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plugin::PluginState;
use crate::types::Priority;

/// An event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Dot-delimited channel name (e.g. `plugin.load`).
    pub channel: String,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    /// Publisher identity (`kernel`, a plugin id, ...).
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Event {
    /// Create a new event with normal priority and `kernel` as source.
    pub fn new(channel: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            payload,
            timestamp: Utc::now(),
            priority: Priority::Normal,
            source: "kernel".to_string(),
            correlation_id: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Channel on which a reply to this event is expected, if it is a request.
    pub fn response_channel(&self) -> Option<String> {
        self.correlation_id
            .as_ref()
            .map(|id| response_channel(&self.channel, id))
    }
}

/// Channel used for replies to a request published on `channel`.
pub fn response_channel(channel: &str, correlation_id: &str) -> String {
    format!("{}:response:{}", channel, correlation_id)
}

/// Typed event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Empty,
    Plugin(PluginEvent),
    Resource(ResourceEvent),
    Queue(QueueEvent),
    Connectivity(ConnectivityEvent),
    Custom(serde_json::Value),
}

impl EventPayload {
    pub fn custom(value: serde_json::Value) -> Self {
        EventPayload::Custom(value)
    }

    /// The JSON body of a custom payload.
    pub fn as_custom(&self) -> Option<&serde_json::Value> {
        match self {
            EventPayload::Custom(v) => Some(v),
            _ => None,
        }
    }

    /// Render any payload as JSON (used when handing events to plugins).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<serde_json::Value> for EventPayload {
    fn from(value: serde_json::Value) -> Self {
        EventPayload::Custom(value)
    }
}

/// Plugin lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEvent {
    pub plugin_id: String,
    pub state: PluginState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Severity of a resource warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceLevel {
    Warning,
    Critical,
}

/// Advisory resource threshold crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub tenant_id: String,
    pub level: ResourceLevel,
    pub memory_mb: u64,
    pub max_memory_mb: u64,
}

/// Offline queue transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub operation_id: String,
    pub op_type: String,
    pub status: String,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connectivity change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityEvent {
    pub online: bool,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
