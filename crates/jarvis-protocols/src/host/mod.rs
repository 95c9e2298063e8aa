//! Collaborator interfaces between plugins, the kernel and the host shell.
//!
//! The kernel never talks to model or home-automation APIs itself. Those
//! calls go through [`HostServices`], which the embedding application
//! provides. The remaining traits are implemented by the kernel and exposed
//! to plugins only through [`crate::PluginContext`].

mod notifier;

pub use notifier::*;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CapabilityError;
use crate::event::Event;
use crate::plugin::CapabilityDomain;

/// A call from a plugin to the host capability layer.
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub plugin_id: String,
    pub domain: CapabilityDomain,
    pub action: String,
    pub args: Value,
}

impl HostRequest {
    pub fn new(
        plugin_id: impl Into<String>,
        domain: CapabilityDomain,
        action: impl Into<String>,
        args: Value,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            domain,
            action: action.into(),
            args,
        }
    }

    /// Dotted method name, e.g. `ai.complete`.
    pub fn method(&self) -> String {
        format!("{}.{}", self.domain, self.action)
    }
}

/// Network/capability layer provided by the host shell.
#[async_trait]
pub trait HostServices: Send + Sync {
    async fn call(&self, request: HostRequest) -> Result<Value, CapabilityError>;
}

/// Host that serves nothing. Used when the kernel runs headless.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

#[async_trait]
impl HostServices for NullHost {
    async fn call(&self, request: HostRequest) -> Result<Value, CapabilityError> {
        Err(CapabilityError::Unavailable(request.method()))
    }
}

/// Handler for events delivered to a plugin subscription.
pub type PluginEventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Event bus access on behalf of a plugin.
#[async_trait]
pub trait EventAccess: Send + Sync {
    async fn publish(&self, source: &str, channel: &str, payload: Value)
    -> Result<(), CapabilityError>;

    /// Subscribe on behalf of `owner`. The subscription is dropped when the owner unloads.
    fn subscribe(
        &self,
        owner: &str,
        pattern: &str,
        handler: PluginEventHandler,
    ) -> Result<Uuid, CapabilityError>;

    fn unsubscribe(&self, owner: &str, id: Uuid) -> bool;
}

/// Cross-plugin capability registry access.
#[async_trait]
pub trait CapabilityAccess: Send + Sync {
    fn register(&self, owner: &str, name: &str, handler: &str) -> Result<(), CapabilityError>;

    async fn invoke(&self, caller: &str, name: &str, args: Value) -> Result<Value, CapabilityError>;

    fn list(&self) -> Vec<String>;
}

/// Worker-routed computation.
#[async_trait]
pub trait ComputeAccess: Send + Sync {
    async fn compute(&self, caller: &str, kind: &str, payload: Value)
    -> Result<Value, CapabilityError>;
}
