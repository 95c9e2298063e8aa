//! Capability-scoped plugin context.
//!
//! A [`PluginContext`] is the only handle a plugin receives. Every method on
//! its namespaces checks the plugin's granted permissions before touching
//! any collaborator, so an ungranted call fails with
//! [`CapabilityError::PermissionDenied`] without reaching the host.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use super::{CapabilityDomain, PermissionSet};
use crate::error::CapabilityError;
use crate::host::{
    CapabilityAccess, ComputeAccess, EventAccess, HostRequest, HostServices, Notification,
    NotificationLevel, Notifier, PluginEventHandler,
};
use crate::types::EngineVersion;

/// Collaborators a context routes calls to. Built once by the kernel and
/// shared by every plugin context.
#[derive(Clone)]
pub struct ContextBindings {
    pub host: Arc<dyn HostServices>,
    pub notifier: Arc<dyn Notifier>,
    pub events: Arc<dyn EventAccess>,
    pub capabilities: Arc<dyn CapabilityAccess>,
    pub compute: Arc<dyn ComputeAccess>,
}

struct ContextInner {
    plugin_id: String,
    permissions: PermissionSet,
    engine: EngineVersion,
    config: Value,
    bindings: ContextBindings,
}

/// Context passed to a plugin at initialization.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<String>,
        permissions: PermissionSet,
        engine: EngineVersion,
        config: Value,
        bindings: ContextBindings,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                plugin_id: plugin_id.into(),
                permissions,
                engine,
                config,
                bindings,
            }),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.inner.plugin_id
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.inner.permissions
    }

    pub fn engine_version(&self) -> EngineVersion {
        self.inner.engine
    }

    /// Plugin configuration from the manifest.
    pub fn config(&self) -> &Value {
        &self.inner.config
    }

    /// Get a configuration value.
    pub fn get_config<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner
            .config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn has_permission(&self, domain: CapabilityDomain, action: &str) -> bool {
        self.inner.permissions.allows(domain, action)
    }

    fn check(&self, domain: CapabilityDomain, action: &str) -> Result<(), CapabilityError> {
        if self.has_permission(domain, action) {
            Ok(())
        } else {
            Err(CapabilityError::PermissionDenied {
                plugin: self.inner.plugin_id.clone(),
                permission: format!("{}:{}", domain, action),
            })
        }
    }

    async fn host_call(
        &self,
        domain: CapabilityDomain,
        permission: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, CapabilityError> {
        self.check(domain, permission)?;
        let request = HostRequest::new(self.inner.plugin_id.clone(), domain, method, args);
        self.inner.bindings.host.call(request).await
    }

    pub fn ai(&self) -> AiApi<'_> {
        AiApi { ctx: self }
    }

    pub fn memory(&self) -> MemoryApi<'_> {
        MemoryApi { ctx: self }
    }

    pub fn storage(&self) -> StorageApi<'_> {
        StorageApi { ctx: self }
    }

    pub fn ui(&self) -> UiApi<'_> {
        UiApi { ctx: self }
    }

    pub fn system(&self) -> SystemApi<'_> {
        SystemApi { ctx: self }
    }

    pub fn events(&self) -> EventsApi<'_> {
        EventsApi { ctx: self }
    }

    pub fn capabilities(&self) -> CapabilitiesApi<'_> {
        CapabilitiesApi { ctx: self }
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.inner.plugin_id)
            .field("permissions", &self.inner.permissions.len())
            .field("engine", &self.inner.engine)
            .finish()
    }
}

/// `ai` namespace.
pub struct AiApi<'a> {
    ctx: &'a PluginContext,
}

impl AiApi<'_> {
    pub async fn complete(&self, prompt: &str, options: Value) -> Result<Value, CapabilityError> {
        self.ctx
            .host_call(
                CapabilityDomain::Ai,
                "complete",
                "complete",
                json!({ "prompt": prompt, "options": options }),
            )
            .await
    }

    pub async fn embed(&self, text: &str) -> Result<Value, CapabilityError> {
        self.ctx
            .host_call(CapabilityDomain::Ai, "embed", "embed", json!({ "text": text }))
            .await
    }
}

/// `memory` namespace.
pub struct MemoryApi<'a> {
    ctx: &'a PluginContext,
}

impl MemoryApi<'_> {
    pub async fn recall(&self, query: &str, limit: usize) -> Result<Value, CapabilityError> {
        self.ctx
            .host_call(
                CapabilityDomain::Memory,
                "read",
                "recall",
                json!({ "query": query, "limit": limit }),
            )
            .await
    }

    pub async fn remember(&self, content: &str, metadata: Value) -> Result<Value, CapabilityError> {
        self.ctx
            .host_call(
                CapabilityDomain::Memory,
                "write",
                "remember",
                json!({ "content": content, "metadata": metadata }),
            )
            .await
    }
}

/// `storage` namespace. Keys are scoped to the calling plugin by the host.
pub struct StorageApi<'a> {
    ctx: &'a PluginContext,
}

impl StorageApi<'_> {
    pub async fn get(&self, key: &str) -> Result<Value, CapabilityError> {
        self.ctx
            .host_call(CapabilityDomain::Storage, "read", "get", json!({ "key": key }))
            .await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<(), CapabilityError> {
        self.ctx
            .host_call(
                CapabilityDomain::Storage,
                "write",
                "set",
                json!({ "key": key, "value": value }),
            )
            .await
            .map(|_| ())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CapabilityError> {
        self.ctx
            .host_call(CapabilityDomain::Storage, "write", "delete", json!({ "key": key }))
            .await
            .map(|_| ())
    }
}

/// `ui` namespace.
pub struct UiApi<'a> {
    ctx: &'a PluginContext,
}

impl UiApi<'_> {
    /// Fire-and-forget notification through the host notifier.
    pub async fn notify(
        &self,
        level: NotificationLevel,
        title: &str,
        message: &str,
    ) -> Result<(), CapabilityError> {
        self.ctx.check(CapabilityDomain::Ui, "notify")?;
        self.ctx.inner.bindings.notifier.notify(
            Notification::new(level, title, message).with_source(self.ctx.plugin_id()),
        );
        Ok(())
    }

    pub async fn show(&self, component: &str, props: Value) -> Result<Value, CapabilityError> {
        self.ctx
            .host_call(
                CapabilityDomain::Ui,
                "render",
                "show",
                json!({ "component": component, "props": props }),
            )
            .await
    }
}

/// `system` namespace.
pub struct SystemApi<'a> {
    ctx: &'a PluginContext,
}

impl SystemApi<'_> {
    /// Engine and plugin identity. Answered locally.
    pub async fn info(&self) -> Result<Value, CapabilityError> {
        self.ctx.check(CapabilityDomain::System, "info")?;
        let permissions: Vec<String> = self
            .ctx
            .permissions()
            .iter()
            .map(|p| p.to_string())
            .collect();
        Ok(json!({
            "plugin_id": self.ctx.plugin_id(),
            "engine": self.ctx.engine_version().to_string(),
            "permissions": permissions,
        }))
    }

    /// Run a job on the worker pool.
    pub async fn compute(&self, kind: &str, payload: Value) -> Result<Value, CapabilityError> {
        self.ctx.check(CapabilityDomain::System, "compute")?;
        self.ctx
            .inner
            .bindings
            .compute
            .compute(self.ctx.plugin_id(), kind, payload)
            .await
    }
}

/// `events` namespace.
pub struct EventsApi<'a> {
    ctx: &'a PluginContext,
}

impl EventsApi<'_> {
    pub async fn publish(&self, channel: &str, payload: Value) -> Result<(), CapabilityError> {
        self.ctx.check(CapabilityDomain::Events, "publish")?;
        self.ctx
            .inner
            .bindings
            .events
            .publish(self.ctx.plugin_id(), channel, payload)
            .await
    }

    pub fn subscribe(
        &self,
        pattern: &str,
        handler: PluginEventHandler,
    ) -> Result<Uuid, CapabilityError> {
        self.ctx.check(CapabilityDomain::Events, "subscribe")?;
        self.ctx
            .inner
            .bindings
            .events
            .subscribe(self.ctx.plugin_id(), pattern, handler)
    }

    pub fn unsubscribe(&self, id: Uuid) -> Result<bool, CapabilityError> {
        self.ctx.check(CapabilityDomain::Events, "subscribe")?;
        Ok(self
            .ctx
            .inner
            .bindings
            .events
            .unsubscribe(self.ctx.plugin_id(), id))
    }
}

/// `capabilities` namespace.
pub struct CapabilitiesApi<'a> {
    ctx: &'a PluginContext,
}

impl CapabilitiesApi<'_> {
    /// Export a capability served by this plugin's `handle_capability`.
    pub fn register(&self, name: &str, handler: &str) -> Result<(), CapabilityError> {
        self.ctx.check(CapabilityDomain::Capabilities, "register")?;
        self.ctx
            .inner
            .bindings
            .capabilities
            .register(self.ctx.plugin_id(), name, handler)
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, CapabilityError> {
        self.ctx.check(CapabilityDomain::Capabilities, "invoke")?;
        self.ctx
            .inner
            .bindings
            .capabilities
            .invoke(self.ctx.plugin_id(), name, args)
            .await
    }

    pub fn list(&self) -> Result<Vec<String>, CapabilityError> {
        self.ctx.check(CapabilityDomain::Capabilities, "list")?;
        Ok(self.ctx.inner.bindings.capabilities.list())
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
