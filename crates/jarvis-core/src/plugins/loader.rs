//! Plugin loader.
//!
//! Owns every loaded plugin instance and drives it through
//! `UNLOADED -> INITIALIZING -> LOADED <-> ENABLED/DISABLED -> UNLOADED`.
//! Each hook runs under a timeout with the plugin's tenant accounted in the
//! resource manager, and every transition is announced on `plugin.*`.

use futures::FutureExt;
use jarvis_bus::{EventBus, PublishOptions};
use jarvis_config::PluginsConfig;
use jarvis_protocols::{
    CapabilityError, ComputeAccess, ContextBindings, EngineVersion, EventPayload, HostServices,
    Notification, Notifier, PermissionSet, Plugin, PluginContext, PluginError, PluginEvent,
    PluginFactory, PluginManifest, PluginState, Priority,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::bindings::{CapabilityRouter, PluginEvents, SubscriptionLedger};
use super::registry::CapabilityRegistry;
use crate::error::ResourceError;
use crate::resources::{ResourceManager, ResourceQuota, TaskPermit};

/// Source stamped on lifecycle events.
pub const LOADER_SOURCE: &str = "plugin-loader";

/// Timeouts and reporting policy.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub hook_timeout: Duration,
    pub capability_timeout: Duration,
    pub notify_failures: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::from(&PluginsConfig::default())
    }
}

impl From<&PluginsConfig> for LoaderSettings {
    fn from(config: &PluginsConfig) -> Self {
        Self {
            hook_timeout: Duration::from_millis(config.hook_timeout_ms.max(1)),
            capability_timeout: Duration::from_millis(config.capability_timeout_ms.max(1)),
            notify_failures: config.notify_failures,
        }
    }
}

impl LoaderSettings {
    pub fn with_hook_timeout(mut self, hook_timeout: Duration) -> Self {
        self.hook_timeout = hook_timeout;
        self
    }

    pub fn with_capability_timeout(mut self, capability_timeout: Duration) -> Self {
        self.capability_timeout = capability_timeout;
        self
    }
}

/// Collaborators the loader routes plugin calls to.
pub struct LoaderServices {
    pub bus: EventBus,
    pub resources: Arc<ResourceManager>,
    pub host: Arc<dyn HostServices>,
    pub notifier: Arc<dyn Notifier>,
    pub compute: Arc<dyn ComputeAccess>,
}

/// Summary of a loaded plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub capabilities: Vec<String>,
}

struct LoadedPlugin {
    manifest: PluginManifest,
    state: Mutex<PluginState>,
    instance: tokio::sync::Mutex<Box<dyn Plugin>>,
}

impl LoadedPlugin {
    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn state(&self) -> PluginState {
        *self.state.lock()
    }

    fn set_state(&self, state: PluginState) {
        *self.state.lock() = state;
    }
}

struct LoaderInner {
    engine: EngineVersion,
    settings: LoaderSettings,
    bus: EventBus,
    resources: Arc<ResourceManager>,
    notifier: Arc<dyn Notifier>,
    bindings: ContextBindings,
    factories: RwLock<HashMap<String, Arc<dyn PluginFactory>>>,
    plugins: RwLock<HashMap<String, Arc<LoadedPlugin>>>,
    capabilities: CapabilityRegistry,
    subscriptions: Arc<SubscriptionLedger>,
    /// Serializes load and unload.
    transitions: tokio::sync::Mutex<()>,
}

/// Non-owning loader handle held by plugin contexts.
#[derive(Clone)]
pub(crate) struct WeakLoader(Weak<LoaderInner>);

impl WeakLoader {
    pub(crate) fn upgrade(&self) -> Option<PluginLoader> {
        self.0.upgrade().map(|inner| PluginLoader { inner })
    }
}

/// Run a hook under `limit`, turning panics and overruns into errors.
async fn time_boxed<T, F>(
    plugin: &str,
    hook: &str,
    limit: Duration,
    fut: F,
) -> Result<T, PluginError>
where
    F: Future<Output = Result<T, PluginError>>,
{
    match timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(PluginError::Capability(e)))) => Err(PluginError::Capability(e)),
        Ok(Ok(Err(e))) => Err(PluginError::HookFailed {
            plugin: plugin.to_string(),
            hook: hook.to_string(),
            message: e.to_string(),
        }),
        Ok(Err(_)) => Err(PluginError::HookFailed {
            plugin: plugin.to_string(),
            hook: hook.to_string(),
            message: "hook panicked".to_string(),
        }),
        Err(_) => Err(PluginError::HookTimeout {
            plugin: plugin.to_string(),
            hook: hook.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Loads, drives and unloads plugins.
///
/// Cloning is cheap; clones share the same plugin table.
#[derive(Clone)]
pub struct PluginLoader {
    inner: Arc<LoaderInner>,
}

impl PluginLoader {
    pub fn new(engine: EngineVersion, settings: LoaderSettings, services: LoaderServices) -> Self {
        let subscriptions = Arc::new(SubscriptionLedger::new(services.bus.clone()));
        let inner = Arc::new_cyclic(|weak: &Weak<LoaderInner>| LoaderInner {
            engine,
            settings,
            bindings: ContextBindings {
                host: services.host,
                notifier: Arc::clone(&services.notifier),
                events: Arc::new(PluginEvents::new(
                    services.bus.clone(),
                    Arc::clone(&subscriptions),
                )),
                capabilities: Arc::new(CapabilityRouter::new(WeakLoader(weak.clone()))),
                compute: services.compute,
            },
            bus: services.bus,
            resources: services.resources,
            notifier: services.notifier,
            factories: RwLock::new(HashMap::new()),
            plugins: RwLock::new(HashMap::new()),
            capabilities: CapabilityRegistry::new(),
            subscriptions,
            transitions: tokio::sync::Mutex::new(()),
        });
        Self { inner }
    }

    pub fn engine_version(&self) -> EngineVersion {
        self.inner.engine
    }

    /// Register the factory that builds plugins whose manifest names `entry`.
    pub fn register_factory(&self, entry: impl Into<String>, factory: Arc<dyn PluginFactory>) {
        let entry = entry.into();
        debug!("Registered plugin factory '{}'", entry);
        self.inner.factories.write().insert(entry, factory);
    }

    pub fn has_factory(&self, entry: &str) -> bool {
        self.inner.factories.read().contains_key(entry)
    }

    /// Build the instance from the factory registered for `manifest.entry`, then load it.
    pub async fn load_entry(&self, manifest: PluginManifest) -> Result<(), PluginError> {
        manifest.validate(&self.inner.engine)?;
        let factory = self.factory(&manifest.entry)?;
        let plugin = factory.create(&manifest)?;
        self.load(manifest, plugin).await
    }

    /// Validate `manifest` and bring `plugin` to `LOADED`.
    ///
    /// An invalid manifest is rejected before anything is touched. A plugin
    /// already loaded under the same id is fully unloaded first. A failing
    /// or overrunning `initialize` aborts the load and releases everything
    /// the attempt acquired.
    ///
    /// Lifecycle events are published once the transition has finished, so
    /// subscribers may call back into the loader.
    pub async fn load(&self, manifest: PluginManifest, plugin: Box<dyn Plugin>) -> Result<(), PluginError> {
        let permissions = manifest.validate(&self.inner.engine).inspect_err(|e| {
            warn!("Rejected manifest for '{}': {}", manifest.id, e);
        })?;

        let mut pending = Vec::new();
        let result = {
            let _transition = self.inner.transitions.lock().await;
            self.load_locked(manifest, permissions, plugin, &mut pending)
                .await
        };
        self.publish_all(pending).await;
        result
    }

    async fn load_locked(
        &self,
        manifest: PluginManifest,
        permissions: PermissionSet,
        plugin: Box<dyn Plugin>,
        pending: &mut Vec<Announcement>,
    ) -> Result<(), PluginError> {
        let id = manifest.id.clone();
        if self.lookup(&id).is_some() {
            info!("Reloading plugin {}", id);
            self.unload_locked(&id, pending).await;
        }

        let quota = match manifest.quota {
            Some(ref spec) => ResourceQuota::from_spec(&id, spec, self.inner.resources.defaults()),
            None => self.inner.resources.default_quota(&id),
        };
        self.inner
            .resources
            .set_quota(quota)
            .map_err(|e| PluginError::InvalidManifest(e.to_string()))?;

        let context = PluginContext::new(
            id.clone(),
            permissions,
            self.inner.engine,
            manifest.config.clone(),
            self.inner.bindings.clone(),
        );
        let loaded = Arc::new(LoadedPlugin {
            manifest,
            state: Mutex::new(PluginState::Initializing),
            instance: tokio::sync::Mutex::new(plugin),
        });
        self.inner.plugins.write().insert(id.clone(), Arc::clone(&loaded));
        pending.push(Announcement::new(
            "plugin.initializing",
            &loaded,
            PluginState::Initializing,
            None,
        ));

        let result = match self.initialize(&loaded, context).await {
            Ok(()) => self.register_declared(&loaded),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!("Failed to load plugin {}: {}", id, e);
            self.abort_load(&loaded).await;
            pending.push(self.failure(&loaded, PluginState::Unloaded, &e));
            return Err(e);
        }

        loaded.set_state(PluginState::Loaded);
        info!(
            "Loaded plugin: {} v{}",
            loaded.manifest.name, loaded.manifest.version
        );
        pending.push(Announcement::new(
            "plugin.load",
            &loaded,
            PluginState::Loaded,
            None,
        ));
        Ok(())
    }

    /// `LOADED`/`DISABLED` -> `ENABLED`.
    pub async fn start(&self, id: &str) -> Result<(), PluginError> {
        let loaded = self.get(id)?;
        let mut instance = loaded.instance.lock().await;
        let state = loaded.state();
        if !state.can_start() {
            return Err(invalid_transition(id, "start", state));
        }
        let _permit = self.admit(id)?;

        let result = time_boxed(id, "start", self.inner.settings.hook_timeout, instance.start()).await;
        drop(instance);
        match result {
            Ok(()) => {
                loaded.set_state(PluginState::Enabled);
                info!("Started plugin {}", id);
                self.publish(Announcement::new(
                    "plugin.start",
                    &loaded,
                    PluginState::Enabled,
                    None,
                ))
                .await;
                Ok(())
            }
            Err(e) => {
                self.publish(self.failure(&loaded, state, &e)).await;
                Err(e)
            }
        }
    }

    /// `ENABLED` -> `DISABLED`.
    pub async fn stop(&self, id: &str) -> Result<(), PluginError> {
        let loaded = self.get(id)?;
        let mut instance = loaded.instance.lock().await;
        let state = loaded.state();
        if !state.can_stop() {
            return Err(invalid_transition(id, "stop", state));
        }
        let _permit = self.admit(id)?;

        let result = time_boxed(id, "stop", self.inner.settings.hook_timeout, instance.stop()).await;
        drop(instance);
        match result {
            Ok(()) => {
                loaded.set_state(PluginState::Disabled);
                info!("Stopped plugin {}", id);
                self.publish(Announcement::new(
                    "plugin.stop",
                    &loaded,
                    PluginState::Disabled,
                    None,
                ))
                .await;
                Ok(())
            }
            Err(e) => {
                self.publish(self.failure(&loaded, state, &e)).await;
                Err(e)
            }
        }
    }

    /// Tear a plugin down and release its quota, capabilities and subscriptions.
    ///
    /// `stop` (when enabled) and `destroy` are attempted; their failures are
    /// logged and do not prevent the unload.
    pub async fn unload(&self, id: &str) -> Result<(), PluginError> {
        let mut pending = Vec::new();
        {
            let _transition = self.inner.transitions.lock().await;
            if self.lookup(id).is_none() {
                return Err(PluginError::NotFound(id.to_string()));
            }
            self.unload_locked(id, &mut pending).await;
        }
        self.publish_all(pending).await;
        Ok(())
    }

    /// Unload every plugin. Returns how many were unloaded.
    pub async fn unload_all(&self) -> usize {
        let mut pending = Vec::new();
        {
            let _transition = self.inner.transitions.lock().await;
            let mut ids: Vec<String> = self.inner.plugins.read().keys().cloned().collect();
            ids.sort();
            for id in &ids {
                self.unload_locked(id, &mut pending).await;
            }
        }
        let count = pending.len();
        self.publish_all(pending).await;
        count
    }

    /// Deliver a direct message to an enabled plugin.
    pub async fn send_message(&self, id: &str, message: Value) -> Result<Option<Value>, PluginError> {
        let loaded = self.get(id)?;
        let mut instance = loaded.instance.lock().await;
        let state = loaded.state();
        if state != PluginState::Enabled {
            return Err(invalid_transition(id, "receive messages", state));
        }
        let _permit = self.admit(id)?;
        time_boxed(
            id,
            "on_message",
            self.inner.settings.hook_timeout,
            instance.on_message(message),
        )
        .await
    }

    /// Invoke a registered capability on behalf of the host.
    pub async fn invoke_capability(&self, name: &str, args: Value) -> Result<Value, PluginError> {
        self.dispatch_capability(None, name, args).await
    }

    /// Invoke a capability on behalf of another plugin.
    pub async fn invoke_capability_as(
        &self,
        caller: &str,
        name: &str,
        args: Value,
    ) -> Result<Value, PluginError> {
        self.dispatch_capability(Some(caller), name, args).await
    }

    /// Export a capability served by `owner`.
    pub fn register_capability(&self, owner: &str, name: &str, handler: &str) -> Result<(), CapabilityError> {
        if self.lookup(owner).is_none() {
            return Err(CapabilityError::Unavailable(format!(
                "plugin {} is not loaded",
                owner
            )));
        }
        self.inner.capabilities.register(owner, name, handler)?;
        debug!("Plugin {} exported capability {}", owner, name);
        Ok(())
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.inner.capabilities.names()
    }

    pub fn state(&self, id: &str) -> PluginState {
        self.lookup(id)
            .map(|p| p.state())
            .unwrap_or(PluginState::Unloaded)
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    pub fn manifest(&self, id: &str) -> Option<PluginManifest> {
        self.lookup(id).map(|p| p.manifest.clone())
    }

    /// Loaded plugins, sorted by id.
    pub fn list(&self) -> Vec<PluginInfo> {
        let plugins: Vec<Arc<LoadedPlugin>> = self.inner.plugins.read().values().cloned().collect();
        let mut infos: Vec<PluginInfo> = plugins
            .iter()
            .map(|p| PluginInfo {
                id: p.id().to_string(),
                name: p.manifest.name.clone(),
                version: p.manifest.version.clone(),
                state: p.state(),
                capabilities: self.inner.capabilities.owned_by(p.id()),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Event subscriptions currently held by a plugin.
    pub fn subscription_count(&self, id: &str) -> usize {
        self.inner.subscriptions.count(id)
    }

    fn lookup(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        self.inner.plugins.read().get(id).cloned()
    }

    fn get(&self, id: &str) -> Result<Arc<LoadedPlugin>, PluginError> {
        self.lookup(id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    fn factory(&self, entry: &str) -> Result<Arc<dyn PluginFactory>, PluginError> {
        self.inner
            .factories
            .read()
            .get(entry)
            .cloned()
            .ok_or_else(|| PluginError::UnknownEntry(entry.to_string()))
    }

    fn admit(&self, id: &str) -> Result<TaskPermit, PluginError> {
        self.inner.resources.acquire(id).map_err(|e| {
            let reason = match e {
                ResourceError::Admission { reason, .. } => reason.to_string(),
                other => other.to_string(),
            };
            PluginError::AdmissionDenied {
                plugin: id.to_string(),
                reason,
            }
        })
    }

    async fn initialize(&self, loaded: &LoadedPlugin, context: PluginContext) -> Result<(), PluginError> {
        let _permit = self.admit(loaded.id())?;
        let mut instance = loaded.instance.lock().await;
        time_boxed(
            loaded.id(),
            "initialize",
            self.inner.settings.hook_timeout,
            instance.initialize(context),
        )
        .await
    }

    fn register_declared(&self, loaded: &LoadedPlugin) -> Result<(), PluginError> {
        for cap in &loaded.manifest.capabilities {
            self.inner
                .capabilities
                .register(loaded.id(), &cap.name, &cap.handler)?;
        }
        Ok(())
    }

    /// Best-effort destroy after a failed load, then release everything.
    async fn abort_load(&self, loaded: &LoadedPlugin) {
        let id = loaded.id();
        {
            let mut instance = loaded.instance.lock().await;
            if let Err(e) =
                time_boxed(id, "destroy", self.inner.settings.hook_timeout, instance.destroy()).await
            {
                warn!("Destroy after failed load of {} failed: {}", id, e);
            }
            loaded.set_state(PluginState::Unloaded);
        }
        self.inner.plugins.write().remove(id);
        self.release(id);
    }

    async fn unload_locked(&self, id: &str, pending: &mut Vec<Announcement>) {
        let removed = self.inner.plugins.write().remove(id);
        let Some(loaded) = removed else {
            return;
        };
        {
            let mut instance = loaded.instance.lock().await;
            let limit = self.inner.settings.hook_timeout;
            if loaded.state() == PluginState::Enabled {
                if let Err(e) = time_boxed(id, "stop", limit, instance.stop()).await {
                    warn!("Stop during unload of {} failed: {}", id, e);
                }
            }
            if let Err(e) = time_boxed(id, "destroy", limit, instance.destroy()).await {
                warn!("Destroy of {} failed: {}", id, e);
            }
            loaded.set_state(PluginState::Unloaded);
        }
        self.release(id);
        info!("Unloaded plugin {}", id);
        pending.push(Announcement::new(
            "plugin.unload",
            &loaded,
            PluginState::Unloaded,
            None,
        ));
    }

    fn release(&self, id: &str) {
        let capabilities = self.inner.capabilities.remove_owner(id);
        let subscriptions = self.inner.subscriptions.drop_owner(id);
        self.inner.resources.remove_tenant(id);
        debug!(plugin = id, capabilities, subscriptions, "Released plugin resources");
    }

    async fn dispatch_capability(
        &self,
        caller: Option<&str>,
        name: &str,
        args: Value,
    ) -> Result<Value, PluginError> {
        let entry = self
            .inner
            .capabilities
            .get(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        if caller == Some(entry.owner.as_str()) {
            return Err(CapabilityError::InvalidArguments(format!(
                "plugin {} cannot invoke its own capability '{}'",
                entry.owner, name
            ))
            .into());
        }
        let loaded = self
            .lookup(&entry.owner)
            .ok_or_else(|| CapabilityError::Unavailable(name.to_string()))?;

        let mut instance = loaded.instance.lock().await;
        let state = loaded.state();
        if state != PluginState::Enabled {
            return Err(CapabilityError::Unavailable(format!(
                "{} (plugin {} is {})",
                name, entry.owner, state
            ))
            .into());
        }
        let _permit = self.admit(&entry.owner)?;
        debug!(capability = name, owner = %entry.owner, caller = ?caller, "Invoking capability");
        time_boxed(
            &entry.owner,
            "handle_capability",
            self.inner.settings.capability_timeout,
            instance.handle_capability(&entry.handler, args),
        )
        .await
    }

    /// Notify the host of a failure and build the matching `plugin.error`.
    fn failure(&self, loaded: &LoadedPlugin, state: PluginState, e: &PluginError) -> Announcement {
        if self.inner.settings.notify_failures {
            self.inner.notifier.notify(
                Notification::error(format!("Plugin {} failed", loaded.manifest.name), e.to_string())
                    .with_source(loaded.id()),
            );
        }
        Announcement::new("plugin.error", loaded, state, Some(e.to_string()))
    }

    async fn publish_all(&self, pending: Vec<Announcement>) {
        for announcement in pending {
            self.publish(announcement).await;
        }
    }

    async fn publish(&self, announcement: Announcement) {
        let Announcement {
            channel,
            priority,
            event,
        } = announcement;
        let options = PublishOptions::new()
            .with_priority(priority)
            .with_source(LOADER_SOURCE);
        if let Err(e) = self
            .inner
            .bus
            .publish(channel, EventPayload::Plugin(event), options)
            .await
        {
            warn!("Failed to publish {}: {}", channel, e);
        }
    }
}

/// A lifecycle event waiting to be published.
struct Announcement {
    channel: &'static str,
    priority: Priority,
    event: PluginEvent,
}

impl Announcement {
    fn new(
        channel: &'static str,
        loaded: &LoadedPlugin,
        state: PluginState,
        error: Option<String>,
    ) -> Self {
        let priority = if error.is_some() {
            Priority::High
        } else {
            Priority::Normal
        };
        Self {
            channel,
            priority,
            event: PluginEvent {
                plugin_id: loaded.id().to_string(),
                state,
                version: Some(loaded.manifest.version.clone()),
                error,
            },
        }
    }
}

fn invalid_transition(id: &str, action: &str, state: PluginState) -> PluginError {
    PluginError::InvalidTransition {
        plugin: id.to_string(),
        action: action.to_string(),
        state: state.to_string(),
    }
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
