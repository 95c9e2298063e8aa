//! Kernel assembly.
//!
//! [`Kernel`] builds exactly one instance of each runtime component from a
//! [`Config`] and wires them together. Nothing is global; embedders reach
//! components through the accessors.

use std::sync::Arc;
use std::time::Duration;

use jarvis_bus::{EventBus, PublishOptions};
use jarvis_config::Config;
use jarvis_offline::{EnqueueOptions, OfflineQueue, OperationHandler, QueueError, QueuedOperation};
use jarvis_protocols::{
    CapabilityDomain, CapabilityError, EngineVersion, EventPayload, HostRequest, HostServices,
    LogNotifier, Notifier, NullHost,
};
use jarvis_workpool::{PoolConfig, WorkerPool};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::KernelError;
use crate::lifecycle::{
    KernelState, LifecycleHook, LifecycleManager, PluginsLifecycleHook, PoolLifecycleHook,
    QueueLifecycleHook, ShutdownSignal,
};
use crate::plugins::{LoaderServices, LoaderSettings, PluginLoader, PoolCompute};
use crate::resources::ResourceManager;

/// Offline operation type replaying a failed host call.
pub const HOST_CALL_OPERATION: &str = "host.call";

/// Source stamped on kernel events.
pub const KERNEL_SOURCE: &str = "kernel";

/// Collaborators supplied by the embedding shell.
#[derive(Clone)]
pub struct KernelServices {
    pub host: Arc<dyn HostServices>,
    pub notifier: Arc<dyn Notifier>,
}

impl KernelServices {
    pub fn new(host: Arc<dyn HostServices>, notifier: Arc<dyn Notifier>) -> Self {
        Self { host, notifier }
    }
}

impl Default for KernelServices {
    fn default() -> Self {
        Self::new(Arc::new(NullHost), Arc::new(LogNotifier))
    }
}

/// Queue payload for a deferred host call.
fn host_call_payload(request: &HostRequest) -> Value {
    json!({
        "plugin_id": request.plugin_id,
        "domain": request.domain.as_str(),
        "action": request.action,
        "args": request.args,
    })
}

fn str_field<'a>(payload: &'a Value, name: &str) -> Result<&'a str, QueueError> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| QueueError::handler(format!("host.call payload missing '{}'", name)))
}

fn host_call_request(payload: &Value) -> Result<HostRequest, QueueError> {
    let domain: CapabilityDomain = str_field(payload, "domain")?
        .parse()
        .map_err(QueueError::handler)?;
    Ok(HostRequest::new(
        str_field(payload, "plugin_id")?,
        domain,
        str_field(payload, "action")?,
        payload.get("args").cloned().unwrap_or(Value::Null),
    ))
}

/// Replays queued host calls once connectivity returns.
struct HostCallHandler {
    host: Arc<dyn HostServices>,
}

#[async_trait::async_trait]
impl OperationHandler for HostCallHandler {
    async fn handle(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        let request = host_call_request(&operation.payload)?;
        match self.host.call(request).await {
            Ok(_) => Ok(()),
            Err(CapabilityError::Network(message)) => Err(QueueError::network(message)),
            Err(e) => Err(QueueError::handler(e.to_string())),
        }
    }
}

/// The assembled runtime kernel.
pub struct Kernel {
    config: Config,
    engine: EngineVersion,
    bus: EventBus,
    resources: Arc<ResourceManager>,
    pool: WorkerPool,
    loader: PluginLoader,
    queue: OfflineQueue,
    host: Arc<dyn HostServices>,
    lifecycle: Arc<LifecycleManager>,
}

impl Kernel {
    /// Build every component from `config`.
    ///
    /// Opens the durable queue store when `[queue].persistent` is set.
    pub async fn new(config: Config, services: KernelServices) -> Result<Self, KernelError> {
        let engine: EngineVersion = config
            .kernel
            .engine_version
            .parse()
            .map_err(KernelError::InvalidEngine)?;

        let bus = EventBus::with_history_limit(config.bus.history_limit);
        let resources = Arc::new(ResourceManager::new(&config.resources).with_events(bus.clone()));
        let pool = WorkerPool::with_builtin_jobs(PoolConfig::from(&config.pool))?;

        let queue = OfflineQueue::from_config(
            &config.queue,
            &config.queue_db_path(),
            bus.clone(),
            Arc::clone(&services.notifier),
        )
        .await?;
        queue.register_handler(
            HOST_CALL_OPERATION,
            Arc::new(HostCallHandler {
                host: Arc::clone(&services.host),
            }),
        );

        let loader = PluginLoader::new(
            engine,
            LoaderSettings::from(&config.plugins),
            LoaderServices {
                bus: bus.clone(),
                resources: Arc::clone(&resources),
                host: Arc::clone(&services.host),
                notifier: Arc::clone(&services.notifier),
                compute: Arc::new(PoolCompute::new(pool.clone(), Arc::clone(&resources))),
            },
        );

        let shutdown_timeout = Duration::from_millis(config.kernel.shutdown_timeout_ms);
        let lifecycle = Arc::new(LifecycleManager::new(shutdown_timeout));
        lifecycle
            .register_hook(Arc::new(PoolLifecycleHook::new(pool.clone())))
            .await;
        lifecycle
            .register_hook(Arc::new(QueueLifecycleHook::new(queue.clone(), shutdown_timeout)))
            .await;
        lifecycle
            .register_hook(Arc::new(PluginsLifecycleHook::new(loader.clone())))
            .await;

        info!(engine = %engine, "Kernel assembled");
        Ok(Self {
            config,
            engine,
            bus,
            resources,
            pool,
            loader,
            queue,
            host: services.host,
            lifecycle,
        })
    }

    /// Restore and start the offline queue, then announce `kernel.boot`.
    pub async fn start(&self) -> Result<(), KernelError> {
        self.lifecycle.start().await?;
        self.announce("kernel.boot").await;
        Ok(())
    }

    /// Announce `kernel.shutdown`, unload every plugin, drain the queue and
    /// terminate the pool.
    pub async fn stop(&self) -> Result<(), KernelError> {
        if self.lifecycle.is_running() {
            self.announce("kernel.shutdown").await;
        }
        self.lifecycle.stop().await
    }

    async fn announce(&self, channel: &str) {
        let options = PublishOptions::new().with_source(KERNEL_SOURCE);
        if let Err(e) = self.bus.publish(channel, EventPayload::Empty, options).await {
            warn!("Failed to publish {}: {}", channel, e);
        }
    }

    /// Call the host directly. A network failure is also queued for replay
    /// under [`HOST_CALL_OPERATION`]; the caller still sees the error.
    pub async fn call_host(&self, request: HostRequest) -> Result<Value, CapabilityError> {
        match self.host.call(request.clone()).await {
            Ok(value) => Ok(value),
            Err(e) => {
                match self.hand_off_host_call(&request, &e.to_string()).await {
                    Ok(Some(id)) => info!("Queued {} for replay as {}", request.method(), id),
                    Ok(None) => {}
                    Err(queue_err) => warn!("Could not queue {}: {}", request.method(), queue_err),
                }
                Err(e)
            }
        }
    }

    /// Queue `request` for replay if `error` classifies as a network error.
    pub async fn hand_off_host_call(
        &self,
        request: &HostRequest,
        error: &str,
    ) -> Result<Option<Uuid>, KernelError> {
        let options = EnqueueOptions::new().with_context(json!({ "plugin_id": request.plugin_id }));
        Ok(self
            .queue
            .hand_off(HOST_CALL_OPERATION, host_call_payload(request), options, error)
            .await?)
    }

    /// Register an extra lifecycle hook. Must happen before [`start`](Self::start).
    pub async fn register_lifecycle_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.lifecycle.register_hook(hook).await;
    }

    pub fn state(&self) -> KernelState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        self.lifecycle.shutdown_signal()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine_version(&self) -> EngineVersion {
        self.engine
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn plugins(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
