//! Kernel-side implementations of the collaborator traits behind
//! [`jarvis_protocols::PluginContext`].

use async_trait::async_trait;
use dashmap::DashMap;
use jarvis_bus::{BusError, EventBus, PublishOptions, SubscribeOptions, sync_handler};
use jarvis_protocols::{
    CapabilityAccess, CapabilityError, ComputeAccess, ErrorKind, EventAccess, EventPayload,
    PluginError, PluginEventHandler,
};
use jarvis_workpool::{PoolError, TaskOptions, WorkerPool};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::loader::WeakLoader;
use crate::error::ResourceError;
use crate::resources::ResourceManager;

/// Bus subscriptions made on behalf of plugins, keyed by owner.
pub struct SubscriptionLedger {
    bus: EventBus,
    owned: DashMap<String, Vec<Uuid>>,
}

impl SubscriptionLedger {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            owned: DashMap::new(),
        }
    }

    fn track(&self, owner: &str, id: Uuid) {
        self.owned.entry(owner.to_string()).or_default().push(id);
    }

    /// Forget and unsubscribe `id` if `owner` holds it.
    fn release(&self, owner: &str, id: Uuid) -> bool {
        let held = match self.owned.get_mut(owner) {
            Some(mut ids) => {
                let before = ids.len();
                ids.retain(|i| *i != id);
                ids.len() != before
            }
            None => false,
        };
        held && self.bus.unsubscribe(id)
    }

    /// Unsubscribe everything `owner` holds. Returns how many were removed.
    pub fn drop_owner(&self, owner: &str) -> usize {
        let Some((_, ids)) = self.owned.remove(owner) else {
            return 0;
        };
        let removed = ids.into_iter().filter(|id| self.bus.unsubscribe(*id)).count();
        if removed > 0 {
            debug!(owner, removed, "Dropped plugin subscriptions");
        }
        removed
    }

    pub fn count(&self, owner: &str) -> usize {
        self.owned.get(owner).map(|ids| ids.len()).unwrap_or(0)
    }
}

fn bus_error(e: BusError) -> CapabilityError {
    match e.kind() {
        ErrorKind::Validation => CapabilityError::InvalidArguments(e.to_string()),
        ErrorKind::Timeout => CapabilityError::Timeout(match e {
            BusError::Timeout { timeout_ms, .. } => timeout_ms,
            _ => 0,
        }),
        _ => CapabilityError::Execution(e.to_string()),
    }
}

/// `events` namespace backed by the kernel bus.
pub struct PluginEvents {
    bus: EventBus,
    ledger: Arc<SubscriptionLedger>,
}

impl PluginEvents {
    pub fn new(bus: EventBus, ledger: Arc<SubscriptionLedger>) -> Self {
        Self { bus, ledger }
    }
}

#[async_trait]
impl EventAccess for PluginEvents {
    async fn publish(
        &self,
        source: &str,
        channel: &str,
        payload: Value,
    ) -> Result<(), CapabilityError> {
        self.bus
            .publish(
                channel,
                EventPayload::Custom(payload),
                PublishOptions::new().with_source(source),
            )
            .await
            .map(|_| ())
            .map_err(bus_error)
    }

    fn subscribe(
        &self,
        owner: &str,
        pattern: &str,
        handler: PluginEventHandler,
    ) -> Result<Uuid, CapabilityError> {
        let handle = self
            .bus
            .subscribe(
                pattern,
                sync_handler(move |event| handler(event.clone())),
                SubscribeOptions::new(),
            )
            .map_err(bus_error)?;
        self.ledger.track(owner, handle.id());
        Ok(handle.id())
    }

    fn unsubscribe(&self, owner: &str, id: Uuid) -> bool {
        self.ledger.release(owner, id)
    }
}

/// Map a loader failure onto the capability error a calling plugin sees.
pub(crate) fn capability_error(e: PluginError) -> CapabilityError {
    match e {
        PluginError::Capability(e) => e,
        PluginError::HookTimeout { timeout_ms, .. } => CapabilityError::Timeout(timeout_ms),
        PluginError::AdmissionDenied { plugin, reason } => {
            CapabilityError::AdmissionDenied { plugin, reason }
        }
        PluginError::NotFound(_)
        | PluginError::InvalidTransition { .. } => CapabilityError::Unavailable(e.to_string()),
        other => CapabilityError::Execution(other.to_string()),
    }
}

/// `capabilities` namespace routed through the plugin loader.
pub struct CapabilityRouter {
    loader: WeakLoader,
}

impl CapabilityRouter {
    pub(crate) fn new(loader: WeakLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl CapabilityAccess for CapabilityRouter {
    fn register(&self, owner: &str, name: &str, handler: &str) -> Result<(), CapabilityError> {
        let loader = self
            .loader
            .upgrade()
            .ok_or_else(|| CapabilityError::Unavailable("plugin loader".to_string()))?;
        loader.register_capability(owner, name, handler)
    }

    async fn invoke(&self, caller: &str, name: &str, args: Value) -> Result<Value, CapabilityError> {
        let loader = self
            .loader
            .upgrade()
            .ok_or_else(|| CapabilityError::Unavailable("plugin loader".to_string()))?;
        loader
            .invoke_capability_as(caller, name, args)
            .await
            .map_err(capability_error)
    }

    fn list(&self) -> Vec<String> {
        self.loader
            .upgrade()
            .map(|loader| loader.capability_names())
            .unwrap_or_default()
    }
}

fn admission_error(caller: &str, e: ResourceError) -> CapabilityError {
    let reason = match e {
        ResourceError::Admission { reason, .. } => reason.to_string(),
        other => other.to_string(),
    };
    CapabilityError::AdmissionDenied {
        plugin: caller.to_string(),
        reason,
    }
}

fn pool_error(e: PoolError) -> CapabilityError {
    match e {
        PoolError::Timeout { timeout_ms, .. } => CapabilityError::Timeout(timeout_ms),
        PoolError::InvalidPayload { .. } | PoolError::UnknownJob(_) => {
            CapabilityError::InvalidArguments(e.to_string())
        }
        PoolError::Terminated | PoolError::InvalidConfig(_) => {
            CapabilityError::Unavailable(e.to_string())
        }
        PoolError::Execution(_) | PoolError::WorkerCrashed(_) => {
            CapabilityError::Execution(e.to_string())
        }
    }
}

/// `system.compute` backed by the worker pool, accounted against the caller's quota.
pub struct PoolCompute {
    pool: WorkerPool,
    resources: Arc<ResourceManager>,
}

impl PoolCompute {
    pub fn new(pool: WorkerPool, resources: Arc<ResourceManager>) -> Self {
        Self { pool, resources }
    }
}

#[async_trait]
impl ComputeAccess for PoolCompute {
    async fn compute(
        &self,
        caller: &str,
        kind: &str,
        payload: Value,
    ) -> Result<Value, CapabilityError> {
        let _permit = self
            .resources
            .acquire(caller)
            .map_err(|e| admission_error(caller, e))?;
        self.pool
            .execute(kind, payload, TaskOptions::new())
            .await
            .map_err(pool_error)
    }
}

#[cfg(test)]
#[path = "bindings_tests.rs"]
mod tests;
