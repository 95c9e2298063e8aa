//! Per-tenant quota table and admission control.

use dashmap::DashMap;
use jarvis_bus::{EventBus, PublishOptions};
use jarvis_config::{QuotaConfig, ResourcesConfig};
use jarvis_protocols::{EventPayload, Priority, ResourceEvent, ResourceLevel};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::quota::{Admission, AdmissionDenial, ResourceQuota, ResourceStats, TenantUsage};
use crate::error::ResourceError;

/// Channel for advisory memory threshold crossings.
pub const RESOURCE_WARNING_CHANNEL: &str = "resource.warning";

struct TenantEntry {
    quota: ResourceQuota,
    active_tasks: u32,
    memory_mb: u64,
    requests: VecDeque<Instant>,
    /// Highest memory threshold already announced.
    alerted: Option<ResourceLevel>,
}

impl TenantEntry {
    fn new(quota: ResourceQuota) -> Self {
        Self {
            quota,
            active_tasks: 0,
            memory_mb: 0,
            requests: VecDeque::new(),
            alerted: None,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.requests.front() {
            if now.duration_since(*oldest) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn recent(&self, now: Instant, window: Duration) -> usize {
        self.requests
            .iter()
            .filter(|t| now.duration_since(**t) < window)
            .count()
    }

    fn check(&self, now: Instant, window: Duration) -> Admission {
        let quota = &self.quota;
        if self.active_tasks >= quota.max_concurrent_tasks {
            return Admission::deny(AdmissionDenial::Concurrency {
                active: self.active_tasks,
                max: quota.max_concurrent_tasks,
            });
        }
        if self.memory_mb > quota.max_memory_mb {
            return Admission::deny(AdmissionDenial::Memory {
                used_mb: self.memory_mb,
                max_mb: quota.max_memory_mb,
            });
        }
        let requests = self.recent(now, window);
        if requests >= quota.max_requests_per_minute as usize {
            return Admission::deny(AdmissionDenial::RateLimit {
                requests,
                max: quota.max_requests_per_minute,
            });
        }
        Admission::allow()
    }

    fn usage(&self, now: Instant, window: Duration) -> TenantUsage {
        TenantUsage {
            active_tasks: self.active_tasks,
            memory_mb: self.memory_mb,
            recent_requests: self.recent(now, window),
        }
    }
}

/// Tracks quotas and usage for every tenant and answers admission checks.
///
/// All mutation goes through the synchronous methods below. No lock is held
/// across an await point.
pub struct ResourceManager {
    tenants: DashMap<String, TenantEntry>,
    window: Duration,
    warning_ratio: f64,
    critical_ratio: f64,
    default_quota: QuotaConfig,
    bus: Option<EventBus>,
}

impl ResourceManager {
    pub fn new(config: &ResourcesConfig) -> Self {
        Self {
            tenants: DashMap::new(),
            window: Duration::from_secs(config.window_secs.max(1)),
            warning_ratio: config.memory_warning_ratio,
            critical_ratio: config.memory_critical_ratio,
            default_quota: config.default_quota.clone(),
            bus: None,
        }
    }

    /// Announce memory threshold crossings on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Limits applied to tenants that do not ask for their own.
    pub fn default_quota(&self, tenant_id: &str) -> ResourceQuota {
        ResourceQuota::from_config(tenant_id, &self.default_quota)
    }

    pub fn defaults(&self) -> &QuotaConfig {
        &self.default_quota
    }

    /// Assign or replace a tenant's quota. Existing usage is kept.
    pub fn set_quota(&self, quota: ResourceQuota) -> Result<(), ResourceError> {
        quota.validate()?;
        debug!(tenant = %quota.tenant_id, ?quota, "Setting quota");
        match self.tenants.get_mut(&quota.tenant_id) {
            Some(mut entry) => entry.quota = quota,
            None => {
                self.tenants
                    .insert(quota.tenant_id.clone(), TenantEntry::new(quota));
            }
        }
        Ok(())
    }

    /// Drop a tenant's quota and usage. Returns false when it was unknown.
    pub fn remove_tenant(&self, tenant_id: &str) -> bool {
        let removed = self.tenants.remove(tenant_id).is_some();
        if removed {
            debug!(tenant = %tenant_id, "Removed tenant");
        }
        removed
    }

    pub fn quota(&self, tenant_id: &str) -> Option<ResourceQuota> {
        self.tenants.get(tenant_id).map(|e| e.quota.clone())
    }

    pub fn usage(&self, tenant_id: &str) -> Option<TenantUsage> {
        let now = Instant::now();
        self.tenants
            .get(tenant_id)
            .map(|e| e.usage(now, self.window))
    }

    /// Check, in order, concurrency, memory and request rate.
    pub fn can_start_task(&self, tenant_id: &str) -> Admission {
        let now = Instant::now();
        match self.tenants.get_mut(tenant_id) {
            Some(mut entry) => {
                entry.prune(now, self.window);
                entry.check(now, self.window)
            }
            None => Admission::deny(AdmissionDenial::UnknownTenant),
        }
    }

    /// Admit a task: re-check admission, then count it and record the request.
    pub fn start_task(&self, tenant_id: &str) -> Result<(), ResourceError> {
        let now = Instant::now();
        let Some(mut entry) = self.tenants.get_mut(tenant_id) else {
            return Err(ResourceError::Admission {
                tenant: tenant_id.to_string(),
                reason: AdmissionDenial::UnknownTenant,
            });
        };
        entry.prune(now, self.window);
        let admission = entry.check(now, self.window);
        if let Some(reason) = admission.reason {
            debug!(tenant = %tenant_id, %reason, "Admission denied");
            return Err(ResourceError::Admission {
                tenant: tenant_id.to_string(),
                reason,
            });
        }
        entry.active_tasks += 1;
        entry.requests.push_back(now);
        Ok(())
    }

    /// Release a task slot. Saturates at zero.
    pub fn end_task(&self, tenant_id: &str) {
        if let Some(mut entry) = self.tenants.get_mut(tenant_id) {
            entry.active_tasks = entry.active_tasks.saturating_sub(1);
        }
    }

    /// Admit a task and release it when the returned permit drops.
    pub fn acquire(self: &Arc<Self>, tenant_id: &str) -> Result<TaskPermit, ResourceError> {
        self.start_task(tenant_id)?;
        Ok(TaskPermit {
            manager: Arc::clone(self),
            tenant_id: tenant_id.to_string(),
        })
    }

    /// Record a tenant's memory footprint.
    ///
    /// Crossing the warning or critical fraction of `max_memory_mb` upward
    /// publishes `resource.warning` in the background. Falling back below a
    /// threshold re-arms it.
    pub fn update_memory(&self, tenant_id: &str, memory_mb: u64) -> Result<(), ResourceError> {
        let crossed = {
            let Some(mut entry) = self.tenants.get_mut(tenant_id) else {
                return Err(ResourceError::UnknownTenant(tenant_id.to_string()));
            };
            entry.memory_mb = memory_mb;
            let max = entry.quota.max_memory_mb;
            let level = self.level_for(memory_mb, max);
            let crossed = match (level, entry.alerted) {
                (Some(level), Some(alerted)) => level > alerted,
                (Some(_), None) => true,
                (None, _) => false,
            };
            entry.alerted = level;
            level.filter(|_| crossed).map(|level| ResourceEvent {
                tenant_id: tenant_id.to_string(),
                level,
                memory_mb,
                max_memory_mb: max,
            })
        };

        if let Some(event) = crossed {
            warn!(
                tenant = %event.tenant_id,
                level = ?event.level,
                memory_mb = event.memory_mb,
                max_memory_mb = event.max_memory_mb,
                "Memory threshold crossed"
            );
            self.announce(event);
        }
        Ok(())
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    pub fn stats(&self) -> ResourceStats {
        let now = Instant::now();
        self.tenants
            .iter()
            .fold(ResourceStats::default(), |mut stats, entry| {
                stats.tenants += 1;
                stats.active_tasks += entry.active_tasks as u64;
                stats.memory_mb += entry.memory_mb;
                stats.recent_requests += entry.recent(now, self.window);
                stats
            })
    }

    fn level_for(&self, memory_mb: u64, max_mb: u64) -> Option<ResourceLevel> {
        let ratio = memory_mb as f64 / max_mb.max(1) as f64;
        if ratio >= self.critical_ratio {
            Some(ResourceLevel::Critical)
        } else if ratio >= self.warning_ratio {
            Some(ResourceLevel::Warning)
        } else {
            None
        }
    }

    fn announce(&self, event: ResourceEvent) {
        let Some(bus) = self.bus.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime; resource warning not published");
            return;
        };
        let priority = match event.level {
            ResourceLevel::Critical => Priority::Critical,
            ResourceLevel::Warning => Priority::High,
        };
        handle.spawn(async move {
            let options = PublishOptions::new()
                .with_priority(priority)
                .with_source("resource-manager");
            if let Err(e) = bus
                .publish(RESOURCE_WARNING_CHANNEL, EventPayload::Resource(event), options)
                .await
            {
                warn!("Failed to publish resource warning: {}", e);
            }
        });
    }
}

/// Admitted task slot. Dropping it ends the task.
pub struct TaskPermit {
    manager: Arc<ResourceManager>,
    tenant_id: String,
}

impl TaskPermit {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

impl Drop for TaskPermit {
    fn drop(&mut self) {
        self.manager.end_task(&self.tenant_id);
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
