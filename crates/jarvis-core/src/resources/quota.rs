//! Quota, usage and admission types.

use jarvis_config::QuotaConfig;
use jarvis_protocols::QuotaSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ResourceError;

/// Limits for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub tenant_id: String,
    pub max_memory_mb: u64,
    pub max_cpu_percent: u32,
    pub max_concurrent_tasks: u32,
    pub max_requests_per_minute: u32,
}

impl ResourceQuota {
    /// Quota with the configured default limits.
    pub fn from_config(tenant_id: impl Into<String>, config: &QuotaConfig) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            max_memory_mb: config.max_memory_mb,
            max_cpu_percent: config.max_cpu_percent,
            max_concurrent_tasks: config.max_concurrent_tasks,
            max_requests_per_minute: config.max_requests_per_minute,
        }
    }

    /// Quota requested by a plugin manifest. Unset limits fall back to `defaults`.
    pub fn from_spec(tenant_id: impl Into<String>, spec: &QuotaSpec, defaults: &QuotaConfig) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            max_memory_mb: spec.max_memory_mb.unwrap_or(defaults.max_memory_mb),
            max_cpu_percent: spec.max_cpu_percent.unwrap_or(defaults.max_cpu_percent),
            max_concurrent_tasks: spec
                .max_concurrent_tasks
                .unwrap_or(defaults.max_concurrent_tasks),
            max_requests_per_minute: spec
                .max_requests_per_minute
                .unwrap_or(defaults.max_requests_per_minute),
        }
    }

    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, tasks: u32) -> Self {
        self.max_concurrent_tasks = tasks;
        self
    }

    pub fn with_max_requests_per_minute(mut self, requests: u32) -> Self {
        self.max_requests_per_minute = requests;
        self
    }

    pub fn validate(&self) -> Result<(), ResourceError> {
        let invalid = |message: &str| ResourceError::InvalidQuota {
            tenant: self.tenant_id.clone(),
            message: message.to_string(),
        };
        if self.tenant_id.trim().is_empty() {
            return Err(invalid("tenant id is empty"));
        }
        if self.max_memory_mb == 0
            || self.max_cpu_percent == 0
            || self.max_concurrent_tasks == 0
            || self.max_requests_per_minute == 0
        {
            return Err(invalid("limits must be positive"));
        }
        if self.max_cpu_percent > 100 {
            return Err(invalid("max_cpu_percent must not exceed 100"));
        }
        Ok(())
    }
}

/// Point-in-time usage of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TenantUsage {
    pub active_tasks: u32,
    pub memory_mb: u64,
    /// Requests recorded inside the trailing rate window.
    pub recent_requests: usize,
}

/// Why admission was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AdmissionDenial {
    UnknownTenant,
    Concurrency { active: u32, max: u32 },
    Memory { used_mb: u64, max_mb: u64 },
    RateLimit { requests: usize, max: u32 },
}

impl fmt::Display for AdmissionDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionDenial::UnknownTenant => f.write_str("no quota assigned"),
            AdmissionDenial::Concurrency { active, max } => {
                write!(f, "max concurrent tasks reached ({}/{})", active, max)
            }
            AdmissionDenial::Memory { used_mb, max_mb } => {
                write!(f, "memory limit exceeded ({}MB/{}MB)", used_mb, max_mb)
            }
            AdmissionDenial::RateLimit { requests, max } => {
                write!(f, "rate limit exceeded ({}/{} per minute)", requests, max)
            }
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<AdmissionDenial>,
}

impl Admission {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: AdmissionDenial) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Aggregate usage across tenants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceStats {
    pub tenants: usize,
    pub active_tasks: u64,
    pub memory_mb: u64,
    pub recent_requests: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec_falls_back_to_defaults() {
        let defaults = QuotaConfig::default();
        let spec = QuotaSpec {
            max_memory_mb: Some(512),
            ..Default::default()
        };
        let quota = ResourceQuota::from_spec("p", &spec, &defaults);
        assert_eq!(quota.max_memory_mb, 512);
        assert_eq!(quota.max_concurrent_tasks, defaults.max_concurrent_tasks);
        assert_eq!(quota.max_requests_per_minute, defaults.max_requests_per_minute);
    }

    #[test]
    fn test_validate() {
        let quota = ResourceQuota::from_config("p", &QuotaConfig::default());
        assert!(quota.validate().is_ok());
        assert!(quota.clone().with_max_concurrent_tasks(0).validate().is_err());
        assert!(quota.clone().with_max_memory_mb(0).validate().is_err());

        let mut cpu = quota.clone();
        cpu.max_cpu_percent = 101;
        assert!(cpu.validate().is_err());

        let mut unnamed = quota;
        unnamed.tenant_id = " ".to_string();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_denial_display() {
        let reason = AdmissionDenial::RateLimit { requests: 60, max: 60 };
        assert!(reason.to_string().contains("rate limit"));
        let json = serde_json::to_value(Admission::deny(reason)).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["reason"]["reason"], "rate_limit");
    }
}
