//! Plugin manifest types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::PermissionSet;
use crate::error::PluginError;
use crate::types::{EngineVersion, Version};

/// Plugin manifest containing metadata.
///
/// Every field defaults on deserialization so that a manifest with missing
/// fields reaches [`PluginManifest::validate`] and is rejected there with a
/// precise message instead of a generic parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Name of the registered plugin factory that builds the instance.
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    /// Required engine version (`major.minor`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaSpec>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A capability exported by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Globally unique capability name (e.g. `weather.forecast`).
    pub name: String,
    /// Handler name passed to [`super::Plugin::handle_capability`].
    pub handler: String,
}

/// Explicit quota requested by a plugin. Unset fields fall back to the kernel defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSpec {
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
    #[serde(default)]
    pub max_cpu_percent: Option<u32>,
    #[serde(default)]
    pub max_concurrent_tasks: Option<u32>,
    #[serde(default)]
    pub max_requests_per_minute: Option<u32>,
}

impl PluginManifest {
    /// Create a new manifest with no permissions.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            entry: entry.into(),
            permissions: Some(Vec::new()),
            ..Default::default()
        }
    }

    /// Parse a manifest from JSON. Structural errors map to `InvalidManifest`.
    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        serde_json::from_str(json).map_err(|e| PluginError::InvalidManifest(e.to_string()))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions
            .get_or_insert_with(Vec::new)
            .push(permission.into());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_capability(mut self, name: impl Into<String>, handler: impl Into<String>) -> Self {
        self.capabilities.push(CapabilitySpec {
            name: name.into(),
            handler: handler.into(),
        });
        self
    }

    pub fn with_quota(mut self, quota: QuotaSpec) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Validate the manifest against the running engine version.
    ///
    /// Returns the parsed permission set on success. Performs no side effects.
    pub fn validate(&self, engine: &EngineVersion) -> Result<PermissionSet, PluginError> {
        let invalid = |msg: String| PluginError::InvalidManifest(msg);

        if self.id.trim().is_empty() {
            return Err(invalid("missing required field 'id'".to_string()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(format!("invalid plugin id '{}'", self.id)));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("missing required field 'name'".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("missing required field 'version'".to_string()));
        }
        self.version.parse::<Version>().map_err(invalid)?;
        if self.entry.trim().is_empty() {
            return Err(invalid("missing required field 'entry'".to_string()));
        }
        let permissions = self
            .permissions
            .as_ref()
            .ok_or_else(|| invalid("missing required field 'permissions'".to_string()))?;
        let granted = PermissionSet::parse(permissions).map_err(invalid)?;

        if let Some(ref required) = self.engine {
            let required: EngineVersion = required.parse().map_err(invalid)?;
            if !engine.satisfies(&required) {
                return Err(PluginError::IncompatibleEngine {
                    required: required.to_string(),
                    provided: engine.to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for cap in &self.capabilities {
            if cap.name.trim().is_empty() || cap.handler.trim().is_empty() {
                return Err(invalid(
                    "capabilities require a non-empty name and handler".to_string(),
                ));
            }
            if !seen.insert(cap.name.as_str()) {
                return Err(invalid(format!("duplicate capability '{}'", cap.name)));
            }
        }

        if let Some(ref quota) = self.quota {
            let zero = quota.max_memory_mb == Some(0)
                || quota.max_concurrent_tasks == Some(0)
                || quota.max_requests_per_minute == Some(0)
                || quota.max_cpu_percent == Some(0);
            if zero || quota.max_cpu_percent.is_some_and(|c| c > 100) {
                return Err(invalid("quota limits must be positive".to_string()));
            }
        }

        Ok(granted)
    }

    /// Parsed semantic version (only meaningful after validation).
    pub fn parsed_version(&self) -> Option<Version> {
        self.version.parse().ok()
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
