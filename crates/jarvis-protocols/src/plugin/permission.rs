//! Capability permissions (`domain:action`).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Namespaces of the capability surface exposed to plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityDomain {
    Ai,
    Memory,
    Storage,
    Ui,
    System,
    Events,
    Capabilities,
}

impl CapabilityDomain {
    pub const ALL: [CapabilityDomain; 7] = [
        CapabilityDomain::Ai,
        CapabilityDomain::Memory,
        CapabilityDomain::Storage,
        CapabilityDomain::Ui,
        CapabilityDomain::System,
        CapabilityDomain::Events,
        CapabilityDomain::Capabilities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityDomain::Ai => "ai",
            CapabilityDomain::Memory => "memory",
            CapabilityDomain::Storage => "storage",
            CapabilityDomain::Ui => "ui",
            CapabilityDomain::System => "system",
            CapabilityDomain::Events => "events",
            CapabilityDomain::Capabilities => "capabilities",
        }
    }
}

impl fmt::Display for CapabilityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityDomain::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("unknown capability domain: {}", s))
    }
}

/// A single granted permission. The action `*` grants every action of the domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub domain: CapabilityDomain,
    pub action: String,
}

impl Permission {
    pub fn new(domain: CapabilityDomain, action: impl Into<String>) -> Self {
        Self {
            domain,
            action: action.into(),
        }
    }

    pub fn allows(&self, domain: CapabilityDomain, action: &str) -> bool {
        self.domain == domain && (self.action == "*" || self.action == action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.action)
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, action) = s
            .split_once(':')
            .ok_or_else(|| format!("permission '{}' must have the form domain:action", s))?;
        let valid_action = !action.is_empty()
            && (action == "*"
                || action
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        if !valid_action {
            return Err(format!("invalid action in permission '{}'", s));
        }
        Ok(Self {
            domain: domain.parse()?,
            action: action.to_string(),
        })
    }
}

/// Set of permissions granted to one plugin.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    granted: HashSet<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of `domain:action` strings.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self, String> {
        let granted = items
            .iter()
            .map(|s| s.as_ref().parse::<Permission>())
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { granted })
    }

    pub fn grant(&mut self, permission: Permission) {
        self.granted.insert(permission);
    }

    pub fn allows(&self, domain: CapabilityDomain, action: &str) -> bool {
        self.granted.iter().any(|p| p.allows(domain, action))
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.granted.iter()
    }
}
