//! Capability registry.
//!
//! Maps globally unique capability names to the plugin that serves them and
//! the handler name passed to its `handle_capability` hook.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jarvis_protocols::CapabilityError;
use serde::Serialize;
use std::sync::Arc;

/// A registered capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityEntry {
    pub name: String,
    pub owner: String,
    pub handler: String,
}

/// Thread-safe capability table keyed by name.
#[derive(Default)]
pub struct CapabilityRegistry {
    items: DashMap<String, Arc<CapabilityEntry>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability.
    ///
    /// The owner may re-register its own name to change the handler. A name
    /// held by another plugin is rejected.
    pub fn register(&self, owner: &str, name: &str, handler: &str) -> Result<(), CapabilityError> {
        if name.trim().is_empty() || handler.trim().is_empty() {
            return Err(CapabilityError::InvalidArguments(
                "capability name and handler must be non-empty".to_string(),
            ));
        }
        let entry = Arc::new(CapabilityEntry {
            name: name.to_string(),
            owner: owner.to_string(),
            handler: handler.to_string(),
        });
        match self.items.entry(name.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().owner != owner {
                    return Err(CapabilityError::AlreadyRegistered(name.to_string()));
                }
                existing.insert(entry);
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<CapabilityEntry>> {
        self.items.remove(name).map(|(_, entry)| entry)
    }

    /// Drop every capability served by `owner`. Returns how many were removed.
    pub fn remove_owner(&self, owner: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|_, entry| entry.owner != owner);
        before.saturating_sub(self.items.len())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CapabilityEntry>> {
        self.items.get(name).map(|entry| entry.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    /// Capability names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.items.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Names served by `owner`, sorted.
    pub fn owned_by(&self, owner: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .items
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
