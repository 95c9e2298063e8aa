//! Plugin lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a plugin id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Not present in the loader.
    Unloaded,
    /// `initialize` hook running.
    Initializing,
    /// Initialized, not yet started.
    Loaded,
    /// Started and serving.
    Enabled,
    /// Stopped after having been enabled.
    Disabled,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Initializing => "initializing",
            PluginState::Loaded => "loaded",
            PluginState::Enabled => "enabled",
            PluginState::Disabled => "disabled",
        }
    }

    /// Whether `start` is a legal transition from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, PluginState::Loaded | PluginState::Disabled)
    }

    /// Whether `stop` is a legal transition from this state.
    pub fn can_stop(&self) -> bool {
        matches!(self, PluginState::Enabled)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
