//! Plugin hosting: manifest-driven loading, lifecycle hooks, capability
//! routing and the kernel side of every plugin context namespace.

mod bindings;
mod loader;
mod registry;

pub use bindings::{CapabilityRouter, PluginEvents, PoolCompute, SubscriptionLedger};
pub use loader::{LOADER_SOURCE, LoaderServices, LoaderSettings, PluginInfo, PluginLoader};
pub use registry::{CapabilityEntry, CapabilityRegistry};
