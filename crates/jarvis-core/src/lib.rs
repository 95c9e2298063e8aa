//! # Jarvis Core
//!
//! Runtime kernel for the Jarvis assistant.
//!
//! ## Components
//!
//! - [`Kernel`] - assembles and owns every runtime component
//! - [`ResourceManager`] - per-tenant quotas and admission control
//! - [`PluginLoader`] - plugin lifecycle, sandboxed contexts and capability routing
//! - [`LifecycleManager`] - ordered startup and bounded shutdown
//!
//! The event bus, worker pool and offline queue live in their own crates and
//! are wired together here.

pub mod error;
pub mod kernel;
pub mod lifecycle;
pub mod plugins;
pub mod resources;

pub use error::{KernelError, ResourceError};
pub use kernel::{HOST_CALL_OPERATION, KERNEL_SOURCE, Kernel, KernelServices};
pub use lifecycle::{KernelState, LifecycleHook, LifecycleManager, ShutdownSignal};
pub use plugins::{
    CapabilityEntry, CapabilityRegistry, LOADER_SOURCE, LoaderServices, LoaderSettings,
    PluginInfo, PluginLoader,
};
pub use resources::{
    Admission, AdmissionDenial, RESOURCE_WARNING_CHANNEL, ResourceManager, ResourceQuota,
    ResourceStats, TaskPermit, TenantUsage,
};
