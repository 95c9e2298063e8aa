//! # Jarvis Protocols
//!
//! Shared type and trait definitions for the Jarvis kernel.
//! Contains interface definitions and plain data types - the components
//! themselves live in their own crates.
//!
//! ## Core Types
//!
//! - [`Event`] - Immutable event carried by the event bus
//! - [`Plugin`] - Lifecycle contract implemented by plugins
//! - [`PluginManifest`] - Declarative plugin metadata
//! - [`PluginContext`] - Capability-scoped context handed to plugins
//! - [`HostServices`] / [`Notifier`] - Collaborators provided by the host shell

pub mod error;
pub mod event;
pub mod host;
pub mod plugin;
pub mod types;

pub use error::{CapabilityError, ErrorKind, PluginError};
pub use event::{
    response_channel, ConnectivityEvent, Event, EventPayload, PluginEvent, QueueEvent,
    ResourceEvent, ResourceLevel,
};
pub use host::{
    CapabilityAccess, ComputeAccess, EventAccess, HostRequest, HostServices, LogNotifier,
    Notification, NotificationLevel, Notifier, NullHost, PluginEventHandler,
};
pub use plugin::{
    CapabilityDomain, CapabilitySpec, ContextBindings, Permission, PermissionSet, Plugin,
    PluginContext, PluginFactory, PluginManifest, PluginState, QuotaSpec,
};
pub use types::*;
