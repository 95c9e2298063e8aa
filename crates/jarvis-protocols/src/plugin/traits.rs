//! Plugin trait definition.

use async_trait::async_trait;
use serde_json::Value;

use super::{PluginContext, PluginManifest};
use crate::error::PluginError;

/// Core trait for all plugins.
///
/// Every hook is optional. The kernel calls them in lifecycle order:
/// `initialize` once after construction, `start`/`stop` any number of
/// times, `destroy` once before the instance is dropped. Hooks run under
/// the kernel's hook timeout.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Called once with the capability-scoped context.
    async fn initialize(&mut self, _ctx: PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    async fn start(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn destroy(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Handle a direct message from the host. Returns an optional reply.
    async fn on_message(&mut self, _message: Value) -> Result<Option<Value>, PluginError> {
        Ok(None)
    }

    /// Serve an exported capability.
    async fn handle_capability(&mut self, handler: &str, _args: Value) -> Result<Value, PluginError> {
        Err(PluginError::Execution(format!(
            "handler '{}' is not implemented",
            handler
        )))
    }
}

/// Builds plugin instances for a manifest `entry`.
pub trait PluginFactory: Send + Sync {
    fn create(&self, manifest: &PluginManifest) -> Result<Box<dyn Plugin>, PluginError>;
}

impl<F> PluginFactory for F
where
    F: Fn(&PluginManifest) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync,
{
    fn create(&self, manifest: &PluginManifest) -> Result<Box<dyn Plugin>, PluginError> {
        self(manifest)
    }
}
