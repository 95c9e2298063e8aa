//! Event handler trait and closure adapters.

use async_trait::async_trait;
use jarvis_protocols::Event;
use std::future::Future;
use std::sync::Arc;

use crate::error::BusError;

/// Receives events for a subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), BusError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BusError>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), BusError> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BusError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct SyncHandler<F>(F);

#[async_trait]
impl<F> EventHandler for SyncHandler<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), BusError> {
        (self.0)(event);
        Ok(())
    }
}

/// Wrap a synchronous, infallible closure as a handler.
pub fn sync_handler<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(SyncHandler(f))
}
