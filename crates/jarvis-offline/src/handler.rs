//! Operation handlers.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::error::QueueError;
use crate::operation::QueuedOperation;

/// Executes operations of one type.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, operation: &QueuedOperation) -> Result<(), QueueError>;

    /// Whether the operation type needs connectivity. Network-bound
    /// operations are skipped while the queue is offline.
    fn requires_network(&self) -> bool {
        true
    }
}

struct FnHandler<F> {
    f: F,
    requires_network: bool,
}

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(QueuedOperation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), QueueError>> + Send + 'static,
{
    async fn handle(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        (self.f)(operation.clone()).await
    }

    fn requires_network(&self) -> bool {
        self.requires_network
    }
}

/// Wrap an async closure as a handler.
pub fn operation_fn<F, Fut>(requires_network: bool, f: F) -> Arc<dyn OperationHandler>
where
    F: Fn(QueuedOperation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), QueueError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        requires_network,
    })
}
