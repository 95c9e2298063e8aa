//! Lifecycle hooks for the kernel components.

use std::time::Duration;

use jarvis_offline::OfflineQueue;
use jarvis_workpool::WorkerPool;
use tracing::{debug, info};

use super::{LifecycleHook, priority};
use crate::error::KernelError;
use crate::plugins::PluginLoader;

/// Terminates the worker pool on shutdown.
pub struct PoolLifecycleHook {
    pool: WorkerPool,
}

impl PoolLifecycleHook {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LifecycleHook for PoolLifecycleHook {
    fn name(&self) -> &str {
        "worker-pool"
    }

    async fn on_stop(&self) -> Result<(), KernelError> {
        debug!("Terminating worker pool...");
        self.pool.terminate();
        Ok(())
    }

    fn priority(&self) -> i32 {
        priority::POOL
    }
}

/// Restores and runs the offline queue dispatcher.
pub struct QueueLifecycleHook {
    queue: OfflineQueue,
    drain_timeout: Duration,
}

impl QueueLifecycleHook {
    pub fn new(queue: OfflineQueue, drain_timeout: Duration) -> Self {
        Self {
            queue,
            drain_timeout,
        }
    }
}

#[async_trait::async_trait]
impl LifecycleHook for QueueLifecycleHook {
    fn name(&self) -> &str {
        "offline-queue"
    }

    async fn on_start(&self) -> Result<(), KernelError> {
        let restored = self.queue.restore().await?;
        if restored > 0 {
            info!("Restored {} queued operations", restored);
        }
        self.queue.start();
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), KernelError> {
        self.queue.shutdown(self.drain_timeout).await;
        Ok(())
    }

    fn priority(&self) -> i32 {
        priority::QUEUE
    }
}

/// Unloads every plugin on shutdown.
pub struct PluginsLifecycleHook {
    loader: PluginLoader,
}

impl PluginsLifecycleHook {
    pub fn new(loader: PluginLoader) -> Self {
        Self { loader }
    }
}

#[async_trait::async_trait]
impl LifecycleHook for PluginsLifecycleHook {
    fn name(&self) -> &str {
        "plugin-loader"
    }

    async fn on_stop(&self) -> Result<(), KernelError> {
        let unloaded = self.loader.unload_all().await;
        debug!("Unloaded {} plugins", unloaded);
        Ok(())
    }

    fn priority(&self) -> i32 {
        priority::PLUGINS
    }
}
