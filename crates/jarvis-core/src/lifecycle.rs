//! Kernel lifecycle management.
//!
//! Components register a [`LifecycleHook`] with a priority. Hooks start in
//! descending priority order and stop in reverse, each stop bounded by the
//! shutdown timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::KernelError;

#[path = "lifecycle_adapters.rs"]
mod lifecycle_adapters;
pub use lifecycle_adapters::*;

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

/// Kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KernelState {
    Created = 0,
    Starting = 1,
    Running = 2,
    ShuttingDown = 3,
    Stopped = 4,
}

impl From<u8> for KernelState {
    fn from(v: u8) -> Self {
        match v {
            0 => KernelState::Created,
            1 => KernelState::Starting,
            2 => KernelState::Running,
            3 => KernelState::ShuttingDown,
            4 => KernelState::Stopped,
            _ => KernelState::Created,
        }
    }
}

impl std::fmt::Display for KernelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KernelState::Created => "created",
            KernelState::Starting => "starting",
            KernelState::Running => "running",
            KernelState::ShuttingDown => "shutting down",
            KernelState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Broadcast fired once when shutdown begins.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    pub fn trigger(&self) {
        let _ = self.sender.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A component driven by the lifecycle manager.
#[async_trait::async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    async fn on_start(&self) -> Result<(), KernelError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), KernelError> {
        Ok(())
    }

    /// Higher starts earlier and stops later.
    fn priority(&self) -> i32 {
        priority::DEFAULT
    }
}

/// Lifecycle manager for kernel components.
pub struct LifecycleManager {
    state: AtomicU8,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    shutdown_signal: ShutdownSignal,
    shutdown_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(KernelState::Created as u8),
            hooks: RwLock::new(Vec::new()),
            shutdown_signal: ShutdownSignal::new(),
            shutdown_timeout,
        }
    }

    pub fn state(&self) -> KernelState {
        KernelState::from(self.state.load(Ordering::SeqCst))
    }

    /// Register a hook. Equal priorities keep registration order.
    pub async fn register_hook(&self, hook: Arc<dyn LifecycleHook>) {
        let mut hooks = self.hooks.write().await;
        hooks.push(hook);
        hooks.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    pub async fn hook_names(&self) -> Vec<String> {
        self.hooks
            .read()
            .await
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown_signal
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    fn transition(&self, from: KernelState, to: KernelState, action: &str) -> Result<(), KernelError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|current| KernelError::InvalidState {
                action: action.to_string(),
                state: KernelState::from(current).to_string(),
            })
    }

    /// Start every hook. A failing hook rolls back the ones already started
    /// and leaves the manager `Stopped`.
    pub async fn start(&self) -> Result<(), KernelError> {
        self.transition(KernelState::Created, KernelState::Starting, "start")?;
        info!("Kernel starting...");

        let hooks = self.hooks.read().await;
        for (i, hook) in hooks.iter().enumerate() {
            if let Err(e) = hook.on_start().await {
                error!(hook = hook.name(), "Failed to start: {}", e);
                for started in hooks.iter().take(i).rev() {
                    if let Err(e) = started.on_stop().await {
                        warn!(hook = started.name(), "Rollback stop failed: {}", e);
                    }
                }
                self.state.store(KernelState::Stopped as u8, Ordering::SeqCst);
                return Err(e);
            }
        }

        self.state.store(KernelState::Running as u8, Ordering::SeqCst);
        info!("Kernel started ({} hooks)", hooks.len());
        Ok(())
    }

    /// Stop every hook in reverse order. All hooks are attempted; failures
    /// and timeouts are collected into [`KernelError::Shutdown`].
    pub async fn stop(&self) -> Result<(), KernelError> {
        self.transition(KernelState::Running, KernelState::ShuttingDown, "stop")?;
        info!("Kernel shutting down...");

        self.shutdown_signal.trigger();

        let hooks = self.hooks.read().await;
        let mut failed = 0;
        for hook in hooks.iter().rev() {
            match timeout(self.shutdown_timeout, hook.on_stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(hook = hook.name(), "Hook stop error: {}", e);
                    failed += 1;
                }
                Err(_) => {
                    warn!(hook = hook.name(), "{}", KernelError::HookTimeout(hook.name().to_string()));
                    failed += 1;
                }
            }
        }

        self.state.store(KernelState::Stopped as u8, Ordering::SeqCst);
        info!("Kernel stopped");

        if failed == 0 {
            Ok(())
        } else {
            Err(KernelError::Shutdown { count: failed })
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == KernelState::Running
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Priority levels (higher = starts earlier, stops later).
pub mod priority {
    pub const POOL: i32 = 1000;
    pub const QUEUE: i32 = 700;
    pub const PLUGINS: i32 = 100;
    pub const DEFAULT: i32 = 0;
}
