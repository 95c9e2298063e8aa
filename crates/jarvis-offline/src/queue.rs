//! Offline queue.

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use jarvis_bus::{EventBus, PublishOptions};
use jarvis_protocols::{
    ConnectivityEvent, EventPayload, Notification, Notifier, Priority, QueueEvent,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::NetworkClassifier;
use crate::config::QueueSettings;
use crate::error::QueueError;
use crate::handler::OperationHandler;
use crate::operation::{EnqueueOptions, OperationStatus, QueueStats, QueuedOperation};
use crate::sqlite::SqliteOperationStore;
use crate::store::{MemoryOperationStore, OperationStore};

const EVENT_SOURCE: &str = "offline-queue";

struct QueueInner {
    store: Arc<dyn OperationStore>,
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    settings: QueueSettings,
    classifier: NetworkClassifier,
    handlers: RwLock<HashMap<String, Arc<dyn OperationHandler>>>,
    /// Operation ids with an attempt running in this process.
    in_flight: Mutex<HashSet<Uuid>>,
    /// Serializes read-modify-write transitions against the store.
    transitions: tokio::sync::Mutex<()>,
    online: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    kick: Notify,
    settled: Notify,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Durable retry queue.
///
/// Operations are persisted on enqueue and on every transition. A
/// dispatcher picks due `PENDING` operations by priority then age and runs
/// them through the handler registered for their type, retrying failures
/// with exponential backoff until `max_retries`.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

impl OfflineQueue {
    pub fn new(
        store: Arc<dyn OperationStore>,
        bus: EventBus,
        notifier: Arc<dyn Notifier>,
        settings: QueueSettings,
    ) -> Result<Self, QueueError> {
        let (online, _) = watch::channel(true);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(QueueInner {
                store,
                bus,
                notifier,
                settings,
                classifier: NetworkClassifier::new()?,
                handlers: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                transitions: tokio::sync::Mutex::new(()),
                online,
                shutdown,
                kick: Notify::new(),
                settled: Notify::new(),
                dispatcher: Mutex::new(None),
            }),
        })
    }

    /// Build from the `[queue]` config section: SQLite at `db_path` when
    /// persistent, memory otherwise.
    pub async fn from_config(
        config: &jarvis_config::QueueConfig,
        db_path: &Path,
        bus: EventBus,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, QueueError> {
        let store: Arc<dyn OperationStore> = if config.persistent {
            Arc::new(SqliteOperationStore::open(db_path).await?)
        } else {
            warn!("Offline queue is not persistent; queued operations are lost on restart");
            Arc::new(MemoryOperationStore::new())
        };
        Self::new(store, bus, notifier, QueueSettings::from(config))
    }

    /// Register the handler for an operation type, replacing any previous one.
    pub fn register_handler(&self, op_type: impl Into<String>, handler: Arc<dyn OperationHandler>) {
        let op_type = op_type.into();
        debug!("Registered offline handler for '{}'", op_type);
        self.inner.handlers.write().insert(op_type, handler);
        self.inner.kick.notify_one();
    }

    pub fn unregister_handler(&self, op_type: &str) -> bool {
        self.inner.handlers.write().remove(op_type).is_some()
    }

    /// Persist a new operation and kick the dispatcher.
    pub async fn enqueue(
        &self,
        op_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        if op_type.trim().is_empty() {
            return Err(QueueError::InvalidOperation(
                "operation type must not be empty".to_string(),
            ));
        }
        let max_retries = options
            .max_retries
            .unwrap_or(self.inner.settings.default_max_retries);
        let operation = QueuedOperation::new(op_type, payload, max_retries)
            .with_priority(options.priority)
            .with_context(options.context);

        self.inner.store.insert(&operation).await?;
        info!(
            "Enqueued operation {} ({}, {})",
            operation.id, operation.op_type, operation.priority
        );
        self.inner.announce("queue.enqueued", &operation, Priority::Normal).await;
        self.inner.kick.notify_one();
        Ok(operation.id)
    }

    /// Enqueue only when `error` classifies as a connectivity failure.
    pub async fn hand_off(
        &self,
        op_type: &str,
        payload: Value,
        options: EnqueueOptions,
        error: &str,
    ) -> Result<Option<Uuid>, QueueError> {
        if !self.inner.classifier.is_network_error(error) {
            debug!("Not queueing '{}': not a network error ({})", op_type, error);
            return Ok(None);
        }
        self.enqueue(op_type, payload, options).await.map(Some)
    }

    pub fn is_network_error(&self, message: &str) -> bool {
        self.inner.classifier.is_network_error(message)
    }

    /// Cancel a pending operation. Returns false for any other status.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, QueueError> {
        let cancelled = {
            let _guard = self.inner.transitions.lock().await;
            match self.inner.store.get(id).await? {
                Some(mut op) if op.status == OperationStatus::Pending => {
                    op.set_status(OperationStatus::Cancelled);
                    self.inner.store.update(&op).await?;
                    Some(op)
                }
                _ => None,
            }
        };
        match cancelled {
            Some(op) => {
                info!("Cancelled operation {}", id);
                self.inner.announce("queue.cancelled", &op, Priority::Normal).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Make an operation due immediately.
    ///
    /// A pending operation skips its backoff; a failed one is revived with
    /// its retry count reset.
    pub async fn retry_now(&self, id: Uuid) -> Result<bool, QueueError> {
        let revived = {
            let _guard = self.inner.transitions.lock().await;
            let Some(mut op) = self.inner.store.get(id).await? else {
                return Ok(false);
            };
            match op.status {
                OperationStatus::Pending => {}
                OperationStatus::Failed => op.retry_count = 0,
                _ => return Ok(false),
            }
            op.next_retry_at = Utc::now();
            op.set_status(OperationStatus::Pending);
            self.inner.store.update(&op).await?;
            op
        };
        info!("Retrying operation {} now", revived.id);
        self.inner.kick.notify_one();
        Ok(true)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>, QueueError> {
        self.inner.store.get(id).await
    }

    pub async fn list(&self, status: Option<OperationStatus>) -> Result<Vec<QueuedOperation>, QueueError> {
        self.inner.store.list(status).await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for (status, count) in self.inner.store.counts().await? {
            stats.add(status, count);
        }
        stats.in_flight = self.inner.in_flight.lock().len();
        stats.online = self.is_online();
        Ok(stats)
    }

    /// Delete terminal operations untouched for `older_than`.
    pub async fn purge_terminal(&self, older_than: Duration) -> Result<usize, QueueError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| QueueError::InvalidOperation(e.to_string()))?;
        let purged = self.inner.store.delete_terminal(Utc::now() - age).await?;
        if purged > 0 {
            info!("Purged {} terminal operations", purged);
        }
        Ok(purged)
    }

    /// Recover operations interrupted mid-attempt by a previous process.
    pub async fn restore(&self) -> Result<usize, QueueError> {
        let restored = {
            let _guard = self.inner.transitions.lock().await;
            self.inner.store.reset_processing().await?
        };
        if restored > 0 {
            info!("Restored {} interrupted operations", restored);
        }
        self.inner.kick.notify_one();
        Ok(restored)
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Record a connectivity change. Going online triggers a dispatch pass.
    pub async fn set_online(&self, online: bool) {
        let previous = self.inner.online.send_replace(online);
        if previous == online {
            return;
        }
        let channel = if online {
            "connectivity.online"
        } else {
            "connectivity.offline"
        };
        info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        let options = PublishOptions::new()
            .with_priority(Priority::High)
            .with_source(EVENT_SOURCE);
        if let Err(e) = self
            .inner
            .bus
            .publish(channel, EventPayload::Connectivity(ConnectivityEvent { online }), options)
            .await
        {
            warn!("Failed to announce {}: {}", channel, e);
        }
        if online {
            self.inner.kick.notify_one();
        }
    }

    /// Run one dispatch pass and wait for its attempts to settle.
    ///
    /// Returns the number of operations attempted.
    pub async fn process_once(&self) -> Result<usize, QueueError> {
        let handles = self.inner.clone().dispatch().await?;
        let count = handles.len();
        join_all(handles).await;
        Ok(count)
    }

    /// Start the background dispatcher. No-op when already running.
    pub fn start(&self) {
        let mut dispatcher = self.inner.dispatcher.lock();
        if dispatcher.is_some() {
            return;
        }
        self.inner.shutdown.send_replace(false);
        let inner = self.inner.clone();
        *dispatcher = Some(tokio::spawn(dispatch_loop(inner)));
        info!(
            "Offline queue started (interval={:?}, concurrency={})",
            self.inner.settings.dispatch_interval, self.inner.settings.max_concurrency
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.dispatcher.lock().is_some()
    }

    /// Stop dispatching and wait up to `timeout` for running attempts.
    ///
    /// Attempts still running afterwards stay `PROCESSING` in the store and
    /// are picked up by the next [`restore`](Self::restore).
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.shutdown.send_replace(true);
        let handle = self.inner.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let settled = self.inner.settled.notified();
            if self.inner.in_flight.lock().is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, settled).await.is_err() {
                warn!(
                    "Offline queue shut down with {} attempts still running",
                    self.inner.in_flight.lock().len()
                );
                break;
            }
        }
        info!("Offline queue stopped");
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("online", &self.is_online())
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish()
    }
}

async fn dispatch_loop(inner: Arc<QueueInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut online = inner.online.subscribe();
    let mut ticker = tokio::time::interval(inner.settings.dispatch_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {}
            _ = inner.kick.notified() => {}
            changed = online.changed() => {
                if changed.is_err() || !*online.borrow_and_update() {
                    continue;
                }
            }
        }
        if let Err(e) = inner.clone().dispatch().await {
            error!("Offline queue dispatch failed: {}", e);
        }
    }
    debug!("Offline queue dispatcher exited");
}

impl QueueInner {
    /// Claim due operations up to the free concurrency and spawn their attempts.
    async fn dispatch(self: Arc<Self>) -> Result<Vec<JoinHandle<()>>, QueueError> {
        let claimed = {
            let _guard = self.transitions.lock().await;
            let capacity = self
                .settings
                .max_concurrency
                .saturating_sub(self.in_flight.lock().len());
            if capacity == 0 {
                return Ok(Vec::new());
            }
            let online = *self.online.borrow();

            let mut claimed = Vec::new();
            for mut op in self.store.due(Utc::now()).await? {
                if claimed.len() >= capacity {
                    break;
                }
                if self.in_flight.lock().contains(&op.id) {
                    continue;
                }
                let handler = self.handlers.read().get(&op.op_type).cloned();
                let Some(handler) = handler else {
                    debug!("No handler for '{}', leaving {} pending", op.op_type, op.id);
                    continue;
                };
                if !online && handler.requires_network() {
                    continue;
                }
                op.set_status(OperationStatus::Processing);
                self.store.update(&op).await?;
                self.in_flight.lock().insert(op.id);
                claimed.push((op, handler));
            }
            claimed
        };

        Ok(claimed
            .into_iter()
            .map(|(op, handler)| {
                let inner = self.clone();
                tokio::spawn(async move { inner.attempt(op, handler).await })
            })
            .collect())
    }

    async fn attempt(self: Arc<Self>, op: QueuedOperation, handler: Arc<dyn OperationHandler>) {
        debug!("Attempting operation {} ({})", op.id, op.op_type);
        let result = match AssertUnwindSafe(handler.handle(&op)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(QueueError::handler("operation handler panicked")),
        };

        if let Err(e) = self.settle(op.clone(), result).await {
            error!("Failed to record outcome of operation {}: {}", op.id, e);
        }

        let mut in_flight = self.in_flight.lock();
        in_flight.remove(&op.id);
        if in_flight.is_empty() {
            self.settled.notify_waiters();
        }
    }

    async fn settle(
        &self,
        mut op: QueuedOperation,
        result: Result<(), QueueError>,
    ) -> Result<(), QueueError> {
        let channel = {
            let _guard = self.transitions.lock().await;
            let channel = match result {
                Ok(()) => {
                    op.last_error = None;
                    op.set_status(OperationStatus::Completed);
                    "queue.completed"
                }
                Err(e) => {
                    op.retry_count += 1;
                    op.last_error = Some(e.to_string());
                    if op.retry_count >= op.max_retries {
                        op.set_status(OperationStatus::Failed);
                        "queue.failed"
                    } else {
                        let delay = self.settings.backoff.delay(op.retry_count);
                        op.next_retry_at =
                            Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                        op.set_status(OperationStatus::Pending);
                        "queue.retry"
                    }
                }
            };
            self.store.update(&op).await?;
            channel
        };

        match op.status {
            OperationStatus::Completed => {
                info!("Operation {} ({}) completed", op.id, op.op_type);
                self.announce(channel, &op, Priority::Normal).await;
            }
            OperationStatus::Failed => {
                let error = op.last_error.clone().unwrap_or_default();
                error!(
                    "Operation {} ({}) failed after {} attempts: {}",
                    op.id, op.op_type, op.retry_count, error
                );
                self.announce(channel, &op, Priority::High).await;
                self.notifier.notify(
                    Notification::error(
                        "Queued action failed",
                        format!(
                            "'{}' gave up after {} attempts: {}",
                            op.op_type, op.retry_count, error
                        ),
                    )
                    .with_source(EVENT_SOURCE),
                );
            }
            _ => {
                warn!(
                    "Operation {} ({}) failed, retry {}/{} at {}",
                    op.id, op.op_type, op.retry_count, op.max_retries, op.next_retry_at
                );
                self.announce(channel, &op, Priority::Normal).await;
            }
        }
        Ok(())
    }

    async fn announce(&self, channel: &str, op: &QueuedOperation, priority: Priority) {
        let payload = EventPayload::Queue(QueueEvent {
            operation_id: op.id.to_string(),
            op_type: op.op_type.clone(),
            status: op.status.as_str().to_string(),
            retry_count: op.retry_count,
            next_retry_at: (op.status == OperationStatus::Pending).then_some(op.next_retry_at),
            error: op.last_error.clone(),
        });
        let options = PublishOptions::new()
            .with_priority(priority)
            .with_source(EVENT_SOURCE);
        if let Err(e) = self.bus.publish(channel, payload, options).await {
            warn!("Failed to announce {}: {}", channel, e);
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
