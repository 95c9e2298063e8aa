//! Event bus implementation.

use futures::FutureExt;
use futures::future::join_all;
use jarvis_protocols::{Event, EventPayload, Priority, response_channel};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::error::BusError;
use crate::handler::{EventHandler, handler_fn};
use crate::pattern::{ChannelPattern, validate_channel};
use crate::types::{BusStats, PublishOptions, SubscribeOptions};

/// Default number of events kept in history.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

struct Subscription {
    id: Uuid,
    pattern: ChannelPattern,
    handler: Arc<dyn EventHandler>,
    priority: Priority,
    once: bool,
    fired: AtomicBool,
}

impl Subscription {
    /// Claim this subscription for one delivery. `once` subscriptions can be
    /// claimed a single time across concurrent publishes.
    fn claim(&self) -> bool {
        !self.once
            || self
                .fired
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

struct BusInner {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    history: Mutex<VecDeque<Event>>,
    history_limit: usize,
    counters: Counters,
}

impl BusInner {
    fn remove(&self, id: Uuid) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }
}

/// Publish/subscribe hub.
///
/// Cloning is cheap and every clone shares the same subscriptions and history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus retaining [`DEFAULT_HISTORY_LIMIT`] events.
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(Vec::new()),
                history: Mutex::new(VecDeque::with_capacity(history_limit.min(1024))),
                history_limit,
                counters: Counters::default(),
            }),
        }
    }

    /// Subscribe a handler to a channel pattern.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BusError> {
        let pattern = ChannelPattern::parse(pattern)?;
        let id = Uuid::new_v4();
        debug!(%id, %pattern, priority = %options.priority, once = options.once, "Subscribing");

        self.inner.subscriptions.write().push(Arc::new(Subscription {
            id,
            pattern,
            handler,
            priority: options.priority,
            once: options.once,
            fired: AtomicBool::new(false),
        }));

        Ok(SubscriptionHandle {
            id,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Remove a subscription. Returns false when it was already gone.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.inner.remove(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    /// Publish with default options.
    pub async fn emit(
        &self,
        channel: &str,
        payload: impl Into<EventPayload>,
    ) -> Result<Event, BusError> {
        self.publish(channel, payload.into(), PublishOptions::default())
            .await
    }

    /// Build an event, record it and deliver it to every matching subscription.
    ///
    /// Returns once every handler tier has settled.
    pub async fn publish(
        &self,
        channel: &str,
        payload: EventPayload,
        options: PublishOptions,
    ) -> Result<Event, BusError> {
        validate_channel(channel)?;

        let mut event = Event::new(channel, payload).with_priority(options.priority);
        if let Some(source) = options.source {
            event = event.with_source(source);
        }
        if let Some(correlation_id) = options.correlation_id {
            event = event.with_correlation_id(correlation_id);
        }

        self.publish_event(event.clone()).await;
        Ok(event)
    }

    /// Deliver a pre-built event.
    pub async fn publish_event(&self, event: Event) {
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        self.record(&event);

        let matched = self.take_matching(&event.channel);
        trace!(channel = %event.channel, handlers = matched.len(), "Publishing event");
        if matched.is_empty() {
            return;
        }

        for tier in Priority::DESCENDING {
            let handlers: Vec<&Arc<Subscription>> =
                matched.iter().filter(|s| s.priority == tier).collect();
            if handlers.is_empty() {
                continue;
            }
            self.dispatch_tier(&event, &handlers).await;
        }
    }

    /// Collect matching subscriptions, consuming `once` subscriptions.
    fn take_matching(&self, channel: &str) -> Vec<Arc<Subscription>> {
        let mut consumed_once = false;
        let matched: Vec<Arc<Subscription>> = {
            let subs = self.inner.subscriptions.read();
            subs.iter()
                .filter(|s| s.pattern.matches(channel))
                .filter(|s| {
                    let claimed = s.claim();
                    consumed_once |= claimed && s.once;
                    claimed
                })
                .cloned()
                .collect()
        };

        if consumed_once {
            self.inner
                .subscriptions
                .write()
                .retain(|s| !(s.once && s.fired.load(Ordering::SeqCst)));
        }
        matched
    }

    async fn dispatch_tier(&self, event: &Event, handlers: &[&Arc<Subscription>]) {
        let runs = handlers.iter().map(|sub| {
            let handler = sub.handler.clone();
            async move {
                let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
                (sub.id, outcome)
            }
        });

        for (id, outcome) in join_all(runs).await {
            match outcome {
                Ok(Ok(())) => {
                    self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(subscription = %id, channel = %event.channel, error = %e, "Event handler failed");
                }
                Err(_) => {
                    self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(subscription = %id, channel = %event.channel, "Event handler panicked");
                }
            }
        }
    }

    fn record(&self, event: &Event) {
        if self.inner.history_limit == 0 {
            return;
        }
        let mut history = self.inner.history.lock();
        if history.len() >= self.inner.history_limit {
            history.pop_front();
        }
        history.push_back(event.clone());
    }

    /// Publish a request and wait for a reply on its response channel.
    pub async fn request(
        &self,
        channel: &str,
        payload: EventPayload,
        timeout: Duration,
    ) -> Result<Event, BusError> {
        validate_channel(channel)?;
        let correlation_id = Uuid::new_v4().to_string();
        let reply_channel = response_channel(channel, &correlation_id);

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let handle = self.subscribe(
            &reply_channel,
            handler_fn(move |event| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(event);
                }
                async { Ok(()) }
            }),
            SubscribeOptions::once().with_priority(Priority::Critical),
        )?;

        self.publish(
            channel,
            payload,
            PublishOptions::default().with_correlation_id(correlation_id),
        )
        .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => {
                handle.unsubscribe();
                Err(BusError::Timeout {
                    channel: channel.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Reply to a request event on its response channel.
    pub async fn reply(&self, request: &Event, payload: EventPayload) -> Result<Event, BusError> {
        let correlation_id = request
            .correlation_id
            .as_ref()
            .ok_or_else(|| BusError::NoCorrelation(request.channel.clone()))?;
        let channel = response_channel(&request.channel, correlation_id);
        self.publish(
            &channel,
            payload,
            PublishOptions::default()
                .with_priority(request.priority)
                .with_correlation_id(correlation_id.clone()),
        )
        .await
    }

    /// Most recent events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Event> {
        let history = self.inner.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Most recent events on channels matching `pattern`, oldest first.
    pub fn history_matching(&self, pattern: &str, limit: usize) -> Result<Vec<Event>, BusError> {
        let pattern = ChannelPattern::parse(pattern)?;
        let history = self.inner.history.lock();
        let mut events: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| pattern.matches(&e.channel))
            .take(limit)
            .cloned()
            .collect();
        events.reverse();
        Ok(events)
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    pub fn stats(&self) -> BusStats {
        let c = &self.inner.counters;
        BusStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            handler_failures: c.failed.load(Ordering::Relaxed),
            subscriptions: self.subscription_count(),
            history_len: self.inner.history.lock().len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle keeps the subscription alive.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    bus: Weak<BusInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the subscription. Idempotent.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
