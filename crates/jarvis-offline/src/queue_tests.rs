use super::*;
use crate::backoff::BackoffPolicy;
use crate::handler::operation_fn;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

#[derive(Default)]
struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

fn settings() -> QueueSettings {
    QueueSettings::default()
        .with_backoff(BackoffPolicy::new(
            Duration::from_millis(1000),
            2.0,
            Duration::from_secs(60),
        ))
        .with_max_concurrency(3)
        .with_default_max_retries(3)
}

fn queue_with(settings: QueueSettings) -> (OfflineQueue, EventBus, Arc<RecordingNotifier>) {
    let bus = EventBus::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let queue = OfflineQueue::new(
        Arc::new(MemoryOperationStore::new()),
        bus.clone(),
        notifier.clone(),
        settings,
    )
    .unwrap();
    (queue, bus, notifier)
}

fn counting_handler(requires_network: bool, counter: Arc<AtomicUsize>) -> Arc<dyn OperationHandler> {
    operation_fn(requires_network, move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

fn failing_handler(message: &'static str) -> Arc<dyn OperationHandler> {
    operation_fn(true, move |_| async move { Err(QueueError::network(message)) })
}

fn channels(bus: &EventBus) -> Vec<String> {
    bus.history(100).into_iter().map(|e| e.channel).collect()
}

#[tokio::test]
async fn test_enqueue_and_complete() {
    let (queue, bus, _) = queue_with(settings());
    let runs = Arc::new(AtomicUsize::new(0));
    queue.register_handler("ai.complete", counting_handler(true, runs.clone()));

    let id = queue
        .enqueue("ai.complete", json!({ "prompt": "hi" }), EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(queue.process_once().await.unwrap(), 1);

    let op = queue.get(id).await.unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(channels(&bus), vec!["queue.enqueued", "queue.completed"]);

    // Terminal operations are never picked up again
    assert_eq!(queue.process_once().await.unwrap(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_gaps_increase_until_failed() {
    let (queue, bus, notifier) = queue_with(settings());
    queue.register_handler("home.lights", failing_handler("connection refused"));

    let id = queue
        .enqueue(
            "home.lights",
            json!({ "on": true }),
            EnqueueOptions::new().with_max_retries(4),
        )
        .await
        .unwrap();

    let mut gaps = Vec::new();
    loop {
        assert_eq!(queue.process_once().await.unwrap(), 1);
        let op = queue.get(id).await.unwrap().unwrap();
        if op.status == OperationStatus::Failed {
            assert_eq!(op.retry_count, 4);
            break;
        }
        assert_eq!(op.status, OperationStatus::Pending);
        gaps.push(op.next_retry_at - op.updated_at);
        // Not due yet
        assert_eq!(queue.process_once().await.unwrap(), 0);
        assert!(queue.retry_now(id).await.unwrap());
    }

    assert_eq!(gaps.len(), 3);
    assert!(gaps.windows(2).all(|w| w[0] < w[1]), "gaps not increasing: {gaps:?}");

    // No further scheduling once failed
    assert_eq!(queue.process_once().await.unwrap(), 0);

    let history = channels(&bus);
    assert_eq!(history.iter().filter(|c| *c == "queue.retry").count(), 3);
    assert_eq!(history.last().map(String::as_str), Some("queue.failed"));

    let notifications = notifier.notifications.lock();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, jarvis_protocols::NotificationLevel::Error);
    assert!(notifications[0].message.contains("home.lights"));
}

#[tokio::test]
async fn test_retry_now_revives_failed() {
    let (queue, _, _) = queue_with(settings());
    queue.register_handler("sync", failing_handler("network down"));
    let id = queue
        .enqueue("sync", json!({}), EnqueueOptions::new().with_max_retries(1))
        .await
        .unwrap();
    queue.process_once().await.unwrap();
    assert_eq!(
        queue.get(id).await.unwrap().unwrap().status,
        OperationStatus::Failed
    );

    let runs = Arc::new(AtomicUsize::new(0));
    queue.register_handler("sync", counting_handler(true, runs.clone()));
    assert!(queue.retry_now(id).await.unwrap());
    let op = queue.get(id).await.unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.retry_count, 0);

    queue.process_once().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        queue.get(id).await.unwrap().unwrap().status,
        OperationStatus::Completed
    );
    // Completed operations are not resurrected
    assert!(!queue.retry_now(id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_pending_prevents_execution() {
    let (queue, bus, _) = queue_with(settings());
    let runs = Arc::new(AtomicUsize::new(0));
    queue.register_handler("ai.embed", counting_handler(true, runs.clone()));

    let id = queue
        .enqueue("ai.embed", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    assert!(queue.cancel(id).await.unwrap());
    assert!(!queue.cancel(id).await.unwrap());
    assert!(!queue.cancel(Uuid::new_v4()).await.unwrap());

    assert_eq!(queue.process_once().await.unwrap(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(channels(&bus).contains(&"queue.cancelled".to_string()));
}

#[tokio::test]
async fn test_cancel_while_processing_is_refused() {
    let (queue, _, _) = queue_with(settings());
    let gate = Arc::new(Notify::new());
    let g = gate.clone();
    queue.register_handler(
        "slow",
        operation_fn(true, move |_| {
            let g = g.clone();
            async move {
                g.notified().await;
                Ok(())
            }
        }),
    );

    let id = queue
        .enqueue("slow", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let worker = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.process_once().await })
    };

    for _ in 0..100 {
        if queue.get(id).await.unwrap().unwrap().status == OperationStatus::Processing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!queue.cancel(id).await.unwrap());
    assert_eq!(queue.stats().await.unwrap().in_flight, 1);

    gate.notify_one();
    worker.await.unwrap().unwrap();
    assert_eq!(
        queue.get(id).await.unwrap().unwrap().status,
        OperationStatus::Completed
    );
}

#[tokio::test]
async fn test_restore_resets_interrupted_operations() {
    let store = Arc::new(MemoryOperationStore::new());
    let mut interrupted = QueuedOperation::new("memory.write", json!({}), 3);
    interrupted.set_status(OperationStatus::Processing);
    store.insert(&interrupted).await.unwrap();

    let queue = OfflineQueue::new(
        store.clone(),
        EventBus::new(),
        Arc::new(RecordingNotifier::default()),
        settings(),
    )
    .unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    queue.register_handler("memory.write", counting_handler(false, runs.clone()));

    // Processing operations are not due until restored
    assert_eq!(queue.process_once().await.unwrap(), 0);
    assert_eq!(queue.restore().await.unwrap(), 1);
    assert_eq!(queue.process_once().await.unwrap(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_offline_skips_network_operations() {
    let (queue, bus, _) = queue_with(settings());
    let remote = Arc::new(AtomicUsize::new(0));
    let local = Arc::new(AtomicUsize::new(0));
    queue.register_handler("ai.complete", counting_handler(true, remote.clone()));
    queue.register_handler("storage.flush", counting_handler(false, local.clone()));

    queue.set_online(false).await;
    assert!(!queue.is_online());
    queue
        .enqueue("ai.complete", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    queue
        .enqueue("storage.flush", json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(queue.process_once().await.unwrap(), 1);
    assert_eq!(remote.load(Ordering::SeqCst), 0);
    assert_eq!(local.load(Ordering::SeqCst), 1);

    queue.set_online(true).await;
    assert_eq!(queue.process_once().await.unwrap(), 1);
    assert_eq!(remote.load(Ordering::SeqCst), 1);

    let history = channels(&bus);
    assert!(history.contains(&"connectivity.offline".to_string()));
    assert!(history.contains(&"connectivity.online".to_string()));
}

#[tokio::test]
async fn test_set_online_only_announces_changes() {
    let (queue, bus, _) = queue_with(settings());
    queue.set_online(true).await;
    assert!(bus.history(10).is_empty());
}

#[tokio::test]
async fn test_priority_then_age_dispatch() {
    let (queue, _, _) = queue_with(settings().with_max_concurrency(1));
    let order = Arc::new(Mutex::new(Vec::new()));
    let o = order.clone();
    queue.register_handler(
        "task",
        operation_fn(false, move |op| {
            let o = o.clone();
            async move {
                o.lock().push(op.payload["name"].as_str().unwrap_or_default().to_string());
                Ok(())
            }
        }),
    );

    for (name, priority) in [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("critical", Priority::Critical),
        ("normal-2", Priority::Normal),
    ] {
        queue
            .enqueue(
                "task",
                json!({ "name": name }),
                EnqueueOptions::new().with_priority(priority),
            )
            .await
            .unwrap();
    }
    while queue.process_once().await.unwrap() > 0 {}

    assert_eq!(*order.lock(), vec!["critical", "normal", "normal-2", "low"]);
}

#[tokio::test]
async fn test_concurrency_bound() {
    let (queue, _, _) = queue_with(settings().with_max_concurrency(2));
    let runs = Arc::new(AtomicUsize::new(0));
    queue.register_handler("bulk", counting_handler(false, runs.clone()));
    for _ in 0..5 {
        queue
            .enqueue("bulk", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
    }

    assert_eq!(queue.process_once().await.unwrap(), 2);
    assert_eq!(queue.process_once().await.unwrap(), 2);
    assert_eq!(queue.process_once().await.unwrap(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_operations_without_handler_stay_pending() {
    let (queue, _, _) = queue_with(settings());
    let id = queue
        .enqueue("unknown.kind", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(queue.process_once().await.unwrap(), 0);
    assert_eq!(
        queue.get(id).await.unwrap().unwrap().status,
        OperationStatus::Pending
    );
}

#[tokio::test]
async fn test_panicking_handler_counts_as_failure() {
    let (queue, _, _) = queue_with(settings());
    queue.register_handler(
        "boom",
        operation_fn(true, |op: QueuedOperation| async move {
            if op.op_type == "boom" {
                panic!("handler exploded");
            }
            Ok(())
        }),
    );
    let id = queue
        .enqueue("boom", json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    queue.process_once().await.unwrap();
    let op = queue.get(id).await.unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.retry_count, 1);
    assert!(op.last_error.unwrap().contains("panicked"));
    assert_eq!(queue.stats().await.unwrap().in_flight, 0);
}

#[tokio::test]
async fn test_hand_off_classifies_errors() {
    let (queue, _, _) = queue_with(settings());
    let queued = queue
        .hand_off(
            "ai.complete",
            json!({}),
            EnqueueOptions::default(),
            "fetch failed: ECONNRESET",
        )
        .await
        .unwrap();
    assert!(queued.is_some());

    let skipped = queue
        .hand_off(
            "ai.complete",
            json!({}),
            EnqueueOptions::default(),
            "invalid api key",
        )
        .await
        .unwrap();
    assert!(skipped.is_none());
    assert_eq!(queue.stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_enqueue_rejects_empty_type() {
    let (queue, bus, _) = queue_with(settings());
    let err = queue
        .enqueue("  ", json!({}), EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidOperation(_)));
    assert_eq!(queue.stats().await.unwrap().total(), 0);
    assert!(bus.history(10).is_empty());
}

#[tokio::test]
async fn test_stats_and_purge() {
    let (queue, _, _) = queue_with(settings());
    let runs = Arc::new(AtomicUsize::new(0));
    queue.register_handler("done", counting_handler(false, runs));
    queue
        .enqueue("done", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let cancelled = queue
        .enqueue("waiting", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    queue
        .enqueue("waiting", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    queue.cancel(cancelled).await.unwrap();
    queue.process_once().await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.pending, 1);
    assert!(stats.online);

    assert_eq!(queue.purge_terminal(Duration::from_secs(3600)).await.unwrap(), 0);
    assert_eq!(queue.purge_terminal(Duration::ZERO).await.unwrap(), 2);
    assert_eq!(queue.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_background_dispatcher() {
    let (queue, _, _) = queue_with(settings().with_dispatch_interval(Duration::from_millis(20)));
    let runs = Arc::new(AtomicUsize::new(0));
    queue.register_handler("ping", counting_handler(false, runs.clone()));

    queue.start();
    queue.start();
    assert!(queue.is_running());

    let id = queue
        .enqueue("ping", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    for _ in 0..100 {
        if runs.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    queue.shutdown(Duration::from_secs(1)).await;
    assert!(!queue.is_running());
    // Allow the attempt's final write to land
    for _ in 0..100 {
        if queue.get(id).await.unwrap().unwrap().status == OperationStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        queue.get(id).await.unwrap().unwrap().status,
        OperationStatus::Completed
    );
}

#[tokio::test]
async fn test_persistent_queue_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    let config = jarvis_config::QueueConfig::default();

    let id = {
        let queue = OfflineQueue::from_config(
            &config,
            &db_path,
            EventBus::new(),
            Arc::new(RecordingNotifier::default()),
        )
        .await
        .unwrap();
        queue
            .enqueue(
                "home.scene",
                json!({ "scene": "evening" }),
                EnqueueOptions::new().with_priority(Priority::High),
            )
            .await
            .unwrap()
    };

    let queue = OfflineQueue::from_config(
        &config,
        &db_path,
        EventBus::new(),
        Arc::new(RecordingNotifier::default()),
    )
    .await
    .unwrap();
    let pending = queue.list(Some(OperationStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].payload["scene"], "evening");
    assert_eq!(pending[0].priority, Priority::High);
}
