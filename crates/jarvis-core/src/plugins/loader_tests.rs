use super::*;
use async_trait::async_trait;
use jarvis_bus::{SubscribeOptions, sync_handler};
use jarvis_config::ResourcesConfig;
use jarvis_protocols::{ErrorKind, Event, NullHost, QuotaSpec};
use serde_json::json;

#[derive(Clone, Default)]
struct Behavior {
    fail_init: bool,
    hang_init: bool,
    panic_on_start: bool,
    subscribe: Option<String>,
    export: Option<(String, String)>,
}

struct Scripted {
    behavior: Behavior,
    log: Arc<Mutex<Vec<String>>>,
    ctx: Option<PluginContext>,
}

#[async_trait]
impl Plugin for Scripted {
    async fn initialize(&mut self, ctx: PluginContext) -> Result<(), PluginError> {
        self.log.lock().push("initialize".to_string());
        if self.behavior.hang_init {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.behavior.fail_init {
            return Err(PluginError::Execution("init failed".to_string()));
        }
        if let Some(ref pattern) = self.behavior.subscribe {
            ctx.events().subscribe(pattern, Arc::new(|_: Event| {}))?;
        }
        if let Some((ref name, ref handler)) = self.behavior.export {
            ctx.capabilities().register(name, handler)?;
        }
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), PluginError> {
        self.log.lock().push("start".to_string());
        if self.behavior.panic_on_start {
            panic!("start exploded");
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PluginError> {
        self.log.lock().push("stop".to_string());
        Ok(())
    }

    async fn destroy(&mut self) -> Result<(), PluginError> {
        self.log.lock().push("destroy".to_string());
        Ok(())
    }

    async fn on_message(&mut self, message: Value) -> Result<Option<Value>, PluginError> {
        if let Some(target) = message.get("invoke").and_then(Value::as_str) {
            let ctx = self
                .ctx
                .as_ref()
                .ok_or_else(|| PluginError::Execution("no context".to_string()))?;
            let result = ctx
                .capabilities()
                .invoke(target, json!({ "from": ctx.plugin_id() }))
                .await?;
            return Ok(Some(result));
        }
        Ok(Some(json!({ "echo": message })))
    }

    async fn handle_capability(&mut self, handler: &str, args: Value) -> Result<Value, PluginError> {
        match handler {
            "echo" => Ok(args),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
            other => Err(PluginError::Execution(format!("no handler {}", other))),
        }
    }
}

fn scripted(behavior: Behavior) -> (Box<dyn Plugin>, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let plugin = Scripted {
        behavior,
        log: Arc::clone(&log),
        ctx: None,
    };
    (Box::new(plugin), log)
}

fn manifest(id: &str) -> PluginManifest {
    PluginManifest::new(id, format!("Scripted {}", id), "1.0.0", "scripted")
}

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<Notification>>);

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.0.lock().push(notification);
    }
}

struct EchoCompute;

#[async_trait]
impl ComputeAccess for EchoCompute {
    async fn compute(&self, _caller: &str, kind: &str, payload: Value) -> Result<Value, CapabilityError> {
        Ok(json!({ "kind": kind, "payload": payload }))
    }
}

struct Harness {
    loader: PluginLoader,
    bus: EventBus,
    resources: Arc<ResourceManager>,
    notifier: Arc<RecordingNotifier>,
    lifecycle: Arc<Mutex<Vec<(String, PluginState)>>>,
}

impl Harness {
    fn channels(&self) -> Vec<String> {
        self.lifecycle.lock().iter().map(|(c, _)| c.clone()).collect()
    }
}

fn harness() -> Harness {
    let bus = EventBus::new();
    let resources = Arc::new(ResourceManager::new(&ResourcesConfig::default()));
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lifecycle);
    bus.subscribe(
        "plugin.*",
        sync_handler(move |e: &Event| {
            if let EventPayload::Plugin(ref p) = e.payload {
                sink.lock().push((e.channel.clone(), p.state));
            }
        }),
        SubscribeOptions::new(),
    )
    .unwrap();

    let settings = LoaderSettings::default()
        .with_hook_timeout(Duration::from_millis(200))
        .with_capability_timeout(Duration::from_millis(200));
    let loader = PluginLoader::new(
        EngineVersion::new(1, 2),
        settings,
        LoaderServices {
            bus: bus.clone(),
            resources: Arc::clone(&resources),
            host: Arc::new(NullHost),
            notifier: notifier.clone(),
            compute: Arc::new(EchoCompute),
        },
    );
    Harness {
        loader,
        bus,
        resources,
        notifier,
        lifecycle,
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let h = harness();
    let (plugin, log) = scripted(Behavior::default());

    h.loader.load(manifest("p"), plugin).await.unwrap();
    assert_eq!(h.loader.state("p"), PluginState::Loaded);
    assert!(h.loader.is_loaded("p"));
    assert_eq!(h.resources.quota("p").unwrap().max_concurrent_tasks, 5);

    h.loader.start("p").await.unwrap();
    assert_eq!(h.loader.state("p"), PluginState::Enabled);
    h.loader.stop("p").await.unwrap();
    assert_eq!(h.loader.state("p"), PluginState::Disabled);
    h.loader.start("p").await.unwrap();

    h.loader.unload("p").await.unwrap();
    assert_eq!(h.loader.state("p"), PluginState::Unloaded);
    assert!(h.resources.quota("p").is_none());

    assert_eq!(
        *log.lock(),
        vec!["initialize", "start", "stop", "start", "stop", "destroy"]
    );
    assert_eq!(
        h.channels(),
        vec![
            "plugin.initializing",
            "plugin.load",
            "plugin.start",
            "plugin.stop",
            "plugin.start",
            "plugin.unload"
        ]
    );
    assert!(h.notifier.0.lock().is_empty());
}

#[tokio::test]
async fn test_hooks_are_accounted_against_the_tenant() {
    let h = harness();
    let (plugin, _) = scripted(Behavior::default());
    h.loader.load(manifest("p"), plugin).await.unwrap();
    h.loader.start("p").await.unwrap();

    let usage = h.resources.usage("p").unwrap();
    assert_eq!(usage.active_tasks, 0);
    assert_eq!(usage.recent_requests, 2);
}

#[tokio::test]
async fn test_invalid_manifest_has_no_side_effects() {
    let h = harness();
    let mut bad = manifest("p").with_capability("p.echo", "echo");
    bad.id = String::new();
    let (plugin, log) = scripted(Behavior::default());

    let err = h.loader.load(bad, plugin).await.unwrap_err();
    assert!(matches!(err, PluginError::InvalidManifest(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(log.lock().is_empty());
    assert!(h.loader.is_empty());
    assert_eq!(h.resources.tenant_count(), 0);
    assert!(h.loader.capability_names().is_empty());
    assert!(h.channels().is_empty());
}

#[tokio::test]
async fn test_incompatible_engine_is_rejected() {
    let h = harness();
    let (plugin, _) = scripted(Behavior::default());
    let err = h
        .loader
        .load(manifest("p").with_engine("1.5"), plugin)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::IncompatibleEngine { .. }));

    let (plugin, _) = scripted(Behavior::default());
    h.loader
        .load(manifest("p").with_engine("1.1"), plugin)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_initialize_failure_aborts_load() {
    let h = harness();
    let (plugin, log) = scripted(Behavior {
        fail_init: true,
        ..Default::default()
    });

    let err = h
        .loader
        .load(manifest("p").with_capability("p.echo", "echo"), plugin)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::HookFailed { .. }));
    assert_eq!(*log.lock(), vec!["initialize", "destroy"]);
    assert_eq!(h.loader.state("p"), PluginState::Unloaded);
    assert_eq!(h.resources.tenant_count(), 0);
    assert!(h.loader.capability_names().is_empty());
    assert_eq!(h.channels(), vec!["plugin.initializing", "plugin.error"]);

    let notes = h.notifier.0.lock();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].source, "p");
}

#[tokio::test]
async fn test_initialize_timeout_aborts_load() {
    let h = harness();
    let (plugin, _) = scripted(Behavior {
        hang_init: true,
        ..Default::default()
    });

    let started = std::time::Instant::now();
    let err = h.loader.load(manifest("p"), plugin).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(err, PluginError::HookTimeout { .. }));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!h.loader.is_loaded("p"));
    assert_eq!(h.resources.tenant_count(), 0);
}

#[tokio::test]
async fn test_illegal_transitions() {
    let h = harness();
    let (plugin, _) = scripted(Behavior::default());
    h.loader.load(manifest("p"), plugin).await.unwrap();

    let err = h.loader.stop("p").await.unwrap_err();
    assert!(matches!(err, PluginError::InvalidTransition { .. }));
    assert_eq!(err.kind(), ErrorKind::State);

    h.loader.start("p").await.unwrap();
    assert!(h.loader.start("p").await.is_err());
    assert!(matches!(
        h.loader.start("missing").await,
        Err(PluginError::NotFound(_))
    ));
    assert!(matches!(
        h.loader.unload("missing").await,
        Err(PluginError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_admission_denial_leaves_state_unchanged() {
    let h = harness();
    let (plugin, log) = scripted(Behavior::default());
    let quota = QuotaSpec {
        max_concurrent_tasks: Some(1),
        ..Default::default()
    };
    h.loader
        .load(manifest("p").with_quota(quota), plugin)
        .await
        .unwrap();
    assert_eq!(h.resources.quota("p").unwrap().max_concurrent_tasks, 1);

    h.resources.start_task("p").unwrap();
    let err = h.loader.start("p").await.unwrap_err();
    assert!(matches!(err, PluginError::AdmissionDenied { .. }));
    assert_eq!(err.kind(), ErrorKind::Admission);
    assert_eq!(h.loader.state("p"), PluginState::Loaded);
    assert_eq!(*log.lock(), vec!["initialize"]);

    h.resources.end_task("p");
    h.loader.start("p").await.unwrap();
    assert_eq!(h.loader.state("p"), PluginState::Enabled);
}

#[tokio::test]
async fn test_panicking_hook_fails_only_that_transition() {
    let h = harness();
    let (plugin, _) = scripted(Behavior {
        panic_on_start: true,
        ..Default::default()
    });
    h.loader.load(manifest("p"), plugin).await.unwrap();

    let err = h.loader.start("p").await.unwrap_err();
    assert!(matches!(err, PluginError::HookFailed { .. }));
    assert_eq!(h.loader.state("p"), PluginState::Loaded);
    assert_eq!(h.resources.usage("p").unwrap().active_tasks, 0);
    assert_eq!(h.notifier.0.lock().len(), 1);

    h.loader.unload("p").await.unwrap();
}

#[tokio::test]
async fn test_reload_replaces_instance() {
    let h = harness();
    let (first, first_log) = scripted(Behavior::default());
    let (second, second_log) = scripted(Behavior::default());

    h.loader.load(manifest("p"), first).await.unwrap();
    h.loader.start("p").await.unwrap();
    h.loader.load(manifest("p"), second).await.unwrap();

    assert_eq!(
        *first_log.lock(),
        vec!["initialize", "start", "stop", "destroy"]
    );
    assert_eq!(*second_log.lock(), vec!["initialize"]);
    assert_eq!(h.loader.len(), 1);
    assert_eq!(h.resources.tenant_count(), 1);
    assert_eq!(h.loader.state("p"), PluginState::Loaded);
}

#[tokio::test]
async fn test_repeated_load_unload_does_not_leak() {
    let h = harness();
    let baseline = h.bus.subscription_count();
    let behavior = Behavior {
        subscribe: Some("home.*".to_string()),
        export: Some(("p.dynamic".to_string(), "echo".to_string())),
        ..Default::default()
    };
    let m = manifest("p")
        .with_permission("events:subscribe")
        .with_permission("capabilities:register")
        .with_capability("p.echo", "echo");

    for _ in 0..3 {
        let (plugin, _) = scripted(behavior.clone());
        h.loader.load(m.clone(), plugin).await.unwrap();
        assert_eq!(h.bus.subscription_count(), baseline + 1);
        assert_eq!(h.loader.subscription_count("p"), 1);
        assert_eq!(h.loader.capability_names(), vec!["p.dynamic", "p.echo"]);
        h.loader.unload("p").await.unwrap();
    }

    let (plugin, _) = scripted(behavior);
    h.loader.load(m, plugin).await.unwrap();
    assert_eq!(h.loader.len(), 1);
    assert_eq!(h.resources.tenant_count(), 1);
    h.loader.unload("p").await.unwrap();

    assert_eq!(h.bus.subscription_count(), baseline);
    assert_eq!(h.loader.subscription_count("p"), 0);
    assert!(h.loader.capability_names().is_empty());
    assert_eq!(h.resources.tenant_count(), 0);
}

#[tokio::test]
async fn test_ungranted_context_call_fails_load() {
    let h = harness();
    let (plugin, _) = scripted(Behavior {
        subscribe: Some("home.*".to_string()),
        ..Default::default()
    });
    let err = h.loader.load(manifest("p"), plugin).await.unwrap_err();
    assert!(matches!(
        err,
        PluginError::Capability(CapabilityError::PermissionDenied { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(!h.loader.is_loaded("p"));
}

#[tokio::test]
async fn test_invoke_capability() {
    let h = harness();
    let (plugin, _) = scripted(Behavior::default());
    h.loader
        .load(
            manifest("weather")
                .with_capability("weather.echo", "echo")
                .with_capability("weather.slow", "slow"),
            plugin,
        )
        .await
        .unwrap();

    // Loaded but not enabled.
    let err = h
        .loader
        .invoke_capability("weather.echo", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::Capability(CapabilityError::Unavailable(_))
    ));

    h.loader.start("weather").await.unwrap();
    let out = h
        .loader
        .invoke_capability("weather.echo", json!({ "city": "Oslo" }))
        .await
        .unwrap();
    assert_eq!(out, json!({ "city": "Oslo" }));

    let err = h
        .loader
        .invoke_capability("weather.slow", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let err = h
        .loader
        .invoke_capability("nope", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    h.loader.unload("weather").await.unwrap();
    let err = h
        .loader
        .invoke_capability("weather.echo", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_capability_conflict_fails_second_load() {
    let h = harness();
    let (a, _) = scripted(Behavior::default());
    let (b, b_log) = scripted(Behavior::default());
    h.loader
        .load(manifest("a").with_capability("shared.echo", "echo"), a)
        .await
        .unwrap();

    let err = h
        .loader
        .load(manifest("b").with_capability("shared.echo", "echo"), b)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::Capability(CapabilityError::AlreadyRegistered(_))
    ));
    assert_eq!(*b_log.lock(), vec!["initialize", "destroy"]);
    assert!(!h.loader.is_loaded("b"));
    assert_eq!(h.loader.capability_names(), vec!["shared.echo"]);
    assert_eq!(h.loader.list()[0].capabilities, vec!["shared.echo"]);
}

#[tokio::test]
async fn test_send_message() {
    let h = harness();
    let (plugin, _) = scripted(Behavior::default());
    h.loader.load(manifest("p"), plugin).await.unwrap();

    let err = h.loader.send_message("p", json!("hi")).await.unwrap_err();
    assert!(matches!(err, PluginError::InvalidTransition { .. }));

    h.loader.start("p").await.unwrap();
    let reply = h.loader.send_message("p", json!("hi")).await.unwrap();
    assert_eq!(reply, Some(json!({ "echo": "hi" })));
}

#[tokio::test]
async fn test_cross_plugin_invoke_through_context() {
    let h = harness();
    let (server, _) = scripted(Behavior::default());
    let (caller, _) = scripted(Behavior::default());
    let (denied, _) = scripted(Behavior::default());
    h.loader
        .load(manifest("server").with_capability("server.echo", "echo"), server)
        .await
        .unwrap();
    h.loader
        .load(
            manifest("caller")
                .with_permission("capabilities:invoke")
                .with_capability("caller.echo", "echo"),
            caller,
        )
        .await
        .unwrap();
    h.loader.load(manifest("denied"), denied).await.unwrap();
    for id in ["server", "caller", "denied"] {
        h.loader.start(id).await.unwrap();
    }

    let reply = h
        .loader
        .send_message("caller", json!({ "invoke": "server.echo" }))
        .await
        .unwrap();
    assert_eq!(reply, Some(json!({ "from": "caller" })));

    let err = h
        .loader
        .send_message("denied", json!({ "invoke": "server.echo" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);

    let err = h
        .loader
        .send_message("caller", json!({ "invoke": "caller.echo" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_load_entry_uses_factory() {
    let h = harness();
    let err = h.loader.load_entry(manifest("p")).await.unwrap_err();
    assert!(matches!(err, PluginError::UnknownEntry(_)));

    let factory = |_: &PluginManifest| -> Result<Box<dyn Plugin>, PluginError> {
        Ok(scripted(Behavior::default()).0)
    };
    h.loader.register_factory("scripted", Arc::new(factory));
    assert!(h.loader.has_factory("scripted"));
    h.loader.load_entry(manifest("p")).await.unwrap();
    assert_eq!(h.loader.state("p"), PluginState::Loaded);
    assert_eq!(h.loader.manifest("p").unwrap().entry, "scripted");
}

#[tokio::test]
async fn test_unload_all() {
    let h = harness();
    for id in ["a", "b", "c"] {
        let (plugin, _) = scripted(Behavior::default());
        h.loader.load(manifest(id), plugin).await.unwrap();
    }
    h.loader.start("b").await.unwrap();

    let infos = h.loader.list();
    let ids: Vec<_> = infos.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(infos[1].state, PluginState::Enabled);

    assert_eq!(h.loader.unload_all().await, 3);
    assert!(h.loader.is_empty());
    assert_eq!(h.resources.tenant_count(), 0);
}

#[tokio::test]
async fn test_lifecycle_subscriber_may_call_back_into_loader() {
    let h = harness();
    let supervisor = h.loader.clone();
    h.bus
        .subscribe(
            "plugin.load",
            jarvis_bus::handler_fn(move |event: Event| {
                let loader = supervisor.clone();
                async move {
                    if let EventPayload::Plugin(ref p) = event.payload {
                        loader.unload(&p.plugin_id).await.ok();
                    }
                    Ok(())
                }
            }),
            SubscribeOptions::new(),
        )
        .unwrap();

    let (plugin, log) = scripted(Behavior::default());
    tokio::time::timeout(Duration::from_secs(3), h.loader.load(manifest("p"), plugin))
        .await
        .expect("load returned")
        .unwrap();

    assert!(!h.loader.is_loaded("p"));
    assert_eq!(h.resources.tenant_count(), 0);
    assert_eq!(*log.lock(), vec!["initialize", "destroy"]);
    assert_eq!(
        h.channels(),
        vec!["plugin.initializing", "plugin.load", "plugin.unload"]
    );
}

#[tokio::test]
async fn test_error_subscriber_may_unload_all() {
    let h = harness();
    let supervisor = h.loader.clone();
    h.bus
        .subscribe(
            "plugin.error",
            jarvis_bus::handler_fn(move |_event: Event| {
                let loader = supervisor.clone();
                async move {
                    loader.unload_all().await;
                    Ok(())
                }
            }),
            SubscribeOptions::new(),
        )
        .unwrap();

    let (healthy, _) = scripted(Behavior::default());
    h.loader.load(manifest("a"), healthy).await.unwrap();
    let (broken, _) = scripted(Behavior {
        panic_on_start: true,
        ..Default::default()
    });
    h.loader.load(manifest("b"), broken).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(3), h.loader.start("b"))
        .await
        .expect("start returned")
        .unwrap_err();
    assert!(matches!(err, PluginError::HookFailed { .. }));
    assert!(h.loader.is_empty());
}

#[tokio::test]
async fn test_busy_owner_reports_admission_to_caller() {
    let h = harness();
    let (server, _) = scripted(Behavior::default());
    let (caller, _) = scripted(Behavior::default());
    let quota = QuotaSpec {
        max_concurrent_tasks: Some(1),
        ..Default::default()
    };
    h.loader
        .load(
            manifest("server")
                .with_capability("server.echo", "echo")
                .with_quota(quota),
            server,
        )
        .await
        .unwrap();
    h.loader
        .load(manifest("caller").with_permission("capabilities:invoke"), caller)
        .await
        .unwrap();
    h.loader.start("server").await.unwrap();
    h.loader.start("caller").await.unwrap();

    h.resources.start_task("server").unwrap();
    let err = h
        .loader
        .send_message("caller", json!({ "invoke": "server.echo" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Admission);
    match err {
        PluginError::Capability(CapabilityError::AdmissionDenied { plugin, reason }) => {
            assert_eq!(plugin, "server");
            assert!(reason.contains("concurrent"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    h.resources.end_task("server");
    let reply = h
        .loader
        .send_message("caller", json!({ "invoke": "server.echo" }))
        .await
        .unwrap();
    assert_eq!(reply, Some(json!({ "from": "caller" })));
}
