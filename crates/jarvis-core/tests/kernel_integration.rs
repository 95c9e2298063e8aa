//! End-to-end tests against a fully assembled kernel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jarvis_bus::{SubscribeOptions, sync_handler};
use jarvis_config::Config;
use jarvis_core::{Kernel, KernelServices, KernelState};
use jarvis_protocols::{
    CapabilityDomain, CapabilityError, Event, HostRequest, HostServices, LogNotifier, Plugin,
    PluginContext, PluginError, PluginManifest,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Sorts readings on the worker pool and relays `home.*` events it hears.
struct Thermostat {
    ctx: Option<PluginContext>,
    heard: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Plugin for Thermostat {
    async fn initialize(&mut self, ctx: PluginContext) -> Result<(), PluginError> {
        ctx.capabilities().register("thermostat.sorted", "sorted")?;
        let heard = Arc::clone(&self.heard);
        ctx.events().subscribe(
            "home.*",
            Arc::new(move |event: Event| heard.lock().push(event.channel)),
        )?;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn handle_capability(&mut self, handler: &str, args: Value) -> Result<Value, PluginError> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| PluginError::Execution("not initialized".to_string()))?;
        match handler {
            "sorted" => Ok(ctx.system().compute("sort", args).await?),
            other => Err(PluginError::Execution(format!("unknown handler {}", other))),
        }
    }
}

/// Asks the thermostat for sorted readings and announces the result.
struct Assistant {
    ctx: Option<PluginContext>,
}

#[async_trait]
impl Plugin for Assistant {
    async fn initialize(&mut self, ctx: PluginContext) -> Result<(), PluginError> {
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn on_message(&mut self, message: Value) -> Result<Option<Value>, PluginError> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| PluginError::Execution("not initialized".to_string()))?;
        let sorted = ctx
            .capabilities()
            .invoke("thermostat.sorted", message)
            .await?;
        ctx.events()
            .publish("home.report", json!({ "readings": sorted }))
            .await?;
        Ok(Some(sorted))
    }
}

struct SwitchableHost {
    online: AtomicBool,
}

#[async_trait]
impl HostServices for SwitchableHost {
    async fn call(&self, request: HostRequest) -> Result<Value, CapabilityError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(json!({ "method": request.method() }))
        } else {
            Err(CapabilityError::Network("network unreachable".to_string()))
        }
    }
}

fn config(dir: &TempDir, persistent: bool) -> Config {
    let mut config = Config::default();
    config.kernel.data_dir = dir.path().to_path_buf();
    config.kernel.shutdown_timeout_ms = 2_000;
    config.queue.persistent = persistent;
    config.queue.dispatch_interval_ms = 50;
    config.pool.min_workers = 1;
    config.pool.max_workers = 2;
    config
}

#[tokio::test]
async fn test_plugins_cooperate_through_kernel() {
    let dir = TempDir::new().unwrap();
    let kernel = Kernel::new(config(&dir, false), KernelServices::default())
        .await
        .unwrap();
    kernel.start().await.unwrap();

    let lifecycle = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lifecycle);
    kernel
        .bus()
        .subscribe(
            "plugin.*",
            sync_handler(move |e| sink.lock().push(e.channel.clone())),
            SubscribeOptions::new(),
        )
        .unwrap();

    let heard = Arc::new(Mutex::new(Vec::new()));
    let thermostat = PluginManifest::new("thermostat", "Thermostat", "1.0.0", "thermostat")
        .with_permission("capabilities:register")
        .with_permission("events:subscribe")
        .with_permission("system:compute");
    let assistant = PluginManifest::new("assistant", "Assistant", "1.0.0", "assistant")
        .with_permission("capabilities:invoke")
        .with_permission("events:publish");

    let loader = kernel.plugins();
    loader
        .load(
            thermostat,
            Box::new(Thermostat {
                ctx: None,
                heard: Arc::clone(&heard),
            }),
        )
        .await
        .unwrap();
    loader
        .load(assistant, Box::new(Assistant { ctx: None }))
        .await
        .unwrap();
    loader.start("thermostat").await.unwrap();
    loader.start("assistant").await.unwrap();

    let reply = loader
        .send_message("assistant", json!([21, 19, 20]))
        .await
        .unwrap();
    assert_eq!(reply, Some(json!([19, 20, 21])));
    assert_eq!(*heard.lock(), vec!["home.report"]);

    kernel.stop().await.unwrap();
    assert_eq!(kernel.state(), KernelState::Stopped);
    assert!(loader.is_empty());
    assert_eq!(kernel.resources().tenant_count(), 0);

    let channels = lifecycle.lock().clone();
    assert_eq!(channels.iter().filter(|c| *c == "plugin.start").count(), 2);
    assert_eq!(channels.iter().filter(|c| *c == "plugin.unload").count(), 2);
    assert!(!channels.iter().any(|c| c.starts_with("kernel.")));
}

#[tokio::test]
async fn test_queued_host_call_survives_restart() {
    let dir = TempDir::new().unwrap();
    let request = HostRequest::new(
        "lights",
        CapabilityDomain::System,
        "toggle",
        json!({ "room": "hall" }),
    );

    {
        let host = Arc::new(SwitchableHost {
            online: AtomicBool::new(false),
        });
        let kernel = Kernel::new(
            config(&dir, true),
            KernelServices::new(host, Arc::new(LogNotifier)),
        )
        .await
        .unwrap();
        assert!(kernel.call_host(request).await.is_err());
        assert_eq!(kernel.queue().stats().await.unwrap().pending, 1);
        kernel.pool().terminate();
    }

    let host = Arc::new(SwitchableHost {
        online: AtomicBool::new(true),
    });
    let kernel = Kernel::new(
        config(&dir, true),
        KernelServices::new(host, Arc::new(LogNotifier)),
    )
    .await
    .unwrap();
    assert_eq!(kernel.queue().stats().await.unwrap().pending, 1);

    kernel.start().await.unwrap();
    let mut completed = 0;
    for _ in 0..100 {
        completed = kernel.queue().stats().await.unwrap().completed;
        if completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(completed, 1);
    kernel.stop().await.unwrap();
}
