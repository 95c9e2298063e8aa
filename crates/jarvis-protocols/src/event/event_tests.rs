use super::*;
use serde_json::json;

#[test]
fn test_event_new_defaults() {
    let event = Event::new("kernel.boot", EventPayload::Empty);
    assert_eq!(event.channel, "kernel.boot");
    assert_eq!(event.priority, Priority::Normal);
    assert_eq!(event.source, "kernel");
    assert!(event.correlation_id.is_none());
    assert!(event.response_channel().is_none());
}

#[test]
fn test_event_builders() {
    let event = Event::new("assistant.ask", json!({"q": "time"}).into())
        .with_priority(Priority::High)
        .with_source("clock")
        .with_correlation_id("abc");
    assert_eq!(event.priority, Priority::High);
    assert_eq!(event.source, "clock");
    assert_eq!(
        event.response_channel().as_deref(),
        Some("assistant.ask:response:abc")
    );
}

#[test]
fn test_payload_as_custom() {
    let payload = EventPayload::custom(json!({"n": 1}));
    assert_eq!(payload.as_custom(), Some(&json!({"n": 1})));
    assert!(EventPayload::Empty.as_custom().is_none());
}

#[test]
fn test_payload_tagged_serialization() {
    let payload = EventPayload::Connectivity(ConnectivityEvent { online: true });
    let value = payload.to_json();
    assert_eq!(value["kind"], "connectivity");
    assert_eq!(value["data"]["online"], true);
}

#[test]
fn test_plugin_event_serialization() {
    let payload = EventPayload::Plugin(PluginEvent {
        plugin_id: "weather".to_string(),
        state: PluginState::Enabled,
        version: Some("1.0.0".to_string()),
        error: None,
    });
    let json = serde_json::to_string(&payload).unwrap();
    assert!(json.contains("weather"));
    assert!(json.contains("enabled"));
    assert!(!json.contains("error"));

    let parsed: EventPayload = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, payload);
}

#[test]
fn test_resource_level_order() {
    assert!(ResourceLevel::Critical > ResourceLevel::Warning);
}
