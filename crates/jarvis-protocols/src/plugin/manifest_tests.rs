use super::*;
use crate::plugin::CapabilityDomain;

const ENGINE: EngineVersion = EngineVersion::new(1, 2);

fn valid() -> PluginManifest {
    PluginManifest::new("weather", "Weather", "1.0.0", "weather")
        .with_permission("ai:complete")
        .with_permission("ui:notify")
}

#[test]
fn test_manifest_new() {
    let manifest = PluginManifest::new("clock", "Clock", "0.1.0", "clock");
    assert_eq!(manifest.id, "clock");
    assert_eq!(manifest.permissions, Some(vec![]));
    assert!(manifest.capabilities.is_empty());
    assert!(manifest.validate(&ENGINE).unwrap().is_empty());
}

#[test]
fn test_validate_returns_permissions() {
    let granted = valid().validate(&ENGINE).unwrap();
    assert_eq!(granted.len(), 2);
    assert!(granted.allows(CapabilityDomain::Ai, "complete"));
}

#[test]
fn test_missing_id_rejected() {
    let json = r#"{"name": "No Id", "version": "1.0.0", "entry": "x", "permissions": []}"#;
    let manifest = PluginManifest::from_json(json).unwrap();
    let err = manifest.validate(&ENGINE).unwrap_err();
    assert!(matches!(err, PluginError::InvalidManifest(_)));
    assert!(err.to_string().contains("'id'"));
}

#[test]
fn test_missing_permissions_rejected() {
    let json = r#"{"id": "a", "name": "A", "version": "1.0.0", "entry": "a"}"#;
    let manifest = PluginManifest::from_json(json).unwrap();
    let err = manifest.validate(&ENGINE).unwrap_err();
    assert!(err.to_string().contains("permissions"));
}

#[test]
fn test_missing_entry_rejected() {
    let mut manifest = valid();
    manifest.entry.clear();
    assert!(manifest.validate(&ENGINE).unwrap_err().to_string().contains("entry"));
}

#[test]
fn test_invalid_version_rejected() {
    let mut manifest = valid();
    manifest.version = "one".to_string();
    assert!(matches!(
        manifest.validate(&ENGINE),
        Err(PluginError::InvalidManifest(_))
    ));
}

#[test]
fn test_invalid_id_rejected() {
    let mut manifest = valid();
    manifest.id = "has space".to_string();
    assert!(manifest.validate(&ENGINE).is_err());
}

#[test]
fn test_unknown_permission_domain_rejected() {
    let manifest = valid().with_permission("network:fetch");
    assert!(manifest.validate(&ENGINE).is_err());
}

#[test]
fn test_engine_compatibility() {
    assert!(valid().with_engine("1.0").validate(&ENGINE).is_ok());
    assert!(valid().with_engine("1.2").validate(&ENGINE).is_ok());

    let err = valid().with_engine("1.3").validate(&ENGINE).unwrap_err();
    assert!(matches!(err, PluginError::IncompatibleEngine { .. }));

    let err = valid().with_engine("2.0").validate(&ENGINE).unwrap_err();
    assert!(matches!(err, PluginError::IncompatibleEngine { .. }));

    assert!(valid().with_engine("latest").validate(&ENGINE).is_err());
}

#[test]
fn test_duplicate_capability_rejected() {
    let manifest = valid()
        .with_capability("weather.today", "today")
        .with_capability("weather.today", "other");
    assert!(manifest.validate(&ENGINE).unwrap_err().to_string().contains("duplicate"));
}

#[test]
fn test_zero_quota_rejected() {
    let manifest = valid().with_quota(QuotaSpec {
        max_concurrent_tasks: Some(0),
        ..Default::default()
    });
    assert!(manifest.validate(&ENGINE).is_err());

    let manifest = valid().with_quota(QuotaSpec {
        max_cpu_percent: Some(150),
        ..Default::default()
    });
    assert!(manifest.validate(&ENGINE).is_err());
}

#[test]
fn test_from_json_full() {
    let json = r#"{
        "id": "lights",
        "name": "Lights",
        "version": "2.1.0",
        "entry": "lights",
        "permissions": ["ai:*", "events:publish"],
        "engine": "1.1",
        "capabilities": [{"name": "lights.toggle", "handler": "toggle"}],
        "quota": {"max_memory_mb": 64}
    }"#;
    let manifest = PluginManifest::from_json(json).unwrap();
    assert_eq!(manifest.capabilities.len(), 1);
    assert_eq!(manifest.quota.as_ref().unwrap().max_memory_mb, Some(64));
    assert_eq!(manifest.parsed_version(), Some(Version::new(2, 1, 0)));
    assert!(manifest.validate(&ENGINE).is_ok());
}

#[test]
fn test_from_json_malformed() {
    assert!(matches!(
        PluginManifest::from_json("{not json"),
        Err(PluginError::InvalidManifest(_))
    ));
}
