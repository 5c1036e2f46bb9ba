//! Integration tests for configuration parsing and application

use common::test_utils::{MockAdapter, MockBackend};
use driver::{DeviceRegistry, DriverConfig};
use protocol::{CanBus, SafetyMode};
use std::time::Duration;

const FULL_CONFIG: &str = r#"
[adapter]
serial = "0123456789ABCDEF01234567"
safety_mode = "all-output"
can_loopback = true
can_speeds = [
    { bus = "can1", kbps = 500 },
    { bus = "can3", kbps = 125 },
]

[timeouts]
control_ms = 250
bulk_write_ms = 300
bulk_read_ms = 40
poll_ms = 5

[logging]
level = "debug"
"#;

fn write_config(content: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("driver.toml");
    std::fs::write(&path, content).unwrap();
    let path = path.to_string_lossy().into_owned();
    (dir, path)
}

#[test]
fn test_full_config_parses() {
    let (_dir, path) = write_config(FULL_CONFIG);
    let config = DriverConfig::load(Some(path.as_str())).unwrap();

    assert_eq!(config.adapter.serial, "0123456789ABCDEF01234567");
    assert_eq!(config.adapter.safety_mode, SafetyMode::AllOutput);
    assert!(config.adapter.can_loopback);
    assert_eq!(config.adapter.can_speeds.len(), 2);
    assert_eq!(config.adapter.can_speeds[1].bus, CanBus::Can3);
    assert_eq!(config.logging.level, "debug");

    let timeouts = config.timeouts.to_timeouts();
    assert_eq!(timeouts.control, Duration::from_millis(250));
    assert_eq!(timeouts.poll, Duration::from_millis(5));
}

#[test]
fn test_missing_sections_take_defaults() {
    let (_dir, path) = write_config("[logging]\nlevel = \"warn\"\n");
    let config = DriverConfig::load(Some(path.as_str())).unwrap();

    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.adapter, DriverConfig::default().adapter);
    assert_eq!(config.timeouts, DriverConfig::default().timeouts);
}

#[test]
fn test_explicit_missing_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(DriverConfig::load(path.to_str()).is_err());
}

#[test]
fn test_invalid_values_are_rejected() {
    let (_dir, path) = write_config("[adapter]\nsafety_mode = \"sometimes\"\n");
    assert!(DriverConfig::load(Some(path.as_str())).is_err());

    let (_dir, path) = write_config("[adapter]\ncan_speeds = [{ bus = \"can2\", kbps = 9000 }]\n");
    assert!(DriverConfig::load(Some(path.as_str())).is_err());
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("driver.toml");
    let mut config = DriverConfig::default();
    config.adapter.can_loopback = true;
    config.timeouts.bulk_read_ms = 75;

    config.save(&path).unwrap();
    let loaded = DriverConfig::load(path.to_str()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_apply_configures_the_adapter() {
    let (_dir, path) = write_config(FULL_CONFIG);
    let config = DriverConfig::load(Some(path.as_str())).unwrap();

    let adapter = MockAdapter::new();
    let registry = DeviceRegistry::new(MockBackend::new(vec![adapter.clone()]));
    let mut session = registry.open("").unwrap();
    config.apply(&mut session).unwrap();

    let state = adapter.state();
    assert_eq!(state.safety_mode, SafetyMode::AllOutput);
    assert!(state.loopback);
    assert_eq!(state.can_speeds_kbps, [500, 500, 125]);
    assert_eq!(session.timeouts().bulk_read, Duration::from_millis(40));
}
