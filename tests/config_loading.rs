//! Integration tests for layered configuration loading.
//!
//! Tests that read the environment run serially.

use loadrig_daq::config::RigConfig;
use loadrig_daq::error::DaqError;
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfig::load_from(dir.path().join("absent.toml")).unwrap();

    assert_eq!(config, RigConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_partial_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rig.toml");
    std::fs::write(
        &path,
        r#"
        [device]
        port = "COM4"
        unit_id = 3

        [acquisition]
        poll_interval_ms = 500
        "#,
    )
    .unwrap();

    let config = RigConfig::load_from(&path).unwrap();
    assert_eq!(config.device.port, "COM4");
    assert_eq!(config.device.unit_id, 3);
    assert_eq!(config.device.baud_rate, 9600);
    assert_eq!(config.poll_interval(), Duration::from_millis(500));
    assert_eq!(config.heartbeat(), Duration::from_millis(5000));
    assert_eq!(config.application.log_level, "info");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rig.toml");
    std::fs::write(&path, "[device]\nport = \"/dev/ttyUSB0\"\n").unwrap();

    std::env::set_var("LOADRIG_DEVICE__PORT", "/dev/ttyACM1");
    std::env::set_var("LOADRIG_ACQUISITION__HEARTBEAT_MS", "2500");
    let result = RigConfig::load_from(&path);
    std::env::remove_var("LOADRIG_DEVICE__PORT");
    std::env::remove_var("LOADRIG_ACQUISITION__HEARTBEAT_MS");

    let config = result.unwrap();
    assert_eq!(config.device.port, "/dev/ttyACM1");
    assert_eq!(config.acquisition.heartbeat_ms, 2500);
}

#[test]
#[serial]
fn test_bundled_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/rig.toml");
    let config = RigConfig::load_from(path).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.acquisition.hold_threshold_tons, 0.02);
}

#[test]
#[serial]
fn test_malformed_value_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rig.toml");
    std::fs::write(&path, "[device]\nbaud_rate = \"fast\"\n").unwrap();

    assert!(matches!(
        RigConfig::load_from(&path),
        Err(DaqError::Config(_))
    ));
}

#[test]
#[serial]
fn test_validation_rejects_bad_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rig.toml");
    std::fs::write(&path, "[application]\nlog_format = \"xml\"\n").unwrap();

    let config = RigConfig::load_from(&path).unwrap();
    assert!(matches!(
        config.validate(),
        Err(DaqError::Configuration(_))
    ));
}
