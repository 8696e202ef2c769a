//! Tests for TOML loading, default creation, and path resolution.

use super::*;
use crate::schema::PulseConfig;
use pulse_common::ConfigError;

#[test]
fn load_from_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[transport]
endpoint = "wss://pulse.example.com/ws"

[reconnect]
max_retries = 3
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.transport.endpoint, "wss://pulse.example.com/ws");
    assert_eq!(config.reconnect.max_retries, 3);
    // Missing fields fall back to defaults
    assert_eq!(config.reconnect.retry_delay, 5);
}

#[test]
fn missing_file_is_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.toml");
    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
fn invalid_toml_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[transport\nendpoint = ").unwrap();
    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn invalid_values_still_load_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[transport]
heartbeat_interval = 0
"#,
    )
    .unwrap();

    // Out-of-range value is kept; validation only warns on load.
    let config = load_from_path(&path).unwrap();
    assert_eq!(config.transport.heartbeat_interval, 0);
}

#[test]
fn create_default_writes_parseable_template() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sub").join("config.toml");
    create_default_config(&path).unwrap();
    assert!(path.exists());

    let config = load_from_path(&path).unwrap();
    let default = PulseConfig::default();
    assert_eq!(config.transport.endpoint, default.transport.endpoint);
    assert_eq!(config.persistence.debounce_ms, default.persistence.debounce_ms);
}

#[test]
fn default_path_ends_with_pulse_config() {
    let path = default_config_path().unwrap();
    assert!(path.ends_with("pulse/config.toml"));
}
