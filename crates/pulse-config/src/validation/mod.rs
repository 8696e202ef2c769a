//! Full configuration validation.
//!
//! Validates numeric ranges and URL schemes. Each section has its own
//! function; this orchestrator calls them all and collects errors into a
//! single `ConfigError`.

mod helpers;


use crate::schema::PulseConfig;
use pulse_common::ConfigError;

use helpers::validate_range;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &PulseConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_transport(&mut errors, config);
    validate_reconnect(&mut errors, config);
    validate_presence(&mut errors, config);
    validate_persistence(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_transport(errors: &mut Vec<String>, config: &PulseConfig) {
    let endpoint = &config.transport.endpoint;
    if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
        errors.push(format!(
            "transport.endpoint = {endpoint:?} must start with ws:// or wss://"
        ));
    }
    validate_range(
        errors,
        "transport.heartbeat_interval",
        config.transport.heartbeat_interval,
        5,
        300,
    );
    validate_range(
        errors,
        "transport.connect_timeout",
        config.transport.connect_timeout,
        1,
        120,
    );
}

fn validate_reconnect(errors: &mut Vec<String>, config: &PulseConfig) {
    validate_range(errors, "reconnect.retry_delay", config.reconnect.retry_delay, 1, 3600);
    validate_range(
        errors,
        "reconnect.max_retries",
        config.reconnect.max_retries as u64,
        0,
        100,
    );
}

fn validate_presence(errors: &mut Vec<String>, config: &PulseConfig) {
    validate_range(errors, "presence.enter_timeout", config.presence.enter_timeout, 1, 120);
    validate_range(
        errors,
        "presence.enter_retries",
        config.presence.enter_retries as u64,
        0,
        10,
    );
    validate_range(
        errors,
        "presence.enter_retry_delay",
        config.presence.enter_retry_delay,
        1,
        60,
    );
    validate_range(
        errors,
        "presence.refresh_delay_ms",
        config.presence.refresh_delay_ms,
        50,
        10_000,
    );
    validate_range(
        errors,
        "presence.refresh_interval",
        config.presence.refresh_interval,
        5,
        3600,
    );
    validate_range(
        errors,
        "presence.leave_grace_ms",
        config.presence.leave_grace_ms,
        0,
        10_000,
    );
}

fn validate_persistence(errors: &mut Vec<String>, config: &PulseConfig) {
    let base = &config.persistence.base_url;
    if !base.is_empty() && !base.starts_with("http://") && !base.starts_with("https://") {
        errors.push(format!(
            "persistence.base_url = {base:?} must start with http:// or https://"
        ));
    }
    validate_range(
        errors,
        "persistence.request_timeout",
        config.persistence.request_timeout,
        1,
        120,
    );
    validate_range(
        errors,
        "persistence.debounce_ms",
        config.persistence.debounce_ms,
        50,
        10_000,
    );
}
