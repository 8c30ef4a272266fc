//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use miio_protocol::config::{DispatcherConfig, LoggingConfig, MiioConfig, MIIO_PORT};
use miio_protocol::service::DeviceEndpoint;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = MiioConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_device_host() {
    let mut config = MiioConfig::default();
    config.device.host = "vacuum.local".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid device host")));
}

#[test]
fn test_empty_device_host() {
    let mut config = MiioConfig::default();
    config.device.host = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_short_token_rejected() {
    let mut config = MiioConfig::default();
    config.device.token = "0011223344".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid token")));
}

#[test]
fn test_non_hex_token_rejected() {
    let mut config = MiioConfig::default();
    config.device.token = "zz112233445566778899aabbccddeeff".to_string();

    assert!(!config.validate().is_empty());
}

#[test]
fn test_empty_token_allowed_for_discovery() {
    let mut config = MiioConfig::default();
    config.device.token = String::new();

    assert!(config.validate().is_empty());
}

#[test]
fn test_timeout_bounds() {
    let mut config = MiioConfig::default();
    config.device.timeout = Duration::from_millis(10);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("timeout too short")));

    config.device.timeout = Duration::from_secs(120);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("timeout too long")));
}

#[test]
fn test_zero_max_errors() {
    let config = MiioConfig::default_with_overrides(|c| c.dispatcher.max_errors = 0);
    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max errors must be greater than 0")));
}

#[test]
fn test_ping_attempt_bounds() {
    let mut dispatcher = DispatcherConfig {
        ping_attempts: 0,
        ..DispatcherConfig::default()
    };
    assert!(!dispatcher.validate().is_empty());

    dispatcher.ping_attempts = 11;
    assert!(dispatcher
        .validate()
        .iter()
        .any(|e| e.contains("Ping attempts too high")));
}

#[test]
fn test_empty_app_name() {
    let logging = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };
    assert!(logging
        .validate()
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_multiple_errors_are_all_reported() {
    let config = MiioConfig::default_with_overrides(|c| {
        c.device.host = String::new();
        c.device.port = 0;
        c.dispatcher.max_errors = 0;
    });
    assert!(config.validate().len() >= 3);

    let strict = config.validate_strict().unwrap_err().to_string();
    assert!(strict.contains("Configuration validation failed"));
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = MiioConfig::from_toml(
        r#"
        [device]
        host = "10.0.0.7"
        token = "00112233445566778899aabbccddeeff"
        device_id = 76300833
        timeout = 1500

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("TOML should parse");

    assert_eq!(config.device.port, MIIO_PORT);
    assert_eq!(config.device.device_id, Some(76_300_833));
    assert_eq!(config.device.timeout, Duration::from_millis(1500));
    assert_eq!(config.dispatcher.max_errors, 3);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.validate().is_empty());

    let endpoint = DeviceEndpoint::from_config(&config).unwrap();
    assert_eq!(endpoint.addr, "10.0.0.7:54321".parse().unwrap());
    assert_eq!(endpoint.device_id, 76_300_833u32.to_be_bytes());
    assert_eq!(endpoint.token[0], 0x00);
    assert_eq!(endpoint.token[15], 0xff);
}

#[test]
fn test_bad_log_level_fails_to_parse() {
    let result = MiioConfig::from_toml(
        r#"
        [logging]
        log_level = "loud"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_example_config_round_trips() {
    let example = MiioConfig::example_config();
    assert!(example.contains("[device]"));
    let parsed = MiioConfig::from_toml(&example).expect("example config should parse");
    assert_eq!(parsed.device.host, MiioConfig::default().device.host);
    assert_eq!(parsed.device.timeout, MiioConfig::default().device.timeout);
}

#[test]
fn test_missing_config_file() {
    let result = MiioConfig::from_file("/nonexistent/miio.toml");
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("Failed to open config file"));
}
