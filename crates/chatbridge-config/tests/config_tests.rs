// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the chatbridge configuration system.

use chatbridge_config::diagnostic::{ConfigError, suggest_key};
use chatbridge_config::model::ChatbridgeConfig;
use chatbridge_config::{load_and_validate_str, load_config_from_str};
use chatbridge_core::MessageKind;

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_config() {
    let toml = r#"
[broker]
host = "47.98.205.97"
port = 5672
vhost = "/wechat"
username = "bridge"
password = "s3cret"
outbound_exchange = "chat_messages"
inbound_exchange = "chat_responses"
connect_timeout_secs = 5

[bridge]
accepted_kinds = ["text", "image", "voice"]
poll_timeout_ms = 1500
max_poll_timeout_ms = 5000
buffer_capacity = 16
prefetch = 1
max_sessions = 50
durable_queue_prefix = "chatbridge.durable"
reconnect_initial_ms = 250
reconnect_max_ms = 8000
teardown_step_timeout_ms = 1000
subscribe_wait_ms = 500
idle_timeout_secs = 900

[gateway]
host = "127.0.0.1"
port = 8080
max_upload_bytes = 1048576

[media]
upload_url = "https://media.example/v1/files/upload"
api_key = "app-123"
user = "bridge-bot"
timeout_secs = 10

[logging]
level = "debug"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.broker.host, "47.98.205.97");
    assert_eq!(config.broker.vhost, "/wechat");
    assert_eq!(config.broker.password, "s3cret");
    assert_eq!(config.broker.connect_timeout_secs, 5);
    assert_eq!(
        config.bridge.accepted_kinds,
        vec![MessageKind::Text, MessageKind::Image, MessageKind::Voice]
    );
    assert_eq!(config.bridge.poll_timeout_ms, 1500);
    assert_eq!(config.bridge.buffer_capacity, 16);
    assert_eq!(
        config.bridge.durable_queue_prefix.as_deref(),
        Some("chatbridge.durable")
    );
    assert_eq!(config.bridge.idle_timeout_secs, 900);
    assert_eq!(config.gateway.port, 8080);
    assert_eq!(config.media.api_key.as_deref(), Some("app-123"));
    assert_eq!(config.logging.level, "debug");
}

/// Unknown field in [broker] section produces an error naming the key.
#[test]
fn unknown_field_in_broker_produces_error() {
    let toml = r#"
[broker]
hots = "mq"
"#;

    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("hots"),
        "error should mention unknown field or the bad key, got: {err_str}"
    );
}

/// Unknown section at the top level is rejected.
#[test]
fn unknown_section_produces_error() {
    let toml = r#"
[telemetry]
enabled = true
"#;

    assert!(load_config_from_str(toml).is_err());
}

/// Unknown keys become UnknownKey diagnostics with a suggestion.
#[test]
fn unknown_key_diagnostic_has_suggestion() {
    let toml = r#"
[bridge]
max_sesions = 3
"#;

    let errors = load_and_validate_str(toml).expect_err("typo must fail");
    let found = errors.iter().any(|e| match e {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => key == "max_sesions" && suggestion.as_deref() == Some("max_sessions"),
        _ => false,
    });
    assert!(found, "expected an UnknownKey with suggestion, got {errors:?}");
}

/// Wrong value types are reported, not coerced.
#[test]
fn wrong_type_is_reported() {
    let toml = r#"
[bridge]
prefetch = "one"
"#;

    let errors = load_and_validate_str(toml).expect_err("string prefetch must fail");
    assert!(!errors.is_empty());
}

/// Empty TOML yields the compiled defaults.
#[test]
fn empty_toml_uses_defaults() {
    let config = load_and_validate_str("").expect("defaults must validate");
    let defaults = ChatbridgeConfig::default();
    assert_eq!(config.broker.host, defaults.broker.host);
    assert_eq!(config.gateway.port, 9919);
    assert_eq!(config.bridge.poll_timeout_ms, 2000);
}

/// Semantic validation runs after a successful parse.
#[test]
fn semantic_errors_are_collected() {
    let toml = r#"
[bridge]
prefetch = 0
reconnect_initial_ms = 1000
reconnect_max_ms = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("invalid values must fail");
    assert_eq!(errors.len(), 2, "got {errors:?}");
}

#[test]
fn suggest_key_is_public() {
    assert_eq!(
        suggest_key("inbound_exchang", &["inbound_exchange", "outbound_exchange"]),
        Some("inbound_exchange".to_string())
    );
}

#[test]
fn unknown_section_lists_the_valid_ones() {
    let errors = load_and_validate_str("[telemetry]\nenabled = true\n").expect_err("must fail");
    match &errors[..] {
        [ConfigError::UnknownSection { name, hint, .. }] => {
            assert_eq!(name, "telemetry");
            assert_eq!(hint, "sections are: broker, bridge, gateway, media, logging");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn key_in_the_wrong_section_is_redirected() {
    let toml = r#"
[gateway]
max_upload_bytes = 10
prefetch = 4
"#;

    let errors = load_and_validate_str(toml).expect_err("misplaced key must fail");
    assert_eq!(errors[0].key().as_deref(), Some("gateway.prefetch"));
    let rendered = chatbridge_config::diagnostic::render_to_string(&errors);
    assert!(rendered.contains("belongs in [bridge]"), "{rendered}");
}

#[test]
fn validation_errors_name_the_field() {
    let errors = load_and_validate_str("[gateway]\nmax_upload_bytes = 0\n").expect_err("must fail");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].key().as_deref(), Some("gateway.max_upload_bytes"));
    assert_eq!(errors[0].to_string(), "invalid `gateway.max_upload_bytes`: must be at least 1");
}
