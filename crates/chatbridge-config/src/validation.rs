// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as non-empty hosts, ordered timeout bounds and routing-safe names.

use crate::diagnostic::ConfigError;
use crate::model::ChatbridgeConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &ChatbridgeConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |key: &str, reason: String| errors.push(ConfigError::invalid(key, reason));

    let broker = &config.broker;
    if broker.host.trim().is_empty() {
        fail("broker.host", "must not be empty".into());
    }
    if broker.port == 0 {
        fail("broker.port", "must not be 0".into());
    }
    if broker.vhost.is_empty() {
        fail("broker.vhost", "must not be empty (use \"/\" for the default vhost)".into());
    }
    if broker.connect_timeout_secs == 0 {
        fail("broker.connect_timeout_secs", "must be at least 1".into());
    }
    for (key, name) in [
        ("broker.outbound_exchange", &broker.outbound_exchange),
        ("broker.inbound_exchange", &broker.inbound_exchange),
    ] {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            fail(key, format!("`{name}` must be non-empty and free of whitespace"));
        }
    }

    let bridge = &config.bridge;
    if bridge.accepted_kinds.is_empty() {
        fail("bridge.accepted_kinds", "must list at least one message kind".into());
    }
    if bridge.max_poll_timeout_ms < bridge.poll_timeout_ms {
        fail(
            "bridge.max_poll_timeout_ms",
            format!(
                "{} is below bridge.poll_timeout_ms ({})",
                bridge.max_poll_timeout_ms, bridge.poll_timeout_ms
            ),
        );
    }
    if bridge.reconnect_max_ms < bridge.reconnect_initial_ms {
        fail(
            "bridge.reconnect_max_ms",
            format!(
                "{} is below bridge.reconnect_initial_ms ({})",
                bridge.reconnect_max_ms, bridge.reconnect_initial_ms
            ),
        );
    }
    for (key, value) in [
        ("bridge.poll_timeout_ms", bridge.poll_timeout_ms),
        ("bridge.buffer_capacity", bridge.buffer_capacity as u64),
        ("bridge.prefetch", u64::from(bridge.prefetch)),
        ("bridge.max_sessions", bridge.max_sessions as u64),
        ("bridge.reconnect_initial_ms", bridge.reconnect_initial_ms),
        ("bridge.teardown_step_timeout_ms", bridge.teardown_step_timeout_ms),
    ] {
        if value == 0 {
            fail(key, "must be at least 1".into());
        }
    }
    if let Some(prefix) = &bridge.durable_queue_prefix {
        if prefix.is_empty() || prefix.starts_with("amq.") || prefix.chars().any(char::is_whitespace)
        {
            fail(
                "bridge.durable_queue_prefix",
                format!("`{prefix}` must be non-empty, whitespace-free and not start with `amq.`"),
            );
        }
    }

    if config.gateway.host.trim().is_empty() {
        fail("gateway.host", "must not be empty".into());
    }
    if config.gateway.max_upload_bytes == 0 {
        fail("gateway.max_upload_bytes", "must be at least 1".into());
    }

    if config.media.api_key.is_some() && config.media.upload_url.trim().is_empty() {
        fail("media.upload_url", "must be set when media.api_key is configured".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
