// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for chatbridge.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use chatbridge_core::types::MessageKind;
use serde::{Deserialize, Serialize};

/// Top-level chatbridge configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatbridgeConfig {
    /// Broker endpoint, credentials and exchange names.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Session routing, buffering and consumer lifecycle.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// HTTP request layer.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Third-party media upload API.
    #[serde(default)]
    pub media: MediaConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker connection configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Virtual host, e.g. `/` or `/wechat`.
    #[serde(default = "default_vhost")]
    pub vhost: String,

    #[serde(default = "default_guest")]
    pub username: String,

    #[serde(default = "default_guest")]
    pub password: String,

    /// Exchange user turns are published to.
    #[serde(default = "default_outbound_exchange")]
    pub outbound_exchange: String,

    /// Exchange agent replies arrive on.
    #[serde(default = "default_inbound_exchange")]
    pub inbound_exchange: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("outbound_exchange", &self.outbound_exchange)
            .field("inbound_exchange", &self.inbound_exchange)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            vhost: default_vhost(),
            username: default_guest(),
            password: default_guest(),
            outbound_exchange: default_outbound_exchange(),
            inbound_exchange: default_inbound_exchange(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_outbound_exchange() -> String {
    "chat_messages".to_string()
}

fn default_inbound_exchange() -> String {
    "chat_responses".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Session routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Reply kinds each session consumer binds.
    #[serde(default = "default_accepted_kinds")]
    pub accepted_kinds: Vec<MessageKind>,

    /// Wait used by `GET /get_message` when the caller gives none.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Upper bound for any poll wait.
    #[serde(default = "default_max_poll_timeout_ms")]
    pub max_poll_timeout_ms: u64,

    /// Replies buffered per session before the consumer stops taking deliveries.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Unacknowledged deliveries in flight per consumer.
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// When set, consumers use durable queues named `<prefix>.<session_id>`
    /// that outlive the session. Unset means ephemeral queues.
    #[serde(default)]
    pub durable_queue_prefix: Option<String>,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Budget for each consumer teardown step.
    #[serde(default = "default_teardown_step_timeout_ms")]
    pub teardown_step_timeout_ms: u64,

    /// How long `submit` waits for a new consumer's bindings before publishing.
    #[serde(default = "default_subscribe_wait_ms")]
    pub subscribe_wait_ms: u64,

    /// Sessions idle for longer are cleaned up. `0` disables expiry.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            accepted_kinds: default_accepted_kinds(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_poll_timeout_ms: default_max_poll_timeout_ms(),
            buffer_capacity: default_buffer_capacity(),
            prefetch: default_prefetch(),
            max_sessions: default_max_sessions(),
            durable_queue_prefix: None,
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            teardown_step_timeout_ms: default_teardown_step_timeout_ms(),
            subscribe_wait_ms: default_subscribe_wait_ms(),
            idle_timeout_secs: 0,
        }
    }
}

impl BridgeConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn max_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.max_poll_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

fn default_accepted_kinds() -> Vec<MessageKind> {
    vec![MessageKind::Text, MessageKind::Image]
}

fn default_poll_timeout_ms() -> u64 {
    2000
}

fn default_max_poll_timeout_ms() -> u64 {
    10_000
}

fn default_buffer_capacity() -> usize {
    64
}

fn default_prefetch() -> u16 {
    1
}

fn default_max_sessions() -> usize {
    1000
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_teardown_step_timeout_ms() -> u64 {
    3000
}

fn default_subscribe_wait_ms() -> u64 {
    3000
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Largest accepted multipart upload body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    9919
}

fn default_max_upload_bytes() -> usize {
    15 * 1024 * 1024
}

/// Media upload API configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MediaConfig {
    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    /// Bearer key for the upload API. `None` disables `POST /upload_image`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Value sent as the `user` form field when the request gives none.
    #[serde(default = "default_media_user")]
    pub user: String,

    #[serde(default = "default_media_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for MediaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaConfig")
            .field("upload_url", &self.upload_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("user", &self.user)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            upload_url: default_upload_url(),
            api_key: None,
            user: default_media_user(),
            timeout_secs: default_media_timeout_secs(),
        }
    }
}

fn default_upload_url() -> String {
    "https://api.dify.ai/v1/files/upload".to_string()
}

fn default_media_user() -> String {
    "chatbridge".to_string()
}

fn default_media_timeout_secs() -> u64 {
    30
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
