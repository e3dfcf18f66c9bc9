// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the chatbridge session-routing bridge.

use thiserror::Error;

/// Boxed error source carried by broker-facing variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type used across the bridge, its broker traits and the
/// request layer.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Broker unreachable, authentication refused, or connection lost.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        source: Option<BoxedSource>,
    },

    /// An envelope could not be serialized or a wire payload could not be decoded.
    #[error("encoding error: {message}")]
    Encoding {
        message: String,
        source: Option<BoxedSource>,
    },

    /// Missing or invalid session id, or a value unsafe for the routing-key grammar.
    #[error("validation error: {0}")]
    Validation(String),

    /// The broker did not accept a published message.
    #[error("publish error: {message}")]
    Publish {
        message: String,
        source: Option<BoxedSource>,
    },

    /// A broker operation other than connect/publish failed (declare, bind, consume, ack).
    #[error("broker error: {message}")]
    Broker {
        message: String,
        source: Option<BoxedSource>,
    },

    /// A resource release step failed. Only ever logged.
    #[error("teardown step `{step}` failed: {message}")]
    Teardown { step: &'static str, message: String },

    /// An operation was attempted in a lifecycle state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The registry refused a new session because it is at capacity.
    #[error("session capacity reached ({max} active sessions)")]
    Capacity { max: usize },

    /// Configuration errors surfaced at runtime.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Shorthand for a connection error with a source.
    pub fn connection(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand for a broker operation error with a source.
    pub fn broker(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Broker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true for errors that mean the broker link is gone.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns true for errors the caller caused (bad input), as opposed to
    /// infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Encoding { .. } | Self::Capacity { .. }
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
