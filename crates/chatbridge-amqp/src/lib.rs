// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AMQP 0-9-1 implementation of the chatbridge broker traits.
//!
//! [`AmqpConnector`] dials the broker with lapin; every call to
//! [`BrokerConnector::connect`] produces an independent TCP connection, so
//! the publisher and each session consumer own their connection outright.

mod channel;

use std::time::Duration;

use async_trait::async_trait;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{Connection, ConnectionProperties};
use tracing::debug;

use chatbridge_config::model::BrokerConfig;
use chatbridge_core::error::BridgeError;
use chatbridge_core::traits::{BrokerChannel, BrokerConnection, BrokerConnector};

pub use channel::AmqpChannel;

/// Reply code sent with a normal channel/connection close.
const REPLY_SUCCESS: u16 = 200;

/// Connection settings for [`AmqpConnector`].
#[derive(Clone)]
pub struct AmqpSettings {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for AmqpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl From<&BrokerConfig> for AmqpSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            vhost: config.vhost.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl AmqpSettings {
    fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        }
    }
}

/// Opens lapin connections to one broker endpoint.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    settings: AmqpSettings,
}

impl AmqpConnector {
    pub fn new(settings: AmqpSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(AmqpSettings::from(config))
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    fn endpoint(&self) -> String {
        format!(
            "amqp://{}:{}{}",
            self.settings.host, self.settings.port, self.settings.vhost
        )
    }

    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BridgeError> {
        let timeout = self.settings.connect_timeout;
        let dial = Connection::connect_uri(self.settings.uri(), ConnectionProperties::default());
        let connection = match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                return Err(BridgeError::connection(
                    format!("failed to connect to {}", self.endpoint()),
                    e,
                ));
            }
            Err(_) => {
                return Err(BridgeError::Connection {
                    message: format!(
                        "connecting to {} timed out after {timeout:?}",
                        self.endpoint()
                    ),
                    source: None,
                });
            }
        };
        debug!(endpoint = %self.endpoint(), "amqp connection established");
        Ok(Box::new(AmqpConnection { inner: connection }))
    }
}

/// A lapin connection.
pub struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BridgeError> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| map_lapin_error("create channel", e))?;
        Ok(Box::new(AmqpChannel::new(channel)))
    }

    fn is_connected(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.inner
            .close(REPLY_SUCCESS, "chatbridge closing")
            .await
            .map_err(|e| map_lapin_error("close connection", e))
    }
}

/// Classify a lapin error: I/O and protocol-level connection failures become
/// [`BridgeError::Connection`], everything else a broker operation error.
pub(crate) fn map_lapin_error(operation: &str, err: lapin::Error) -> BridgeError {
    let message = format!("{operation} failed: {err}");
    match err {
        lapin::Error::IOError(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::ProtocolError(_) => BridgeError::Connection {
            message,
            source: Some(Box::new(err)),
        },
        other => BridgeError::Broker {
            message,
            source: Some(Box::new(other)),
        },
    }
}
