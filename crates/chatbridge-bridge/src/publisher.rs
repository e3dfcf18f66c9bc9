// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound publisher.
//!
//! One [`Publisher`] is shared by every request. Its connection and channel
//! sit behind an async mutex, so publishes are serialized on the single
//! channel. The link is opened lazily and re-opened once on failure; a
//! second failure is reported to the caller, who owns retry policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use chatbridge_core::codec;
use chatbridge_core::error::BridgeError;
use chatbridge_core::routing::{RoutingKey, outbound_key};
use chatbridge_core::traits::{BrokerChannel, BrokerConnection, BrokerConnector, ExchangeSpec};
use chatbridge_core::types::{Envelope, SessionId};

/// An envelope that has been stamped, validated and encoded, ready to go
/// on the wire.
#[derive(Debug, Clone)]
pub struct PreparedMessage {
    pub session_id: SessionId,
    pub routing_key: RoutingKey,
    pub envelope: Envelope,
    pub payload: Vec<u8>,
}

impl PreparedMessage {
    /// Stamp defaults and encode. Pure: no broker I/O happens here, so an
    /// invalid envelope is rejected before anything is sent.
    pub fn prepare(mut envelope: Envelope) -> Result<Self, BridgeError> {
        let session_id = codec::stamp_defaults(&mut envelope, codec::now_epoch_secs())?;
        let payload = codec::encode(&envelope)?;
        Ok(Self {
            routing_key: outbound_key(&session_id),
            session_id,
            envelope,
            payload,
        })
    }
}

struct Link {
    connection: Box<dyn BrokerConnection>,
    channel: Box<dyn BrokerChannel>,
}

impl Link {
    fn is_usable(&self) -> bool {
        self.connection.is_connected() && self.channel.is_open()
    }

    /// Close channel then connection, each bounded by `limit`.
    async fn close(self, limit: Duration) {
        for (step, result) in [
            ("close_channel", tokio::time::timeout(limit, self.channel.close()).await),
            (
                "close_connection",
                tokio::time::timeout(limit, self.connection.close()).await,
            ),
        ] {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(step, error = %e, "publisher close step failed"),
                Err(_) => warn!(step, timeout = ?limit, "publisher close step timed out"),
            }
        }
    }
}

/// Publishes envelopes to the outbound exchange.
pub struct Publisher {
    connector: Arc<dyn BrokerConnector>,
    exchange: ExchangeSpec,
    close_timeout: Duration,
    link: Mutex<Option<Link>>,
    connected: AtomicBool,
}

impl Publisher {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        exchange: ExchangeSpec,
        close_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            exchange,
            close_timeout,
            link: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn exchange(&self) -> &ExchangeSpec {
        &self.exchange
    }

    /// Whether the last connect or publish left a usable link.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connect and declare the outbound exchange. No-op when already
    /// connected.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let mut slot = self.link.lock().await;
        self.ensure_link(&mut slot).await.map(|_| ())
    }

    /// Prepare and publish an envelope; returns its effective session id.
    pub async fn publish(&self, envelope: Envelope) -> Result<SessionId, BridgeError> {
        let message = PreparedMessage::prepare(envelope)?;
        self.publish_prepared(&message).await?;
        Ok(message.session_id)
    }

    /// Publish an already prepared message as a persistent message.
    ///
    /// A failed publish is not retried: the link is dropped and reopened
    /// once so the next call starts fresh, and the failure is returned. The
    /// caller owns retry policy.
    pub async fn publish_prepared(&self, message: &PreparedMessage) -> Result<(), BridgeError> {
        let mut slot = self.link.lock().await;
        let err = match self.try_publish(&mut slot, message).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(
            session_id = %message.session_id,
            routing_key = %message.routing_key,
            error = %err,
            "publish failed, reconnecting"
        );
        self.drop_link(&mut slot).await;
        if let Err(e) = self.ensure_link(&mut slot).await {
            warn!(error = %e, "publisher reconnect failed");
        }

        Err(BridgeError::Publish {
            message: format!("publishing to {} failed: {err}", message.routing_key),
            source: Some(Box::new(err)),
        })
    }

    /// Close channel then connection. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut slot = self.link.lock().await;
        if slot.is_some() {
            self.drop_link(&mut slot).await;
            info!(exchange = %self.exchange.name, "publisher closed");
        }
    }

    async fn try_publish(
        &self,
        slot: &mut Option<Link>,
        message: &PreparedMessage,
    ) -> Result<(), BridgeError> {
        let link = self.ensure_link(slot).await?;
        link.channel
            .publish(
                &self.exchange.name,
                &message.routing_key,
                message.payload.clone(),
                true,
            )
            .await?;
        debug!(
            session_id = %message.session_id,
            routing_key = %message.routing_key,
            bytes = message.payload.len(),
            "published"
        );
        Ok(())
    }

    async fn ensure_link<'a>(&self, slot: &'a mut Option<Link>) -> Result<&'a Link, BridgeError> {
        if !slot.as_ref().is_some_and(Link::is_usable) {
            self.drop_link(slot).await;
            *slot = Some(self.open_link().await?);
            self.connected.store(true, Ordering::Release);
        }
        slot.as_ref()
            .ok_or_else(|| BridgeError::Internal("publisher link missing after connect".into()))
    }

    async fn drop_link(&self, slot: &mut Option<Link>) {
        self.connected.store(false, Ordering::Release);
        if let Some(stale) = slot.take() {
            stale.close(self.close_timeout).await;
        }
    }

    async fn open_link(&self) -> Result<Link, BridgeError> {
        let connection = self.connector.connect().await?;
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };
        let link = Link {
            connection,
            channel,
        };
        let prepared = match link.channel.declare_exchange(&self.exchange).await {
            Ok(()) => link.channel.enable_confirms().await,
            Err(e) => Err(e),
        };
        if let Err(e) = prepared {
            link.close(self.close_timeout).await;
            return Err(e);
        }
        info!(
            endpoint = %self.connector.endpoint(),
            exchange = %self.exchange.name,
            "publisher connected"
        );
        Ok(link)
    }
}
