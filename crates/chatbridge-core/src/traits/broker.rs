// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broker traits for a topic-routed publish/subscribe fabric.
//!
//! The bridge only talks to the broker through these traits. Resources form
//! a strict ownership chain: a [`BrokerConnector`] opens a
//! [`BrokerConnection`], which opens [`BrokerChannel`]s. Nothing here is
//! shared between sessions.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::BridgeError;
use crate::routing::RoutingKey;

/// Exchange routing flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
}

/// An exchange to declare. Publisher and consumers declare with identical
/// specs so either side can come up first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable topic exchange.
    pub fn durable_topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
        }
    }
}

/// Prefix the broker reserves for names it generates.
pub const BROKER_NAMED_PREFIX: &str = "amq.";

/// The queue a session consumer subscribes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueSpec {
    /// Broker-assigned name, exclusive to the declaring connection.
    ServerNamed,
    /// Client-named, exclusive and auto-deleted.
    Ephemeral { name: String },
    /// Client-named and durable; survives the session on purpose.
    Durable { name: String },
}

impl QueueSpec {
    /// Whether teardown should delete the queue it declared as `actual_name`.
    ///
    /// Durable queues are kept, and broker-generated `amq.*` names are left
    /// to the broker's exclusive-queue cleanup.
    pub fn delete_on_teardown(&self, actual_name: &str) -> bool {
        match self {
            QueueSpec::Durable { .. } => false,
            QueueSpec::ServerNamed | QueueSpec::Ephemeral { .. } => {
                !actual_name.is_empty() && !actual_name.starts_with(BROKER_NAMED_PREFIX)
            }
        }
    }
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), BridgeError>;

    async fn reject(&self, requeue: bool) -> Result<(), BridgeError>;
}

/// A message delivered to a consumer. Must be settled exactly once, which the
/// by-value [`Delivery::ack`] / [`Delivery::reject`] enforce.
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
    acker: Box<dyn DeliveryAcker>,
}

impl Delivery {
    pub fn new(
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        acker: Box<dyn DeliveryAcker>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), BridgeError> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), BridgeError> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stream of deliveries for one subscription. Ends (or yields an error) when
/// the channel or connection is lost.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BridgeError>> + Send>>;

/// Opens connections to the broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Human-readable endpoint for logs (no credentials).
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BridgeError>;
}

/// One authenticated broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BridgeError>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), BridgeError>;
}

/// A channel on a connection. Not shared across sessions.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BridgeError>;

    /// Declares the queue and returns its actual name (broker-assigned for
    /// [`QueueSpec::ServerNamed`]).
    async fn declare_queue(&self, queue: &QueueSpec) -> Result<String, BridgeError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &RoutingKey,
    ) -> Result<(), BridgeError>;

    /// Limit unacknowledged deliveries in flight on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), BridgeError>;

    /// Put the channel in publisher-confirm mode. Afterwards `publish`
    /// returns only once the broker has taken responsibility for the
    /// message, and fails if the broker nacks it.
    async fn enable_confirms(&self) -> Result<(), BridgeError>;

    /// Publish a payload. `persistent` asks the broker to store the message
    /// so it survives a broker restart.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &RoutingKey,
        payload: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BridgeError>;

    async fn consume(&self, queue: &str, consumer_tag: &str)
    -> Result<DeliveryStream, BridgeError>;

    async fn delete_queue(&self, queue: &str) -> Result<(), BridgeError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_queues_survive_teardown() {
        let spec = QueueSpec::Durable {
            name: "replies".into(),
        };
        assert!(!spec.delete_on_teardown("replies"));
    }

    #[test]
    fn ephemeral_queues_are_deleted() {
        let spec = QueueSpec::Ephemeral {
            name: "chatbridge.reply.u1".into(),
        };
        assert!(spec.delete_on_teardown("chatbridge.reply.u1"));
    }

    #[test]
    fn broker_named_queues_are_left_to_the_broker() {
        assert!(!QueueSpec::ServerNamed.delete_on_teardown("amq.gen-abc"));
        assert!(!QueueSpec::ServerNamed.delete_on_teardown(""));
    }

    #[test]
    fn durable_topic_spec() {
        let spec = ExchangeSpec::durable_topic("chat_messages");
        assert_eq!(spec.kind, ExchangeKind::Topic);
        assert!(spec.durable);
    }
}
