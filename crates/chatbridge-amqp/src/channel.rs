// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! lapin channel wrapper: exchange/queue topology, publishing, consuming.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    QueueDeleteOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};

use chatbridge_core::codec::CONTENT_TYPE;
use chatbridge_core::error::BridgeError;
use chatbridge_core::routing::RoutingKey;
use chatbridge_core::traits::{
    BrokerChannel, Delivery, DeliveryAcker, DeliveryStream, ExchangeKind, ExchangeSpec, QueueSpec,
};

use crate::{REPLY_SUCCESS, map_lapin_error};

/// AMQP delivery mode 2: persist the message to disk.
const DELIVERY_MODE_PERSISTENT: u8 = 2;
const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// A lapin channel.
pub struct AmqpChannel {
    inner: Channel,
}

impl AmqpChannel {
    pub(crate) fn new(inner: Channel) -> Self {
        Self { inner }
    }
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
    }
}

/// Outcome of an awaited publisher confirm. `NotRequested` means the
/// channel is not in confirm mode, so there is nothing to check.
fn confirmation_result(confirmation: Confirmation) -> Result<(), BridgeError> {
    match confirmation {
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        Confirmation::Nack(_) => Err(BridgeError::Publish {
            message: "broker nacked the message".into(),
            source: None,
        }),
    }
}

/// Declare arguments for a queue spec: `(name, options)`.
fn queue_declaration(queue: &QueueSpec) -> (&str, QueueDeclareOptions) {
    match queue {
        QueueSpec::ServerNamed => (
            "",
            QueueDeclareOptions {
                exclusive: true,
                ..QueueDeclareOptions::default()
            },
        ),
        QueueSpec::Ephemeral { name } => (
            name.as_str(),
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
        ),
        QueueSpec::Durable { name } => (
            name.as_str(),
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
        ),
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BridgeError> {
        self.inner
            .exchange_declare(
                &exchange.name,
                exchange_kind(exchange.kind),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_lapin_error("declare exchange", e))
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<String, BridgeError> {
        let (name, options) = queue_declaration(queue);
        let declared = self
            .inner
            .queue_declare(name, options, FieldTable::default())
            .await
            .map_err(|e| map_lapin_error("declare queue", e))?;
        Ok(declared.name().as_str().to_owned())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &RoutingKey,
    ) -> Result<(), BridgeError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_lapin_error("bind queue", e))
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BridgeError> {
        self.inner
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| map_lapin_error("set prefetch", e))
    }

    async fn enable_confirms(&self) -> Result<(), BridgeError> {
        self.inner
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| map_lapin_error("enable publisher confirms", e))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &RoutingKey,
        payload: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BridgeError> {
        let delivery_mode = if persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };
        let properties = BasicProperties::default()
            .with_delivery_mode(delivery_mode)
            .with_content_type(CONTENT_TYPE.into());
        let map_publish = |e: lapin::Error| match map_lapin_error("publish", e) {
            BridgeError::Broker { message, source } => BridgeError::Publish { message, source },
            other => other,
        };
        self.inner
            .basic_publish(
                exchange,
                routing_key.as_str(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(map_publish)?
            .await
            .map_err(map_publish)
            .and_then(confirmation_result)
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BridgeError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_lapin_error("consume", e))?;

        let stream = consumer.map(|item| {
            item.map(|delivery| {
                Delivery::new(
                    delivery.routing_key.as_str(),
                    delivery.data,
                    Box::new(AmqpAcker {
                        inner: delivery.acker,
                    }),
                )
            })
            .map_err(|e| map_lapin_error("receive delivery", e))
        });
        Ok(Box::pin(stream))
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BridgeError> {
        self.inner
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| map_lapin_error("delete queue", e))
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) -> Result<(), BridgeError> {
        if !self.is_open() {
            return Ok(());
        }
        self.inner
            .close(REPLY_SUCCESS, "chatbridge closing")
            .await
            .map_err(|e| map_lapin_error("close channel", e))
    }
}

struct AmqpAcker {
    inner: Acker,
}

#[async_trait]
impl DeliveryAcker for AmqpAcker {
    async fn ack(&self) -> Result<(), BridgeError> {
        self.inner
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| map_lapin_error("ack", e))
    }

    async fn reject(&self, requeue: bool) -> Result<(), BridgeError> {
        self.inner
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|e| map_lapin_error("reject", e))
    }
}
