// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the bridge and concrete broker clients.
//!
//! All traits use `#[async_trait]` so they can be held as trait objects.

pub mod broker;

pub use broker::{
    BROKER_NAMED_PREFIX, BrokerChannel, BrokerConnection, BrokerConnector, Delivery,
    DeliveryAcker, DeliveryStream, ExchangeKind, ExchangeSpec, QueueSpec,
};
