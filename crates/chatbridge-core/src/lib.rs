// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for chatbridge.
//!
//! This crate holds what every other crate in the workspace agrees on: the
//! error taxonomy, the envelope and session types, the routing-key grammar,
//! the envelope codec, and the broker traits that concrete clients implement.

pub mod codec;
pub mod error;
pub mod routing;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::BridgeError;
pub use routing::{RoutingKey, inbound_pattern, inbound_patterns, outbound_key};
pub use types::{AcceptedKinds, Envelope, MessageKind, SessionId};

pub use traits::{
    BrokerChannel, BrokerConnection, BrokerConnector, Delivery, DeliveryAcker, DeliveryStream,
    ExchangeKind, ExchangeSpec, QueueSpec,
};
