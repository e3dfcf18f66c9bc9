// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session-routing bridge between request/poll callers and a topic broker.
//!
//! - [`Publisher`] writes envelopes to the outbound exchange under
//!   `chat_session.<session>`.
//! - [`SessionConsumer`] subscribes one session to
//!   `chat_result.<session>.<kind>` and feeds a [`SessionBuffer`].
//! - [`SessionRegistry`] maps session ids to buffer + consumer, at most one
//!   consumer per id.
//! - [`Bridge`] is the facade the request layer calls: `submit`, `poll`,
//!   `cleanup`.

pub mod buffer;
pub mod consumer;
pub mod orchestrator;
pub mod publisher;
pub mod registry;
pub mod teardown;

pub use buffer::SessionBuffer;
pub use consumer::{ConsumerHandle, ConsumerSettings, ConsumerState, SessionConsumer};
pub use orchestrator::{Bridge, BridgeHealth, BridgeSettings};
pub use publisher::{PreparedMessage, Publisher};
pub use registry::{SessionEntry, SessionRegistry, SessionStatus};
pub use teardown::TeardownReport;
