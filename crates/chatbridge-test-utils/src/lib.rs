// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for chatbridge.
//!
//! Provides an in-memory broker and a harness for fast, deterministic,
//! CI-runnable tests without a running message broker.
//!
//! # Components
//!
//! - [`MockBroker`] - in-memory topic broker implementing the broker traits
//! - [`TestHarness`] - a [`chatbridge_bridge::Bridge`] wired to a `MockBroker`

pub mod harness;
pub mod mock_broker;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_broker::{MockBroker, PublishedMessage, Settlement, topic_matches};
