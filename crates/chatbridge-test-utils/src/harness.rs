// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end bridge testing.
//!
//! `TestHarness` assembles a [`Bridge`] on top of a [`MockBroker`] with
//! short backoff and teardown timings, and plays the agent side of the
//! conversation.

use std::sync::Arc;
use std::time::Duration;

use chatbridge_bridge::{Bridge, BridgeSettings, ConsumerSettings};
use chatbridge_core::error::BridgeError;
use chatbridge_core::traits::ExchangeSpec;
use chatbridge_core::types::{AcceptedKinds, Envelope, MessageKind, SessionId};

use crate::mock_broker::{MockBroker, PublishedMessage};

pub const OUTBOUND_EXCHANGE: &str = "chat_messages";
pub const INBOUND_EXCHANGE: &str = "chat_responses";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    consumer: ConsumerSettings,
    settings: BridgeSettings,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            consumer: ConsumerSettings {
                exchange: ExchangeSpec::durable_topic(INBOUND_EXCHANGE),
                reconnect_initial: Duration::from_millis(10),
                reconnect_max: Duration::from_millis(50),
                teardown_step_timeout: Duration::from_millis(500),
                ..ConsumerSettings::default()
            },
            settings: BridgeSettings {
                poll_timeout: Duration::from_secs(2),
                max_poll_timeout: Duration::from_secs(5),
                subscribe_wait: Duration::from_secs(2),
                ..BridgeSettings::default()
            },
        }
    }

    /// Reply kinds each session consumer binds.
    pub fn with_accepted_kinds(
        mut self,
        kinds: impl IntoIterator<Item = MessageKind>,
    ) -> Result<Self, BridgeError> {
        self.consumer.accepted_kinds = AcceptedKinds::new(kinds)?;
        Ok(self)
    }

    /// Use durable `<prefix>.<session>` queues instead of ephemeral ones.
    pub fn with_durable_queues(mut self, prefix: &str) -> Self {
        self.consumer.durable_queue_prefix = Some(prefix.to_owned());
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.settings.max_sessions = max;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.settings.buffer_capacity = capacity;
        self
    }

    pub fn with_idle_timeout(mut self, ttl: Duration) -> Self {
        self.settings.idle_timeout = Some(ttl);
        self
    }

    /// Build the harness around a fresh broker.
    pub fn build(self) -> TestHarness {
        self.build_with(MockBroker::new())
    }

    /// Build the harness around an existing (possibly pre-faulted) broker.
    pub fn build_with(self, broker: MockBroker) -> TestHarness {
        let bridge = Bridge::new(
            broker.connector(),
            ExchangeSpec::durable_topic(OUTBOUND_EXCHANGE),
            self.consumer,
            self.settings,
        );
        TestHarness {
            broker,
            bridge: Arc::new(bridge),
        }
    }
}

/// A bridge wired to an in-memory broker.
pub struct TestHarness {
    broker: MockBroker,
    bridge: Arc<Bridge>,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A harness with default test settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn broker(&self) -> &MockBroker {
        &self.broker
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Submit a direct text message from `from` to `to`.
    pub async fn submit_text(
        &self,
        from: &str,
        to: &str,
        content: &str,
    ) -> Result<SessionId, BridgeError> {
        self.bridge.submit(Envelope::text(from, to, content)).await
    }

    /// Publish an agent reply for `session_id`. Returns how many queues it
    /// reached.
    pub fn agent_reply(&self, session_id: &str, kind: MessageKind, content: &str) -> usize {
        self.broker
            .agent_reply(INBOUND_EXCHANGE, session_id, kind, content)
    }

    /// Poll with the default test timeout.
    pub async fn poll(&self, session_id: &str) -> Option<String> {
        self.bridge
            .poll(session_id, self.bridge.settings().poll_timeout)
            .await
    }

    /// Messages the bridge published to the outbound exchange.
    pub fn outbound(&self) -> Vec<PublishedMessage> {
        self.broker.published_to(OUTBOUND_EXCHANGE)
    }

    /// Tear down all sessions and the publisher.
    pub async fn shutdown(&self) {
        self.bridge.shutdown().await;
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
