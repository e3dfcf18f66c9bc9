// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The bridge facade used by the request layer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use chatbridge_config::model::{BridgeConfig, BrokerConfig, ChatbridgeConfig};
use chatbridge_core::error::BridgeError;
use chatbridge_core::traits::{BrokerConnector, ExchangeSpec};
use chatbridge_core::types::{Envelope, SessionId};

use crate::consumer::ConsumerSettings;
use crate::publisher::{PreparedMessage, Publisher};
use crate::registry::{SessionRegistry, SessionStatus};
use crate::teardown::TeardownReport;

/// Request-side timing knobs.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Poll wait used when the caller gives none.
    pub poll_timeout: Duration,
    /// Upper bound applied to every poll wait.
    pub max_poll_timeout: Duration,
    /// How long `submit` waits for a new session's bindings before
    /// publishing anyway.
    pub subscribe_wait: Duration,
    pub buffer_capacity: usize,
    pub max_sessions: usize,
    pub idle_timeout: Option<Duration>,
}

impl BridgeSettings {
    pub fn from_config(bridge: &BridgeConfig) -> Self {
        Self {
            poll_timeout: bridge.poll_timeout(),
            max_poll_timeout: bridge.max_poll_timeout(),
            subscribe_wait: Duration::from_millis(bridge.subscribe_wait_ms),
            buffer_capacity: bridge.buffer_capacity,
            max_sessions: bridge.max_sessions,
            idle_timeout: bridge.idle_timeout(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

/// Health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeHealth {
    pub broker_connected: bool,
    pub sessions: Vec<SessionStatus>,
}

/// Publisher + session registry behind `submit` / `poll` / `cleanup`.
pub struct Bridge {
    publisher: Publisher,
    registry: SessionRegistry,
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        outbound: ExchangeSpec,
        consumer: ConsumerSettings,
        settings: BridgeSettings,
    ) -> Self {
        let publisher = Publisher::new(
            Arc::clone(&connector),
            outbound,
            consumer.teardown_step_timeout,
        );
        let registry = SessionRegistry::new(
            connector,
            consumer,
            settings.buffer_capacity,
            settings.max_sessions,
        );
        Self {
            publisher,
            registry,
            settings,
        }
    }

    /// Build a bridge from the `[broker]` and `[bridge]` config sections.
    pub fn from_config(
        connector: Arc<dyn BrokerConnector>,
        broker: &BrokerConfig,
        bridge: &BridgeConfig,
    ) -> Result<Self, BridgeError> {
        Ok(Self::new(
            connector,
            ExchangeSpec::durable_topic(&broker.outbound_exchange),
            ConsumerSettings::from_config(broker, bridge)?,
            BridgeSettings::from_config(bridge),
        ))
    }

    pub fn from_chatbridge_config(
        connector: Arc<dyn BrokerConnector>,
        config: &ChatbridgeConfig,
    ) -> Result<Self, BridgeError> {
        Self::from_config(connector, &config.broker, &config.bridge)
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Eagerly connect the publisher.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        self.publisher.connect().await
    }

    /// Publish a caller's message and make sure its session is bridged.
    ///
    /// Validation and encoding happen before any broker I/O. The session's
    /// consumer is started (or reused) and given up to `subscribe_wait` to
    /// bind before the message goes out, so an immediate reply is not
    /// routed to an unbound key. Returns the effective session id.
    pub async fn submit(&self, envelope: Envelope) -> Result<SessionId, BridgeError> {
        let message = PreparedMessage::prepare(envelope)?;
        let entry = self.registry.ensure_session(&message.session_id).await?;
        if !entry.wait_until_listening(self.settings.subscribe_wait).await {
            warn!(
                session_id = %message.session_id,
                state = %entry.consumer_state(),
                wait = ?self.settings.subscribe_wait,
                "consumer not listening yet, publishing anyway"
            );
        }
        self.publisher.publish_prepared(&message).await?;
        debug!(
            session_id = %message.session_id,
            msg_type = %message.envelope.msg_type,
            "message submitted"
        );
        Ok(message.session_id)
    }

    /// Wait up to `timeout` (clamped to the configured maximum) for the
    /// session's next reply. Unknown or invalid ids return `None` at once.
    pub async fn poll_reply(&self, session_id: &str, timeout: Duration) -> Option<Envelope> {
        let session_id = SessionId::parse(session_id).ok()?;
        let buffer = self.registry.buffer_for(&session_id)?;
        buffer
            .recv_timeout(timeout.min(self.settings.max_poll_timeout))
            .await
    }

    /// Like [`Bridge::poll_reply`], returning only the reply content.
    pub async fn poll(&self, session_id: &str, timeout: Duration) -> Option<String> {
        self.poll_reply(session_id, timeout)
            .await
            .map(|reply| reply.content)
    }

    /// Stop the session's consumer and forget the session. Idempotent; ids
    /// that are unknown or invalid are a no-op.
    pub async fn cleanup(&self, session_id: &str) -> Option<TeardownReport> {
        match SessionId::parse(session_id) {
            Ok(session_id) => self.registry.remove(&session_id).await,
            Err(e) => {
                debug!(session_id, error = %e, "cleanup for invalid session id ignored");
                None
            }
        }
    }

    /// Remove sessions idle for longer than the configured idle timeout.
    pub async fn reap_idle(&self) -> Vec<SessionId> {
        match self.settings.idle_timeout {
            Some(ttl) => self.registry.reap_idle(ttl).await,
            None => Vec::new(),
        }
    }

    pub fn active_sessions(&self) -> Vec<SessionStatus> {
        self.registry.active_sessions()
    }

    pub fn health(&self) -> BridgeHealth {
        BridgeHealth {
            broker_connected: self.publisher.is_connected(),
            sessions: self.registry.active_sessions(),
        }
    }

    /// Tear down every session, then close the publisher.
    pub async fn shutdown(&self) {
        let reports = self.registry.remove_all().await;
        let unclean = reports.iter().filter(|r| !r.is_clean()).count();
        self.publisher.close().await;
        info!(sessions = reports.len(), unclean, "bridge shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_core::types::MessageKind;
    use chatbridge_test_utils::MockBroker;

    const INBOUND: &str = "chat_responses";
    const POLL: Duration = Duration::from_secs(2);

    fn bridge(broker: &MockBroker) -> Bridge {
        let consumer = ConsumerSettings {
            reconnect_initial: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(40),
            teardown_step_timeout: Duration::from_millis(500),
            ..ConsumerSettings::default()
        };
        Bridge::new(
            broker.connector(),
            ExchangeSpec::durable_topic("chat_messages"),
            consumer,
            BridgeSettings {
                max_poll_timeout: Duration::from_millis(300),
                ..BridgeSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn submit_then_poll_returns_reply() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        let sid = bridge
            .submit(Envelope::text("u1", "bot", "hi"))
            .await
            .unwrap();
        assert_eq!(sid.as_str(), "u1");

        broker.agent_reply(INBOUND, "u1", MessageKind::Text, "hello back");
        assert_eq!(bridge.poll("u1", POLL).await.as_deref(), Some("hello back"));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn poll_reply_keeps_kind_and_url() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        bridge
            .submit(Envelope::text("u1", "bot", "draw a cat"))
            .await
            .unwrap();

        let reply = br#"{"session_id":"u1","content":"img-42","msg_type":"image","url":"https://cdn/img-42"}"#;
        broker.agent_publish(INBOUND, "chat_result.u1.image", reply.to_vec());
        let envelope = bridge.poll_reply("u1", POLL).await.unwrap();
        assert_eq!(envelope.msg_type, MessageKind::Image);
        assert_eq!(envelope.url.as_deref(), Some("https://cdn/img-42"));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_submit_starts_nothing() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        let err = bridge
            .submit(Envelope::text("u1", "bot", "hi").with_session("a#b"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert!(bridge.active_sessions().is_empty());
        assert_eq!(broker.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn poll_unknown_or_invalid_session_is_immediate() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        let started = std::time::Instant::now();
        assert!(bridge.poll("unknown_session", POLL).await.is_none());
        assert!(bridge.poll("bad.id", POLL).await.is_none());
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn poll_wait_is_clamped() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        bridge
            .submit(Envelope::text("u1", "bot", "hi"))
            .await
            .unwrap();
        let started = std::time::Instant::now();
        assert!(bridge.poll("u1", Duration::from_secs(60)).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn group_messages_default_to_the_group_session() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        let sid = bridge
            .submit(Envelope::text("alice", "room1", "hi all").in_group())
            .await
            .unwrap();
        assert_eq!(sid.as_str(), "room1");
        let sent = &broker.published_to("chat_messages")[0];
        assert_eq!(sent.routing_key, "chat_session.room1");
        let envelope = sent.envelope().unwrap();
        assert_eq!(envelope.actual_user_id.as_deref(), Some("alice"));
        assert_eq!(envelope.other_user_id.as_deref(), Some("room1"));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_and_tolerates_bad_ids() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        bridge
            .submit(Envelope::text("u1", "bot", "hi"))
            .await
            .unwrap();
        assert!(bridge.cleanup("u1").await.is_some());
        assert!(bridge.cleanup("u1").await.is_none());
        assert!(bridge.cleanup("not a valid id").await.is_none());
        assert_eq!(broker.open_connections(), 1, "only the publisher stays connected");
    }

    #[tokio::test]
    async fn submit_surfaces_unreachable_broker() {
        let broker = MockBroker::new();
        broker.set_reachable(false);
        let bridge = Bridge::new(
            broker.connector(),
            ExchangeSpec::durable_topic("chat_messages"),
            ConsumerSettings::default(),
            BridgeSettings {
                subscribe_wait: Duration::from_millis(50),
                ..BridgeSettings::default()
            },
        );
        let err = bridge
            .submit(Envelope::text("u1", "bot", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Publish { .. }));
        assert!(!bridge.health().broker_connected);
        assert!(bridge.poll("u1", Duration::from_millis(50)).await.is_none());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn health_lists_sessions() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        bridge
            .submit(Envelope::text("u1", "bot", "hi"))
            .await
            .unwrap();
        let health = bridge.health();
        assert!(health.broker_connected);
        assert_eq!(health.sessions.len(), 1);
        assert_eq!(health.sessions[0].session_id.as_str(), "u1");
        bridge.shutdown().await;
        assert!(bridge.active_sessions().is_empty());
        assert_eq!(broker.open_connections(), 0);
    }
}
