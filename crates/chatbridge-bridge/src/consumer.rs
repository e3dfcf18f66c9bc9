// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session reply consumer.
//!
//! A [`SessionConsumer`] owns one broker connection, one channel and one
//! queue bound to `chat_result.<session>.<kind>` for every accepted kind.
//! It runs as its own task and moves through
//! `Created -> Connecting -> Listening -> Stopping -> Stopped`, falling back
//! to `Failed` and reconnecting with exponential backoff when the broker
//! link drops. Decoded replies go into the session's buffer; undecodable or
//! foreign-session deliveries are rejected without requeue.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatbridge_config::model::{BridgeConfig, BrokerConfig};
use chatbridge_core::codec;
use chatbridge_core::error::BridgeError;
use chatbridge_core::routing::inbound_patterns;
use chatbridge_core::traits::{
    BrokerChannel, BrokerConnection, BrokerConnector, Delivery, DeliveryStream, ExchangeSpec,
    QueueSpec,
};
use chatbridge_core::types::{AcceptedKinds, Envelope, SessionId};

use crate::teardown::TeardownReport;

/// Name prefix of client-named ephemeral reply queues.
pub const EPHEMERAL_QUEUE_PREFIX: &str = "chatbridge.reply";

/// Teardown has three broker steps; `stop` allows one more step's worth of
/// slack before aborting the task.
const STOP_BUDGET_STEPS: u32 = 4;

/// States of the session consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    /// Built, task not yet running.
    Created,
    /// Dialing the broker and declaring the subscription.
    Connecting,
    /// Bound and consuming.
    Listening,
    /// Link lost; waiting out the backoff before reconnecting.
    Failed,
    /// Stop requested; releasing resources.
    Stopping,
    /// Terminal.
    Stopped,
}

impl ConsumerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConsumerState::Stopping | ConsumerState::Stopped)
    }
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerState::Created => write!(f, "created"),
            ConsumerState::Connecting => write!(f, "connecting"),
            ConsumerState::Listening => write!(f, "listening"),
            ConsumerState::Failed => write!(f, "failed"),
            ConsumerState::Stopping => write!(f, "stopping"),
            ConsumerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Settings shared by every session consumer.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Inbound exchange; declared identically to the agent side.
    pub exchange: ExchangeSpec,
    pub accepted_kinds: AcceptedKinds,
    /// When set, queues are durable and named `<prefix>.<session>`.
    pub durable_queue_prefix: Option<String>,
    pub prefetch: u16,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub teardown_step_timeout: Duration,
}

impl ConsumerSettings {
    pub fn from_config(broker: &BrokerConfig, bridge: &BridgeConfig) -> Result<Self, BridgeError> {
        Ok(Self {
            exchange: ExchangeSpec::durable_topic(&broker.inbound_exchange),
            accepted_kinds: AcceptedKinds::new(bridge.accepted_kinds.iter().copied())?,
            durable_queue_prefix: bridge.durable_queue_prefix.clone(),
            prefetch: bridge.prefetch.max(1),
            reconnect_initial: Duration::from_millis(bridge.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(bridge.reconnect_max_ms),
            teardown_step_timeout: Duration::from_millis(bridge.teardown_step_timeout_ms),
        })
    }

    /// The queue a session subscribes through. Ephemeral names carry a
    /// random suffix so a re-created session never collides with a queue
    /// still being torn down.
    pub fn queue_spec(&self, session_id: &SessionId) -> QueueSpec {
        match &self.durable_queue_prefix {
            Some(prefix) => QueueSpec::Durable {
                name: format!("{prefix}.{session_id}"),
            },
            None => QueueSpec::Ephemeral {
                name: format!(
                    "{EPHEMERAL_QUEUE_PREFIX}.{session_id}.{}",
                    uuid::Uuid::new_v4().simple()
                ),
            },
        }
    }

    fn stop_budget(&self) -> Duration {
        self.teardown_step_timeout * STOP_BUDGET_STEPS
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            exchange: ExchangeSpec::durable_topic("chat_responses"),
            accepted_kinds: AcceptedKinds::default(),
            durable_queue_prefix: None,
            prefetch: 1,
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            teardown_step_timeout: Duration::from_secs(3),
        }
    }
}

/// Broker resources held by one subscription attempt.
#[derive(Default)]
struct ResourceSet {
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Box<dyn BrokerChannel>>,
    queue: Option<(QueueSpec, String)>,
}

enum ListenExit {
    Stopped,
    Lost(String),
}

/// A not-yet-started consumer for one session.
pub struct SessionConsumer {
    session_id: SessionId,
    connector: Arc<dyn BrokerConnector>,
    settings: Arc<ConsumerSettings>,
    sink: mpsc::Sender<Envelope>,
}

impl SessionConsumer {
    pub fn new(
        session_id: SessionId,
        connector: Arc<dyn BrokerConnector>,
        settings: Arc<ConsumerSettings>,
        sink: mpsc::Sender<Envelope>,
    ) -> Self {
        Self {
            session_id,
            connector,
            settings,
            sink,
        }
    }

    /// Spawn the consumer task. Consumes `self`: a consumer runs once.
    pub fn start(self) -> ConsumerHandle {
        let (state_tx, state_rx) = watch::channel(ConsumerState::Created);
        let cancel = CancellationToken::new();
        let session_id = self.session_id.clone();
        let stop_budget = self.settings.stop_budget();
        let task = tokio::spawn(self.run(state_tx, cancel.clone()));
        ConsumerHandle {
            session_id,
            state: state_rx,
            cancel,
            task,
            stop_budget,
        }
    }

    async fn run(
        self,
        state: watch::Sender<ConsumerState>,
        cancel: CancellationToken,
    ) -> TeardownReport {
        let set_state = |next: ConsumerState| {
            debug!(session_id = %self.session_id, state = %next, "consumer state");
            state.send_replace(next);
        };
        let mut backoff = self.settings.reconnect_initial;

        let resources = loop {
            if cancel.is_cancelled() {
                break ResourceSet::default();
            }
            set_state(ConsumerState::Connecting);

            let mut resources = ResourceSet::default();
            let established = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.establish(&mut resources) => Some(result),
            };

            let lost = match established {
                None => break resources,
                Some(Ok(stream)) => {
                    backoff = self.settings.reconnect_initial;
                    set_state(ConsumerState::Listening);
                    match self.listen(stream, &cancel).await {
                        ListenExit::Stopped => break resources,
                        ListenExit::Lost(reason) => reason,
                    }
                }
                Some(Err(e)) => e.to_string(),
            };

            warn!(
                session_id = %self.session_id,
                error = %lost,
                retry_in = ?backoff,
                "consumer lost broker link"
            );
            set_state(ConsumerState::Failed);
            self.teardown(resources).await.log(&self.session_id);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break ResourceSet::default(),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.settings.reconnect_max);
        };

        set_state(ConsumerState::Stopping);
        let report = self.teardown(resources).await;
        report.log(&self.session_id);
        set_state(ConsumerState::Stopped);
        report
    }

    /// Connect, declare, bind, and start consuming. Resources are recorded in
    /// `resources` as they are acquired so a partial failure can be undone.
    async fn establish(&self, resources: &mut ResourceSet) -> Result<DeliveryStream, BridgeError> {
        let connection = resources.connection.insert(self.connector.connect().await?);
        let channel = resources.channel.insert(connection.create_channel().await?);

        let exchange = &self.settings.exchange;
        channel.declare_exchange(exchange).await?;

        let spec = self.settings.queue_spec(&self.session_id);
        let queue = channel.declare_queue(&spec).await?;
        resources.queue = Some((spec, queue.clone()));

        for pattern in inbound_patterns(&self.session_id, &self.settings.accepted_kinds) {
            channel.bind_queue(&queue, &exchange.name, &pattern).await?;
        }
        channel.set_prefetch(self.settings.prefetch).await?;

        let tag = format!("chatbridge-{}-{}", self.session_id, uuid::Uuid::new_v4().simple());
        let stream = channel.consume(&queue, &tag).await?;
        info!(
            session_id = %self.session_id,
            queue = %queue,
            kinds = self.settings.accepted_kinds.len(),
            "consumer listening"
        );
        Ok(stream)
    }

    async fn listen(&self, mut stream: DeliveryStream, cancel: &CancellationToken) -> ListenExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ListenExit::Stopped,
                next = stream.next() => next,
            };
            match next {
                None => return ListenExit::Lost("delivery stream ended".into()),
                Some(Err(e)) => return ListenExit::Lost(e.to_string()),
                Some(Ok(delivery)) => {
                    if let Some(exit) = self.handle(delivery, cancel).await {
                        return exit;
                    }
                }
            }
        }
    }

    /// Settle one delivery. Returns an exit when the loop must stop.
    async fn handle(&self, delivery: Delivery, cancel: &CancellationToken) -> Option<ListenExit> {
        let routing_key = delivery.routing_key.clone();
        let envelope = match codec::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    routing_key = %routing_key,
                    error = %e,
                    "rejecting undecodable delivery"
                );
                return self.settle(delivery.reject(false).await);
            }
        };

        let foreign = envelope
            .session_id
            .as_deref()
            .filter(|sid| !sid.is_empty() && *sid != self.session_id.as_str());
        if let Some(other) = foreign {
            warn!(
                session_id = %self.session_id,
                routing_key = %routing_key,
                body_session_id = %other,
                "rejecting delivery for another session"
            );
            return self.settle(delivery.reject(false).await);
        }

        let pushed = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.sink.send(envelope) => sent.is_ok(),
        };
        if !pushed {
            // Stopping or the buffer is gone: give the message back.
            if let Err(e) = delivery.reject(true).await {
                debug!(
                    session_id = %self.session_id,
                    routing_key = %routing_key,
                    error = %e,
                    "requeue of unbuffered delivery failed"
                );
            }
            return Some(ListenExit::Stopped);
        }
        debug!(session_id = %self.session_id, routing_key = %routing_key, "reply buffered");
        self.settle(delivery.ack().await)
    }

    fn settle(&self, result: Result<(), BridgeError>) -> Option<ListenExit> {
        match result {
            Ok(()) => None,
            Err(e) => Some(ListenExit::Lost(format!("settling delivery failed: {e}"))),
        }
    }

    /// Release resources in order: queue, channel, connection. Each step is
    /// bounded and attempted regardless of earlier failures.
    async fn teardown(&self, resources: ResourceSet) -> TeardownReport {
        let limit = self.settings.teardown_step_timeout;
        let mut report = TeardownReport::new();

        if let Some(channel) = &resources.channel {
            if let Some((spec, queue)) = &resources.queue {
                if spec.delete_on_teardown(queue) && channel.is_open() {
                    report.run("delete_queue", limit, channel.delete_queue(queue)).await;
                }
            }
            report.run("close_channel", limit, channel.close()).await;
        }
        if let Some(connection) = &resources.connection {
            report
                .run("close_connection", limit, connection.close())
                .await;
        }
        report
    }
}

/// Owner's handle on a running consumer. Dropping it requests a stop
/// without waiting; [`ConsumerHandle::stop`] waits for teardown.
pub struct ConsumerHandle {
    session_id: SessionId,
    state: watch::Receiver<ConsumerState>,
    cancel: CancellationToken,
    task: JoinHandle<TeardownReport>,
    stop_budget: Duration,
}

impl ConsumerHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// A receiver of state changes, independent of this handle.
    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// Wait up to `timeout` for the consumer to be bound and consuming.
    pub async fn wait_until_listening(&self, timeout: Duration) -> bool {
        wait_until_listening(self.subscribe(), timeout).await
    }

    /// Stop the consumer and wait for its teardown. Never fails: problems are
    /// reported in the returned [`TeardownReport`].
    pub async fn stop(mut self) -> TeardownReport {
        self.cancel.cancel();
        match tokio::time::timeout(self.stop_budget, &mut self.task).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                let mut report = TeardownReport::new();
                report.record(
                    "join_consumer",
                    Err(BridgeError::Internal(format!("consumer task failed: {e}"))),
                );
                report
            }
            Err(_) => {
                self.task.abort();
                let mut report = TeardownReport::new();
                report.record(
                    "join_consumer",
                    Err(BridgeError::Timeout {
                        duration: self.stop_budget,
                    }),
                );
                report
            }
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Wait on a state receiver until the consumer listens or starts stopping.
pub async fn wait_until_listening(
    mut state: watch::Receiver<ConsumerState>,
    timeout: Duration,
) -> bool {
    let reached = tokio::time::timeout(
        timeout,
        state.wait_for(|s| *s == ConsumerState::Listening || s.is_terminal()),
    )
    .await;
    matches!(reached, Ok(Ok(s)) if *s == ConsumerState::Listening)
}
