// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory topic broker for deterministic testing.
//!
//! `MockBroker` implements the broker traits with AMQP topic semantics
//! (`*` matches one word, `#` zero or more), exclusive and auto-delete
//! queues, per-channel consumers and ack/reject bookkeeping. Tests play the
//! agent side with [`MockBroker::agent_publish`] / [`MockBroker::agent_reply`]
//! and inspect what the bridge did through the accessor methods.
//!
//! Faults can be injected: an unreachable broker, failing connects, failing
//! publishes or queue deletes, and severing every open connection at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use chatbridge_core::codec;
use chatbridge_core::error::BridgeError;
use chatbridge_core::routing::RoutingKey;
use chatbridge_core::traits::{
    BrokerChannel, BrokerConnection, BrokerConnector, Delivery, DeliveryAcker, DeliveryStream,
    ExchangeSpec, QueueSpec,
};
use chatbridge_core::types::{Envelope, MessageKind};

type DeliverySender = mpsc::UnboundedSender<Result<Delivery, BridgeError>>;

/// A message as the broker recorded it on publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub persistent: bool,
}

impl PublishedMessage {
    /// Decode the payload as an envelope.
    pub fn envelope(&self) -> Result<Envelope, BridgeError> {
        codec::decode(&self.payload)
    }
}

/// A settled delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub queue: String,
    pub routing_key: String,
    pub requeue: bool,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    payload: Vec<u8>,
}

struct Consumer {
    channel_id: u64,
    sender: DeliverySender,
}

struct MockQueue {
    owner: Option<u64>,
    auto_delete: bool,
    durable: bool,
    bindings: Vec<(String, String)>,
    pending: VecDeque<StoredMessage>,
    consumer: Option<Consumer>,
}

#[derive(Default)]
struct BrokerState {
    unreachable: bool,
    fail_connects: usize,
    fail_publishes: usize,
    nack_publishes: usize,
    fail_deletes: usize,
    fail_settlements: usize,
    connect_attempts: usize,
    next_id: u64,
    open_connections: HashSet<u64>,
    open_channels: HashSet<u64>,
    confirm_channels: HashSet<u64>,
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, MockQueue>,
    deleted_queues: Vec<String>,
    published: Vec<PublishedMessage>,
    acked: Vec<Settlement>,
    rejected: Vec<Settlement>,
    prefetch: Vec<u16>,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove_queue(&mut self, name: &str) {
        if self.queues.remove(name).is_some() {
            self.deleted_queues.push(name.to_owned());
        }
    }

    /// Drop consumers registered on `channel_id`; auto-delete queues go with them.
    fn cancel_consumers(&mut self, channel_id: u64) {
        let mut orphaned = Vec::new();
        for (name, queue) in &mut self.queues {
            let owned = queue
                .consumer
                .as_ref()
                .is_some_and(|c| c.channel_id == channel_id);
            if owned {
                queue.consumer = None;
                if queue.auto_delete {
                    orphaned.push(name.clone());
                }
            }
        }
        for name in orphaned {
            self.remove_queue(&name);
        }
    }

    fn drop_connection(&mut self, connection_id: u64, channels: &[u64]) {
        self.open_connections.remove(&connection_id);
        for id in channels {
            self.open_channels.remove(id);
            self.cancel_consumers(*id);
        }
        let exclusive: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            self.remove_queue(&name);
        }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    /// connection id -> channel ids opened on it
    channels: Mutex<HashMap<u64, Vec<u64>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<u64, Vec<u64>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Route a message to every queue bound to `exchange` with a matching pattern.
fn route(shared: &Arc<Shared>, state: &mut BrokerState, exchange: &str, message: StoredMessage) -> usize {
    let targets: Vec<String> = state
        .queues
        .iter()
        .filter(|(_, q)| {
            q.bindings
                .iter()
                .any(|(ex, pattern)| ex == exchange && topic_matches(pattern, &message.routing_key))
        })
        .map(|(name, _)| name.clone())
        .collect();
    for name in &targets {
        enqueue(shared, state, name, message.clone(), false);
    }
    targets.len()
}

fn enqueue(
    shared: &Arc<Shared>,
    state: &mut BrokerState,
    queue_name: &str,
    message: StoredMessage,
    front: bool,
) {
    let Some(queue) = state.queues.get_mut(queue_name) else {
        return;
    };
    if front {
        queue.pending.push_front(message);
    } else {
        queue.pending.push_back(message);
    }
    dispatch(shared, queue_name, queue);
}

/// Hand pending messages to the queue's consumer, if any.
fn dispatch(shared: &Arc<Shared>, queue_name: &str, queue: &mut MockQueue) {
    let Some(consumer) = &queue.consumer else {
        return;
    };
    while let Some(message) = queue.pending.pop_front() {
        let delivery = Delivery::new(
            message.routing_key.clone(),
            message.payload.clone(),
            Box::new(MockAcker {
                shared: Arc::clone(shared),
                queue: queue_name.to_owned(),
                message: message.clone(),
            }),
        );
        if consumer.sender.send(Ok(delivery)).is_err() {
            queue.pending.push_front(message);
            queue.consumer = None;
            return;
        }
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| matches(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && matches(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && matches(rest, &key[1..]),
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

/// An in-memory topic broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MockBroker {
    shared: Arc<Shared>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A connector handing out connections to this broker.
    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(self.clone())
    }

    /// Make every subsequent connect fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.lock().unreachable = !reachable;
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.lock().fail_connects = n;
    }

    /// Fail the next `n` publishes with a connection error; the publishing
    /// channel is closed as a real broker would.
    pub fn fail_next_publishes(&self, n: usize) {
        self.shared.lock().fail_publishes = n;
    }

    /// Nack the next `n` publishes made on channels in confirm mode. Nacked
    /// messages are not routed.
    pub fn nack_next_publishes(&self, n: usize) {
        self.shared.lock().nack_publishes = n;
    }

    /// Fail the next `n` acks or rejects. A failed settlement leaves the
    /// message unsettled.
    pub fn fail_next_settlements(&self, n: usize) {
        self.shared.lock().fail_settlements = n;
    }

    /// Fail the next `n` queue deletions.
    pub fn fail_next_deletes(&self, n: usize) {
        self.shared.lock().fail_deletes = n;
    }

    /// Drop every open connection, as if the broker restarted. Consumers see
    /// their delivery streams end; exclusive queues are removed.
    pub fn sever_connections(&self) {
        let channels: Vec<(u64, Vec<u64>)> = self.shared.channels().drain().collect();
        let mut state = self.shared.lock();
        let connections: Vec<u64> = state.open_connections.iter().copied().collect();
        for id in connections {
            let owned = channels
                .iter()
                .find(|(conn, _)| *conn == id)
                .map(|(_, ids)| ids.clone())
                .unwrap_or_default();
            state.drop_connection(id, &owned);
        }
    }

    /// Publish as the agent would. Returns how many queues the message reached.
    pub fn agent_publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> usize {
        let mut state = self.shared.lock();
        state.published.push(PublishedMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            payload: payload.clone(),
            persistent: true,
        });
        route(
            &self.shared,
            &mut state,
            exchange,
            StoredMessage {
                routing_key: routing_key.to_owned(),
                payload,
            },
        )
    }

    /// Publish an agent reply envelope to `chat_result.<session>.<kind>`.
    pub fn agent_reply(
        &self,
        exchange: &str,
        session_id: &str,
        kind: MessageKind,
        content: &str,
    ) -> usize {
        let envelope = Envelope {
            session_id: Some(session_id.to_owned()),
            content: content.to_owned(),
            msg_type: kind,
            ..Envelope::default()
        };
        let payload = match codec::encode(&envelope) {
            Ok(payload) => payload,
            Err(_) => return 0,
        };
        self.agent_publish(exchange, &format!("chat_result.{session_id}.{kind}"), payload)
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.lock().connect_attempts
    }

    pub fn open_connections(&self) -> usize {
        self.shared.lock().open_connections.len()
    }

    pub fn open_channels(&self) -> usize {
        self.shared.lock().open_channels.len()
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.shared.lock().exchanges.get(name).cloned()
    }

    /// Names of all live queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Live queues whose name contains `fragment`.
    pub fn queues_matching(&self, fragment: &str) -> Vec<String> {
        self.queue_names()
            .into_iter()
            .filter(|name| name.contains(fragment))
            .collect()
    }

    /// Binding patterns of a queue, sorted.
    pub fn bindings(&self, queue: &str) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.bindings.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default();
        patterns.sort();
        patterns
    }

    pub fn is_durable(&self, queue: &str) -> bool {
        self.shared
            .lock()
            .queues
            .get(queue)
            .is_some_and(|q| q.durable)
    }

    pub fn pending(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.pending.len())
    }

    pub fn deleted_queues(&self) -> Vec<String> {
        self.shared.lock().deleted_queues.clone()
    }

    /// Everything published so far, by the bridge or the agent side.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.lock().published.clone()
    }

    /// Messages published to one exchange.
    pub fn published_to(&self, exchange: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.exchange == exchange)
            .collect()
    }

    pub fn acked(&self) -> Vec<Settlement> {
        self.shared.lock().acked.clone()
    }

    pub fn rejected(&self) -> Vec<Settlement> {
        self.shared.lock().rejected.clone()
    }

    /// Open channels currently in publisher-confirm mode.
    pub fn confirming_channels(&self) -> usize {
        let state = self.shared.lock();
        state
            .confirm_channels
            .intersection(&state.open_channels)
            .count()
    }

    pub fn prefetch_values(&self) -> Vec<u16> {
        self.shared.lock().prefetch.clone()
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    fn endpoint(&self) -> String {
        "mock://broker".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BridgeError> {
        let mut state = self.shared.lock();
        state.connect_attempts += 1;
        if state.unreachable {
            return Err(BridgeError::Connection {
                message: "mock broker unreachable".into(),
                source: None,
            });
        }
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(BridgeError::Connection {
                message: "mock connect failure".into(),
                source: None,
            });
        }
        let id = state.next_id();
        state.open_connections.insert(id);
        Ok(Box::new(MockConnection {
            shared: Arc::clone(&self.shared),
            id,
        }))
    }
}

struct MockConnection {
    shared: Arc<Shared>,
    id: u64,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BridgeError> {
        let mut state = self.shared.lock();
        if !state.open_connections.contains(&self.id) {
            return Err(BridgeError::Connection {
                message: "connection closed".into(),
                source: None,
            });
        }
        let channel_id = state.next_id();
        state.open_channels.insert(channel_id);
        drop(state);
        self.shared
            .channels()
            .entry(self.id)
            .or_default()
            .push(channel_id);
        Ok(Box::new(MockChannel {
            shared: Arc::clone(&self.shared),
            connection_id: self.id,
            id: channel_id,
        }))
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().open_connections.contains(&self.id)
    }

    async fn close(&self) -> Result<(), BridgeError> {
        let owned = self.shared.channels().remove(&self.id).unwrap_or_default();
        self.shared.lock().drop_connection(self.id, &owned);
        Ok(())
    }
}

struct MockChannel {
    shared: Arc<Shared>,
    connection_id: u64,
    id: u64,
}

impl MockChannel {
    fn check_open(&self, state: &BrokerState) -> Result<(), BridgeError> {
        if state.open_channels.contains(&self.id) && state.open_connections.contains(&self.connection_id)
        {
            Ok(())
        } else {
            Err(BridgeError::Connection {
                message: "channel closed".into(),
                source: None,
            })
        }
    }

    /// Close this channel after a channel-level error, as a real broker does.
    fn fail(&self, state: &mut BrokerState, message: String) -> BridgeError {
        state.open_channels.remove(&self.id);
        state.cancel_consumers(self.id);
        BridgeError::Broker {
            message,
            source: None,
        }
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        let existing = state.exchanges.get(&exchange.name).cloned();
        match existing {
            Some(existing) if existing != *exchange => Err(self.fail(
                &mut state,
                format!("PRECONDITION_FAILED: exchange {} redeclared", exchange.name),
            )),
            Some(_) => Ok(()),
            None => {
                state
                    .exchanges
                    .insert(exchange.name.clone(), exchange.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<String, BridgeError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        let (name, exclusive, auto_delete, durable) = match queue {
            QueueSpec::ServerNamed => {
                let seq = state.next_id();
                (format!("amq.gen-{seq}"), true, false, false)
            }
            QueueSpec::Ephemeral { name } => (name.clone(), true, true, false),
            QueueSpec::Durable { name } => (name.clone(), false, false, true),
        };
        if let Some(existing) = state.queues.get(&name) {
            if existing.owner.is_some_and(|owner| owner != self.connection_id) {
                return Err(self.fail(
                    &mut state,
                    format!("RESOURCE_LOCKED: queue {name} is exclusive to another connection"),
                ));
            }
            return Ok(name);
        }
        state.queues.insert(
            name.clone(),
            MockQueue {
                owner: exclusive.then_some(self.connection_id),
                auto_delete,
                durable,
                bindings: Vec::new(),
                pending: VecDeque::new(),
                consumer: None,
            },
        );
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &RoutingKey,
    ) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        if !state.exchanges.contains_key(exchange) {
            return Err(self.fail(&mut state, format!("NOT_FOUND: no exchange {exchange}")));
        }
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(self.fail(&mut state, format!("NOT_FOUND: no queue {queue}")));
        };
        let binding = (exchange.to_owned(), routing_key.as_str().to_owned());
        if !q.bindings.contains(&binding) {
            q.bindings.push(binding);
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        state.prefetch.push(count);
        Ok(())
    }

    async fn enable_confirms(&self) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        state.confirm_channels.insert(self.id);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &RoutingKey,
        payload: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            state.open_channels.remove(&self.id);
            return Err(BridgeError::Connection {
                message: "mock publish failure".into(),
                source: None,
            });
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(self.fail(&mut state, format!("NOT_FOUND: no exchange {exchange}")));
        }
        if state.nack_publishes > 0 && state.confirm_channels.contains(&self.id) {
            state.nack_publishes -= 1;
            return Err(BridgeError::Publish {
                message: "mock broker nacked the message".into(),
                source: None,
            });
        }
        state.published.push(PublishedMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.as_str().to_owned(),
            payload: payload.clone(),
            persistent,
        });
        route(
            &self.shared,
            &mut state,
            exchange,
            StoredMessage {
                routing_key: routing_key.as_str().to_owned(),
                payload,
            },
        );
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, BridgeError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(self.fail(&mut state, format!("NOT_FOUND: no queue {queue}")));
        };
        q.consumer = Some(Consumer {
            channel_id: self.id,
            sender,
        });
        dispatch(&self.shared, queue, q);

        let stream = futures::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        if state.fail_deletes > 0 {
            state.fail_deletes -= 1;
            return Err(BridgeError::Broker {
                message: format!("mock delete failure for {queue}"),
                source: None,
            });
        }
        state.remove_queue(queue);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.check_open(&self.shared.lock()).is_ok()
    }

    async fn close(&self) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        state.open_channels.remove(&self.id);
        state.cancel_consumers(self.id);
        Ok(())
    }
}

fn take_settlement_fault(state: &mut BrokerState) -> Result<(), BridgeError> {
    if state.fail_settlements > 0 {
        state.fail_settlements -= 1;
        return Err(BridgeError::Connection {
            message: "mock settlement failure".into(),
            source: None,
        });
    }
    Ok(())
}

struct MockAcker {
    shared: Arc<Shared>,
    queue: String,
    message: StoredMessage,
}

impl MockAcker {
    fn settlement(&self, requeue: bool) -> Settlement {
        Settlement {
            queue: self.queue.clone(),
            routing_key: self.message.routing_key.clone(),
            requeue,
        }
    }
}

#[async_trait]
impl DeliveryAcker for MockAcker {
    async fn ack(&self) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        take_settlement_fault(&mut state)?;
        state.acked.push(self.settlement(false));
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BridgeError> {
        let mut state = self.shared.lock();
        take_settlement_fault(&mut state)?;
        state.rejected.push(self.settlement(requeue));
        if requeue {
            enqueue(&self.shared, &mut state, &self.queue, self.message.clone(), true);
        }
        Ok(())
    }
}
