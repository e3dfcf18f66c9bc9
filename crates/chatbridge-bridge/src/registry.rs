// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session registry: session id -> (buffer, consumer).
//!
//! The map is guarded by one short-lived lock that is never held across an
//! await. Consumer teardown runs outside the lock. Each entry carries a
//! closing flag and a `closed` latch so that a re-submit racing a cleanup
//! waits for the old consumer to finish before a new one starts: at most
//! one consumer per session id exists at any moment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatbridge_core::error::BridgeError;
use chatbridge_core::traits::BrokerConnector;
use chatbridge_core::types::SessionId;

use crate::buffer::SessionBuffer;
use crate::consumer::{
    ConsumerHandle, ConsumerSettings, ConsumerState, SessionConsumer, wait_until_listening,
};
use crate::teardown::TeardownReport;

/// One bridged session.
pub struct SessionEntry {
    session_id: SessionId,
    buffer: Arc<SessionBuffer>,
    consumer: Mutex<Option<ConsumerHandle>>,
    state: watch::Receiver<ConsumerState>,
    closing: AtomicBool,
    closed: CancellationToken,
    last_activity: Mutex<Instant>,
}

impl SessionEntry {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn buffer(&self) -> &Arc<SessionBuffer> {
        &self.buffer
    }

    pub fn consumer_state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the consumer's bindings to be in place.
    pub async fn wait_until_listening(&self, timeout: Duration) -> bool {
        wait_until_listening(self.state.clone(), timeout).await
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    fn take_consumer(&self) -> Option<ConsumerHandle> {
        self.consumer.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("session_id", &self.session_id)
            .field("state", &self.consumer_state())
            .field("buffered", &self.buffer.len())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Snapshot of one session for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub consumer_state: ConsumerState,
    pub buffered: usize,
    pub idle_secs: u64,
}

/// Concurrent map of live sessions.
pub struct SessionRegistry {
    connector: Arc<dyn BrokerConnector>,
    settings: Arc<ConsumerSettings>,
    buffer_capacity: usize,
    max_sessions: usize,
    entries: Arc<Mutex<HashMap<SessionId, Arc<SessionEntry>>>>,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        settings: ConsumerSettings,
        buffer_capacity: usize,
        max_sessions: usize,
    ) -> Self {
        Self {
            connector,
            settings: Arc::new(settings),
            buffer_capacity,
            max_sessions,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<SessionEntry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the live entry for `session_id`, creating it and starting its
    /// consumer if absent. If the id is being cleaned up, waits for that to
    /// finish and then creates a fresh entry.
    pub async fn ensure_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Arc<SessionEntry>, BridgeError> {
        loop {
            let closed = {
                let mut entries = self.lock();
                match entries.get(session_id) {
                    Some(entry) if !entry.is_closing() => {
                        entry.touch();
                        return Ok(Arc::clone(entry));
                    }
                    Some(entry) => entry.closed.clone(),
                    None => {
                        if entries.len() >= self.max_sessions {
                            return Err(BridgeError::Capacity {
                                max: self.max_sessions,
                            });
                        }
                        let entry = Arc::new(self.open_entry(session_id.clone()));
                        entries.insert(session_id.clone(), Arc::clone(&entry));
                        info!(session_id = %session_id, active = entries.len(), "session opened");
                        return Ok(entry);
                    }
                }
            };
            debug!(session_id = %session_id, "waiting for previous session teardown");
            closed.cancelled().await;
        }
    }

    fn open_entry(&self, session_id: SessionId) -> SessionEntry {
        let buffer = Arc::new(SessionBuffer::new(self.buffer_capacity));
        let handle = SessionConsumer::new(
            session_id.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.settings),
            buffer.sender(),
        )
        .start();
        SessionEntry {
            session_id,
            buffer,
            state: handle.subscribe(),
            consumer: Mutex::new(Some(handle)),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// The live entry for `session_id`, if any. Entries being cleaned up
    /// count as absent.
    pub fn get(&self, session_id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.lock()
            .get(session_id)
            .filter(|entry| !entry.is_closing())
            .cloned()
    }

    /// The session's buffer, marking the session active.
    pub fn buffer_for(&self, session_id: &SessionId) -> Option<Arc<SessionBuffer>> {
        let entry = self.get(session_id)?;
        entry.touch();
        Some(Arc::clone(&entry.buffer))
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.get(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stop the session's consumer, then erase the entry.
    ///
    /// Unknown ids are a no-op. When another caller is already removing the
    /// same id, this waits for that teardown and returns `None`. The
    /// teardown runs on its own task, so dropping this future does not
    /// leave the entry half-closed.
    pub async fn remove(&self, session_id: &SessionId) -> Option<TeardownReport> {
        let (entry, owner) = {
            let entries = self.lock();
            let entry = Arc::clone(entries.get(session_id)?);
            let owner = !entry.closing.swap(true, Ordering::AcqRel);
            (entry, owner)
        };
        if !owner {
            entry.closed.cancelled().await;
            return None;
        }

        let entries = Arc::clone(&self.entries);
        let teardown = tokio::spawn(async move {
            let _closed = entry.closed.clone().drop_guard();
            let report = match entry.take_consumer() {
                Some(handle) => handle.stop().await,
                None => TeardownReport::new(),
            };
            {
                let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
                if entries
                    .get(&entry.session_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &entry))
                {
                    entries.remove(&entry.session_id);
                }
            }
            report.log(&entry.session_id);
            info!(session_id = %entry.session_id, clean = report.is_clean(), "session closed");
            report
        });

        match teardown.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "session teardown task failed");
                None
            }
        }
    }

    /// Remove every session concurrently.
    pub async fn remove_all(&self) -> Vec<TeardownReport> {
        let ids: Vec<SessionId> = self.lock().keys().cloned().collect();
        let removals = ids.iter().map(|id| self.remove(id));
        futures::future::join_all(removals)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Remove sessions without submit/poll activity for at least `ttl`.
    /// Returns the ids removed.
    pub async fn reap_idle(&self, ttl: Duration) -> Vec<SessionId> {
        let idle: Vec<SessionId> = self
            .lock()
            .values()
            .filter(|entry| !entry.is_closing() && entry.idle_for() >= ttl)
            .map(|entry| entry.session_id.clone())
            .collect();
        let mut reaped = Vec::with_capacity(idle.len());
        for id in idle {
            if self.remove(&id).await.is_some() {
                info!(session_id = %id, ttl = ?ttl, "idle session reaped");
                reaped.push(id);
            }
        }
        reaped
    }

    /// Snapshot of all live sessions, ordered by id.
    pub fn active_sessions(&self) -> Vec<SessionStatus> {
        let mut sessions: Vec<SessionStatus> = self
            .lock()
            .values()
            .filter(|entry| !entry.is_closing())
            .map(|entry| SessionStatus {
                session_id: entry.session_id.clone(),
                consumer_state: entry.consumer_state(),
                buffered: entry.buffer.len(),
                idle_secs: entry.idle_for().as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| a.session_id.as_str().cmp(b.session_id.as_str()));
        sessions
    }
}
