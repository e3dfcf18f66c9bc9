// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routing-key grammar shared by the publish and subscribe sides.
//!
//! ```text
//! outbound (to the agent):   chat_session.<session_id>
//! inbound  (agent replies):  chat_result.<session_id>.<msg_type>
//! ```
//!
//! Session ids and kinds are validated types, so every function here is
//! total and pure.

use crate::types::{AcceptedKinds, MessageKind, SessionId};

/// First segment of keys for messages travelling to the agent.
pub const OUTBOUND_PREFIX: &str = "chat_session";

/// First segment of keys for agent replies.
pub const INBOUND_PREFIX: &str = "chat_result";

/// Segment delimiter of the topic grammar.
pub const DELIMITER: char = '.';

/// A hierarchical routing key (or binding pattern) for a topic exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into delimiter-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(DELIMITER)
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key for a user turn published towards the agent.
pub fn outbound_key(session_id: &SessionId) -> RoutingKey {
    RoutingKey(format!("{OUTBOUND_PREFIX}{DELIMITER}{session_id}"))
}

/// Key an agent publishes a reply of `kind` under, and the exact pattern a
/// session consumer binds. No wildcards: one session, one kind.
pub fn inbound_pattern(session_id: &SessionId, kind: MessageKind) -> RoutingKey {
    RoutingKey(format!(
        "{INBOUND_PREFIX}{DELIMITER}{session_id}{DELIMITER}{kind}"
    ))
}

/// Every binding a session consumer needs: one per accepted kind.
pub fn inbound_patterns(session_id: &SessionId, kinds: &AcceptedKinds) -> Vec<RoutingKey> {
    kinds
        .iter()
        .map(|kind| inbound_pattern(session_id, kind))
        .collect()
}
