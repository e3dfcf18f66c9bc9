// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the publisher, consumers and the request layer.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::BridgeError;

/// Longest accepted session id, in bytes. Keeps every derived routing key
/// and queue name well inside the broker's 255-byte short-string limit.
pub const MAX_SESSION_ID_LEN: usize = 180;

/// Identifier of a conversation, validated against the routing-key grammar.
///
/// A `SessionId` never contains the key delimiter (`.`), the topic
/// wildcards (`*`, `#`), whitespace or control characters, so it can be
/// embedded in a routing key without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a raw session id.
    pub fn parse(raw: impl Into<String>) -> Result<Self, BridgeError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(BridgeError::Validation("session id must not be empty".into()));
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(BridgeError::Validation(format!(
                "session id is {} bytes, limit is {MAX_SESSION_ID_LEN}",
                raw.len()
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| matches!(c, '.' | '*' | '#') || c.is_whitespace() || c.is_control())
        {
            return Err(BridgeError::Validation(format!(
                "session id `{}` contains routing-unsafe character {bad:?}",
                raw.escape_debug()
            )));
        }
        Ok(Self(raw))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::str::FromStr for SessionId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Kind of content carried by an envelope. Also the last segment of a
/// reply routing key.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
    File,
}

/// The fixed set of reply kinds a session consumer subscribes to.
///
/// Always non-empty and free of duplicates; iteration order is the order
/// the kinds were first given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedKinds(Vec<MessageKind>);

impl AcceptedKinds {
    /// Build an accepted set, dropping duplicates.
    pub fn new(kinds: impl IntoIterator<Item = MessageKind>) -> Result<Self, BridgeError> {
        let mut out: Vec<MessageKind> = Vec::new();
        for kind in kinds {
            if !out.contains(&kind) {
                out.push(kind);
            }
        }
        if out.is_empty() {
            return Err(BridgeError::Validation(
                "at least one accepted message kind is required".into(),
            ));
        }
        Ok(Self(out))
    }

    pub fn contains(&self, kind: MessageKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = MessageKind> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AcceptedKinds {
    fn default() -> Self {
        Self(vec![MessageKind::Text, MessageKind::Image])
    }
}

/// The unit exchanged with the broker in both directions.
///
/// Outbound envelopes are built by the request layer; inbound envelopes are
/// agent replies, which often carry only `session_id` and `content`, so every
/// other field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default)]
    pub from_user_id: String,

    #[serde(default)]
    pub to_user_id: String,

    /// Text, or an opaque media reference for non-text kinds.
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub msg_type: MessageKind,

    #[serde(default)]
    pub is_group: bool,

    /// Conversation counterpart: the peer for direct chats, the group for group chats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user_id: Option<String>,

    /// Real sender inside a group chat. Absent for direct chats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<i64>,
}

impl Envelope {
    /// A direct or group text message.
    pub fn text(
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.msg_type = kind;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn in_group(mut self) -> Self {
        self.is_group = true;
        self
    }

    /// The session id this envelope falls back to when none was given:
    /// the group for group chats, the sender for direct chats.
    pub fn default_session_id(&self) -> Result<SessionId, BridgeError> {
        let candidate = if self.is_group {
            &self.to_user_id
        } else {
            &self.from_user_id
        };
        if candidate.is_empty() {
            let role = if self.is_group { "to_user_id" } else { "from_user_id" };
            return Err(BridgeError::Validation(format!(
                "no session_id given and {role} is empty"
            )));
        }
        SessionId::parse(candidate.clone())
    }

    /// The validated session id, defaulting per [`Envelope::default_session_id`]
    /// when the field is absent or empty.
    pub fn resolve_session_id(&self) -> Result<SessionId, BridgeError> {
        match self.session_id.as_deref() {
            Some(raw) if !raw.is_empty() => SessionId::parse(raw),
            _ => self.default_session_id(),
        }
    }

    /// Fill the counterpart/true-sender fields. Exactly one rule applies,
    /// chosen by `is_group`; caller-supplied values are kept.
    pub fn derive_roles(&mut self) {
        if self.other_user_id.is_none() {
            self.other_user_id = Some(self.to_user_id.clone());
        }
        if self.is_group {
            if self.actual_user_id.is_none() {
                self.actual_user_id = Some(self.from_user_id.clone());
            }
        } else {
            self.actual_user_id = None;
        }
    }
}
