// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Envelope wire codec (JSON) and outbound default stamping.

use crate::error::BridgeError;
use crate::types::{Envelope, SessionId};

/// Content type advertised on published messages.
pub const CONTENT_TYPE: &str = "application/json";

/// Fill defaults an outbound envelope must carry before it is published:
/// a validated `session_id`, a `create_time`, and the role fields.
///
/// Present values are never overwritten. Returns the effective session id.
pub fn stamp_defaults(envelope: &mut Envelope, now_epoch_secs: i64) -> Result<SessionId, BridgeError> {
    let session_id = envelope.resolve_session_id()?;
    envelope.session_id = Some(session_id.as_str().to_owned());
    if envelope.create_time.is_none() {
        envelope.create_time = Some(now_epoch_secs);
    }
    envelope.derive_roles();
    Ok(session_id)
}

/// Current wall-clock time in epoch seconds.
pub fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Serialize an envelope for the wire.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, BridgeError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode a wire payload into an envelope.
pub fn decode(payload: &[u8]) -> Result<Envelope, BridgeError> {
    serde_json::from_slice(payload).map_err(|e| BridgeError::Encoding {
        message: format!("malformed envelope ({} bytes): {e}", payload.len()),
        source: Some(Box::new(e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;

    #[test]
    fn stamp_fills_missing_fields() {
        let mut env = Envelope::text("u1", "bot", "hi");
        let sid = stamp_defaults(&mut env, 1_700_000_000).unwrap();
        assert_eq!(sid.as_str(), "u1");
        assert_eq!(env.session_id.as_deref(), Some("u1"));
        assert_eq!(env.create_time, Some(1_700_000_000));
        assert_eq!(env.other_user_id.as_deref(), Some("bot"));
    }

    #[test]
    fn stamp_keeps_caller_values() {
        let mut env = Envelope::text("u1", "bot", "hi").with_session("s-7");
        env.create_time = Some(42);
        stamp_defaults(&mut env, 1_700_000_000).unwrap();
        assert_eq!(env.session_id.as_deref(), Some("s-7"));
        assert_eq!(env.create_time, Some(42));
    }

    #[test]
    fn stamp_rejects_unsafe_session() {
        let mut env = Envelope::text("u1", "bot", "hi").with_session("a.b");
        assert!(matches!(
            stamp_defaults(&mut env, 0),
            Err(BridgeError::Validation(_))
        ));
    }

    #[test]
    fn encoded_text_decodes_to_same_content() {
        let mut env = Envelope::text("u1", "bot", "你好").with_kind(MessageKind::Text);
        stamp_defaults(&mut env, 5).unwrap();
        let back = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.content, "你好");
    }

    #[test]
    fn wire_field_names_match_agent_contract() {
        let mut env = Envelope::text("u1", "g1", "pic")
            .in_group()
            .with_kind(MessageKind::Image)
            .with_url("file-123");
        stamp_defaults(&mut env, 9).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encode(&env).unwrap()).unwrap();
        assert_eq!(json["session_id"], "g1");
        assert_eq!(json["msg_type"], "image");
        assert_eq!(json["is_group"], true);
        assert_eq!(json["other_user_id"], "g1");
        assert_eq!(json["actual_user_id"], "u1");
        assert_eq!(json["url"], "file-123");
        assert_eq!(json["create_time"], 9);
    }

    #[test]
    fn garbage_is_an_encoding_error() {
        for payload in [
            &b"not json"[..],
            &b"[1,2]"[..],
            &b"{\"msg_type\":\"hologram\"}"[..],
        ] {
            assert!(matches!(decode(payload), Err(BridgeError::Encoding { .. })));
        }
    }
}
