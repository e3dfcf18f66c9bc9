// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers.
//!
//! Handles POST /send_message, GET /get_message, POST /cleanup_session,
//! POST /upload_image, GET /health, GET /sessions.
//!
//! Command endpoints answer `{"code": n, "msg": …}` where `code` 0 is
//! success: 1 is a bad request or send failure, 2 a media API failure and 3
//! uploads being unavailable.

use std::time::Duration;

use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use chatbridge_bridge::SessionStatus;
use chatbridge_core::error::BridgeError;
use chatbridge_core::types::{Envelope, MessageKind};

use crate::media::UploadFile;
use crate::server::GatewayState;

const CODE_OK: u8 = 0;
const CODE_FAILED: u8 = 1;
const CODE_MEDIA_FAILED: u8 = 2;
const CODE_UNAVAILABLE: u8 = 3;

/// Request body for POST /send_message. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendMessageRequest {
    pub content: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub is_group: bool,
    /// Group id; stands in for `to_user_id` on group messages that omit it.
    pub group_id: String,
    pub session_id: String,
    pub msg_type: Option<String>,
    pub url: String,
}

impl SendMessageRequest {
    /// Translate into an envelope. Fails on an unknown `msg_type`.
    pub fn into_envelope(self) -> Result<Envelope, BridgeError> {
        let msg_type = match self.msg_type.as_deref() {
            None | Some("") => MessageKind::Text,
            Some(raw) => raw
                .parse::<MessageKind>()
                .map_err(|_| BridgeError::Validation(format!("unknown msg_type `{raw}`")))?,
        };
        let to_user_id = if self.is_group && self.to_user_id.is_empty() {
            self.group_id
        } else {
            self.to_user_id
        };
        Ok(Envelope {
            session_id: non_empty(self.session_id),
            from_user_id: self.from_user_id,
            to_user_id,
            content: self.content,
            msg_type,
            is_group: self.is_group,
            url: non_empty(self.url),
            ..Envelope::default()
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// `{code, msg}` answer of the command endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResponse {
    pub code: u8,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CommandResponse {
    fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: CODE_OK,
            msg: msg.into(),
            session_id: None,
            url: None,
        }
    }

    fn failed(code: u8, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            session_id: None,
            url: None,
        }
    }

    fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Query for GET /get_message.
#[derive(Debug, Deserialize)]
pub struct GetMessageQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Response body for GET /get_message. `content` is empty when no reply
/// arrived in time.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GetMessageResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Request body for POST /cleanup_session.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Response body for GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub broker_connected: bool,
    pub sessions: usize,
}

/// Response body for GET /sessions.
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionStatus>,
}

/// POST /send_message
///
/// Publishes the message and makes sure a consumer is listening for the
/// session's replies.
pub async fn send_message(
    State(state): State<GatewayState>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    let envelope = match body.into_envelope() {
        Ok(envelope) => envelope,
        Err(e) => {
            return CommandResponse::failed(CODE_FAILED, e.to_string())
                .with_status(StatusCode::BAD_REQUEST);
        }
    };

    match state.bridge.submit(envelope).await {
        Ok(session_id) => {
            let mut response = CommandResponse::ok("message sent");
            response.session_id = Some(session_id.to_string());
            response.with_status(StatusCode::OK)
        }
        Err(e @ BridgeError::Capacity { .. }) => {
            warn!(error = %e, "send_message rejected");
            CommandResponse::failed(CODE_FAILED, e.to_string())
                .with_status(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) if e.is_client_error() => {
            CommandResponse::failed(CODE_FAILED, e.to_string()).with_status(StatusCode::BAD_REQUEST)
        }
        Err(e) => {
            warn!(error = %e, "send_message failed");
            CommandResponse::failed(CODE_FAILED, format!("message send failed: {e}"))
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /get_message
///
/// Waits briefly for the session's next reply. Unknown sessions answer
/// with empty content straight away.
pub async fn get_message(
    State(state): State<GatewayState>,
    Query(query): Query<GetMessageQuery>,
) -> Json<GetMessageResponse> {
    let Some(session_id) = query.session_id.filter(|s| !s.is_empty()) else {
        return Json(GetMessageResponse::default());
    };
    let timeout = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.bridge.settings().poll_timeout);

    match state.bridge.poll_reply(&session_id, timeout).await {
        Some(reply) => Json(GetMessageResponse {
            content: reply.content,
            msg_type: Some(reply.msg_type),
            url: reply.url,
        }),
        None => Json(GetMessageResponse::default()),
    }
}

/// POST /cleanup_session
pub async fn cleanup_session(
    State(state): State<GatewayState>,
    Json(body): Json<CleanupRequest>,
) -> Response {
    let Some(session_id) = body.session_id.filter(|s| !s.is_empty()) else {
        return CommandResponse::failed(CODE_FAILED, "session_id is required")
            .with_status(StatusCode::BAD_REQUEST);
    };
    if state.bridge.cleanup(&session_id).await.is_some() {
        info!(session_id = %session_id, "session cleaned up on request");
    }
    CommandResponse::ok("session resources cleaned up").with_status(StatusCode::OK)
}

/// POST /upload_image
///
/// Multipart fields: `file` (required), `session_id`, `user`. The file is
/// forwarded to the media API and its id returned as `url`.
pub async fn upload_image(State(state): State<GatewayState>, mut multipart: Multipart) -> Response {
    let Some(media) = state.media.clone() else {
        return CommandResponse::failed(CODE_UNAVAILABLE, "image upload is not configured")
            .with_status(StatusCode::SERVICE_UNAVAILABLE);
    };

    let mut file: Option<UploadFile> = None;
    let mut session_id = String::new();
    let mut user = String::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return CommandResponse::failed(CODE_FAILED, format!("malformed upload: {e}"))
                    .with_status(StatusCode::BAD_REQUEST);
            }
        };
        let name = field.name().unwrap_or_default().to_owned();
        let outcome = match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let content_type = field.content_type().map(str::to_owned);
                field.bytes().await.map(|bytes| {
                    file = Some(UploadFile {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                })
            }
            "session_id" => field.text().await.map(|text| session_id = text),
            "user" => field.text().await.map(|text| user = text),
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            return CommandResponse::failed(CODE_FAILED, format!("malformed upload: {e}"))
                .with_status(StatusCode::BAD_REQUEST);
        }
    }

    let Some(file) = file else {
        return CommandResponse::failed(CODE_FAILED, "no file part")
            .with_status(StatusCode::BAD_REQUEST);
    };
    if file.file_name.is_empty() {
        return CommandResponse::failed(CODE_FAILED, "no file selected")
            .with_status(StatusCode::BAD_REQUEST);
    }

    let file_name = file.file_name.clone();
    match media.upload(file, Some(&user)).await {
        Ok(id) => {
            info!(session_id = %session_id, file = %file_name, media_id = %id, "image uploaded");
            let mut response = CommandResponse::ok("image uploaded");
            response.url = Some(id);
            response.with_status(StatusCode::OK)
        }
        Err(e) => {
            warn!(session_id = %session_id, file = %file_name, error = %e, "image upload failed");
            CommandResponse::failed(CODE_MEDIA_FAILED, format!("upload to media API failed: {e}"))
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let health = state.bridge.health();
    Json(HealthResponse {
        status: if health.broker_connected { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        broker_connected: health.broker_connected,
        sessions: health.sessions.len(),
    })
}

/// GET /sessions
pub async fn get_sessions(State(state): State<GatewayState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.bridge.active_sessions(),
    })
}
