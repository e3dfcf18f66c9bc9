// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway routes driven through the router with an in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chatbridge_core::types::{MessageKind, SessionId};
use chatbridge_gateway::{GatewayState, MediaClient, router};
use chatbridge_test_utils::TestHarness;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{header as header_match, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOUNDARY: &str = "chatbridge-test-boundary";

fn app(harness: &TestHarness, media: Option<MediaClient>) -> Router {
    router(
        GatewayState::new(Arc::clone(harness.bridge()), media),
        1024 * 1024,
    )
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Multipart body with optional file and text fields.
fn multipart(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload_image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn media_client(server: &MockServer) -> MediaClient {
    MediaClient::new(
        format!("{}/v1/files/upload", server.uri()),
        "test-key",
        "chatbridge",
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn send_then_get_message_round_trip() {
    let harness = TestHarness::new();

    let (status, body) = call(
        app(&harness, None),
        post_json(
            "/send_message",
            json!({"content": "hi", "from_user_id": "u1", "to_user_id": "bot"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["session_id"], "u1");

    let outbound = harness.outbound();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].routing_key, "chat_session.u1");

    harness.agent_reply("u1", MessageKind::Text, "hello back");
    let (status, body) = call(
        app(&harness, None),
        get("/get_message?session_id=u1&timeout_ms=2000"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "hello back");
    assert_eq!(body["msg_type"], "text");
    harness.shutdown().await;
}

#[tokio::test]
async fn image_reply_carries_url_reference() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "draw").await.unwrap();
    harness
        .broker()
        .agent_publish(
            "chat_responses",
            "chat_result.u1.image",
            json!({
                "session_id": "u1",
                "content": "",
                "msg_type": "image",
                "url": "file-42"
            })
            .to_string()
            .into_bytes(),
        );

    let (_, body) = call(
        app(&harness, None),
        get("/get_message?session_id=u1&timeout_ms=2000"),
    )
    .await;
    assert_eq!(body["msg_type"], "image");
    assert_eq!(body["url"], "file-42");
    harness.shutdown().await;
}

#[tokio::test]
async fn get_message_without_session_is_empty() {
    let harness = TestHarness::new();
    let (status, body) = call(app(&harness, None), get("/get_message")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"content": ""}));
}

#[tokio::test]
async fn get_message_for_unknown_session_is_empty() {
    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, None),
        get("/get_message?session_id=nobody&timeout_ms=5000"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "");
}

#[tokio::test]
async fn send_message_with_unknown_type_is_bad_request() {
    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, None),
        post_json(
            "/send_message",
            json!({"content": "x", "from_user_id": "u1", "msg_type": "hologram"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1);
    assert!(harness.outbound().is_empty());
}

#[tokio::test]
async fn send_message_without_any_session_source_is_bad_request() {
    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, None),
        post_json("/send_message", json!({"content": "orphan"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn group_message_uses_group_id_as_session() {
    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, None),
        post_json(
            "/send_message",
            json!({
                "content": "hello room",
                "from_user_id": "alice",
                "is_group": true,
                "group_id": "room1"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "room1");

    let envelope = harness.outbound()[0].envelope().unwrap();
    assert_eq!(envelope.to_user_id, "room1");
    assert_eq!(envelope.actual_user_id.as_deref(), Some("alice"));
    harness.shutdown().await;
}

#[tokio::test]
async fn send_message_when_broker_down_is_server_error() {
    let harness = TestHarness::new();
    harness.broker().set_reachable(false);
    let (status, body) = call(
        app(&harness, None),
        post_json(
            "/send_message",
            json!({"content": "hi", "from_user_id": "u1", "to_user_id": "bot"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn send_message_over_session_cap_is_unavailable() {
    let harness = TestHarness::builder().with_max_sessions(1).build();
    harness.submit_text("u1", "bot", "first").await.unwrap();

    let (status, body) = call(
        app(&harness, None),
        post_json(
            "/send_message",
            json!({"content": "hi", "from_user_id": "u2", "to_user_id": "bot"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn cleanup_requires_session_id() {
    let harness = TestHarness::new();
    let (status, body) = call(app(&harness, None), post_json("/cleanup_session", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn cleanup_tears_down_and_is_repeatable() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "hi").await.unwrap();
    let u1 = SessionId::parse("u1").unwrap();
    assert!(harness.bridge().registry().contains(&u1));

    for _ in 0..2 {
        let (status, body) = call(
            app(&harness, None),
            post_json("/cleanup_session", json!({"session_id": "u1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
    }
    assert!(!harness.bridge().registry().contains(&u1));
    assert!(harness.broker().queues_matching("u1").is_empty());
}

#[tokio::test]
async fn health_and_sessions_report_bridge_state() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "hi").await.unwrap();

    let (status, body) = call(app(&harness, None), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["broker_connected"], true);
    assert_eq!(body["sessions"], 1);

    let (status, body) = call(app(&harness, None), get("/sessions")).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], "u1");
    assert_eq!(sessions[0]["consumer_state"], "listening");
    harness.shutdown().await;
}

#[tokio::test]
async fn upload_without_media_config_is_unavailable() {
    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, None),
        multipart(Some(("cat.png", b"png")), &[]),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], 3);
}

#[tokio::test]
async fn upload_forwards_file_and_returns_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/files/upload"))
        .and(header_match("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "file-7"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, Some(media_client(&server))),
        multipart(
            Some(("cat.png", b"\x89PNG")),
            &[("session_id", "u1"), ("user", "u1")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["url"], "file-7");
}

#[tokio::test]
async fn upload_without_file_part_is_bad_request() {
    let server = MockServer::start().await;
    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, Some(media_client(&server))),
        multipart(None, &[("session_id", "u1")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn upload_with_empty_filename_is_bad_request() {
    let server = MockServer::start().await;
    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, Some(media_client(&server))),
        multipart(Some(("", b"data")), &[]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn upload_rejected_by_media_api_is_code_two() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/files/upload"))
        .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
        .mount(&server)
        .await;

    let harness = TestHarness::new();
    let (status, body) = call(
        app(&harness, Some(media_client(&server))),
        multipart(Some(("cat.png", b"png")), &[]),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], 2);
}
