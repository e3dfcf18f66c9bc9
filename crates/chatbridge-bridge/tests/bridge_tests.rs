// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end bridge behaviour against the in-memory broker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatbridge_bridge::ConsumerState;
use chatbridge_core::types::{Envelope, MessageKind};
use chatbridge_test_utils::TestHarness;

/// Scenario A: submit, agent replies on `chat_result.u1.text`, poll returns it.
#[tokio::test]
async fn submit_reply_poll_round_trip() {
    let harness = TestHarness::new();
    harness
        .bridge()
        .submit(Envelope {
            session_id: Some("u1".into()),
            from_user_id: "u1".into(),
            to_user_id: "bot".into(),
            content: "hi".into(),
            msg_type: MessageKind::Text,
            ..Envelope::default()
        })
        .await
        .unwrap();

    let outbound = harness.outbound();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].routing_key, "chat_session.u1");
    assert_eq!(outbound[0].envelope().unwrap().content, "hi");

    harness.agent_reply("u1", MessageKind::Text, "hello back");
    assert_eq!(harness.poll("u1").await.as_deref(), Some("hello back"));
    harness.shutdown().await;
}

/// Scenario B: polling a session that never existed returns at once.
#[tokio::test]
async fn poll_unknown_session_returns_empty_immediately() {
    let harness = TestHarness::new();
    let started = Instant::now();
    assert!(
        harness
            .bridge()
            .poll("unknown_session", Duration::from_millis(2000))
            .await
            .is_none()
    );
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(harness.broker().connect_attempts(), 0);
}

/// Scenario C: after cleanup, a late reply reaches no queue.
#[tokio::test]
async fn late_reply_after_cleanup_is_not_delivered() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "hi").await.unwrap();
    harness.bridge().cleanup("u1").await.unwrap();

    assert_eq!(harness.agent_reply("u1", MessageKind::Text, "too late"), 0);
    assert!(harness.broker().queues_matching("chatbridge.reply.u1.").is_empty());
    assert!(
        harness
            .bridge()
            .poll("u1", Duration::from_millis(100))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn sessions_are_isolated() {
    let harness = TestHarness::new();
    harness.submit_text("s1", "bot", "one").await.unwrap();
    harness.submit_text("s2", "bot", "two").await.unwrap();

    harness.agent_reply("s2", MessageKind::Text, "for s2");
    assert!(
        harness
            .bridge()
            .poll("s1", Duration::from_millis(200))
            .await
            .is_none()
    );
    assert_eq!(harness.poll("s2").await.as_deref(), Some("for s2"));
    harness.shutdown().await;
}

#[tokio::test]
async fn replies_arrive_in_broker_order() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "count").await.unwrap();
    for n in 1..=5 {
        harness.agent_reply("u1", MessageKind::Text, &n.to_string());
    }
    for n in 1..=5 {
        assert_eq!(harness.poll("u1").await, Some(n.to_string()));
    }
    harness.shutdown().await;
}

#[tokio::test]
async fn only_accepted_kinds_are_bound() {
    let harness = TestHarness::builder()
        .with_accepted_kinds([MessageKind::Text])
        .unwrap()
        .build();
    harness.submit_text("u1", "bot", "hi").await.unwrap();

    assert_eq!(harness.agent_reply("u1", MessageKind::Image, "img"), 0);
    assert_eq!(harness.agent_reply("u1", MessageKind::Text, "txt"), 1);
    assert_eq!(harness.poll("u1").await.as_deref(), Some("txt"));
    harness.shutdown().await;
}

#[tokio::test]
async fn cleanup_twice_leaks_nothing() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "hi").await.unwrap();
    let connections_with_session = harness.broker().open_connections();

    assert!(harness.bridge().cleanup("u1").await.is_some());
    assert!(harness.bridge().cleanup("u1").await.is_none());
    assert_eq!(
        harness.broker().open_connections(),
        connections_with_session - 1
    );
    assert_eq!(harness.broker().open_channels(), 1);
    assert!(harness.bridge().active_sessions().is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn poll_on_quiet_session_returns_empty_within_timeout() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "hi").await.unwrap();
    let started = Instant::now();
    assert!(
        harness
            .bridge()
            .poll("u1", Duration::from_millis(2000))
            .await
            .is_none()
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1900));
    assert!(elapsed < Duration::from_millis(3000));
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_submits_never_double_start() {
    let harness = Arc::new(TestHarness::new());
    let submits: Vec<_> = (0..20)
        .map(|n| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .submit_text("u1", "bot", &format!("msg {n}"))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for submit in futures::future::join_all(submits).await {
        assert_eq!(submit.unwrap().as_str(), "u1");
    }

    assert_eq!(harness.bridge().active_sessions().len(), 1);
    assert_eq!(
        harness.broker().queues_matching("chatbridge.reply.u1.").len(),
        1
    );
    assert_eq!(harness.outbound().len(), 20);
    harness.shutdown().await;
}

#[tokio::test]
async fn consumer_recovers_from_broker_restart() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "hi").await.unwrap();
    harness.broker().sever_connections();

    let recovered = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let listening = harness
                .bridge()
                .active_sessions()
                .first()
                .is_some_and(|s| s.consumer_state == ConsumerState::Listening);
            if listening && harness.broker().queues_matching("chatbridge.reply.u1.").len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(recovered.is_ok(), "consumer never re-subscribed");

    harness.agent_reply("u1", MessageKind::Text, "after restart");
    assert_eq!(harness.poll("u1").await.as_deref(), Some("after restart"));

    harness.submit_text("u1", "bot", "again").await.unwrap();
    assert_eq!(harness.outbound().len(), 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn poison_reply_does_not_block_the_session() {
    let harness = TestHarness::new();
    harness.submit_text("u1", "bot", "hi").await.unwrap();

    harness
        .broker()
        .agent_publish("chat_responses", "chat_result.u1.text", b"{oops".to_vec());
    harness.agent_reply("u1", MessageKind::Text, "fine");

    assert_eq!(harness.poll("u1").await.as_deref(), Some("fine"));
    let rejected = harness.broker().rejected();
    assert_eq!(rejected.len(), 1);
    assert!(!rejected[0].requeue);
    harness.shutdown().await;
}

#[tokio::test]
async fn durable_queues_keep_replies_across_cleanup() {
    let harness = TestHarness::builder()
        .with_durable_queues("replies")
        .build();
    harness.submit_text("u1", "bot", "hi").await.unwrap();
    harness.bridge().cleanup("u1").await.unwrap();

    assert_eq!(harness.agent_reply("u1", MessageKind::Text, "kept"), 1);
    assert_eq!(harness.broker().pending("replies.u1"), 1);

    harness.submit_text("u1", "bot", "back").await.unwrap();
    assert_eq!(harness.poll("u1").await.as_deref(), Some("kept"));
    harness.shutdown().await;
}

#[tokio::test]
async fn idle_sessions_are_reaped() {
    let harness = TestHarness::builder()
        .with_idle_timeout(Duration::from_millis(20))
        .build();
    harness.submit_text("u1", "bot", "hi").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reaped = harness.bridge().reap_idle().await;
    assert_eq!(reaped.len(), 1);
    assert!(harness.bridge().active_sessions().is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn session_cap_rejects_new_sessions() {
    let harness = TestHarness::builder().with_max_sessions(1).build();
    harness.submit_text("u1", "bot", "hi").await.unwrap();
    let err = harness.submit_text("u2", "bot", "hi").await.unwrap_err();
    assert!(err.is_client_error());
    assert_eq!(harness.outbound().len(), 1);
    harness.shutdown().await;
}
