mod common;

use bytes::Bytes;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use common::{frames, gateway_with, Script, ScriptedProvider};
use ventra::adapters::rate_limit::{RateLimitConfig, RateLimiter};
use ventra::agents::config::SessionConfig;
use ventra::agents::domain::{AgentRequest, Role};
use ventra::agents::error::{codes, ErrorKind, ProviderError, RawError};
use ventra::agents::llm::ProviderReply;
use ventra::agents::memory::InMemoryStore;
use ventra::agents::AgentGateway;

async fn turn_count(gateway: &AgentGateway, session_id: &str, identity: &str) -> usize {
    match gateway.store().get(session_id, identity).await.unwrap() {
        Some(session) => session.lock().await.turn_count(),
        None => 0,
    }
}

#[tokio::test]
async fn test_mid_stream_failure_records_nothing() {
    let mut failing = frames(&[r#"data: {"chunk":"Your runway"}"#]);
    failing.push(Err(ProviderError::Transport("connection reset".to_string())));

    let provider = ScriptedProvider::new(vec![
        Script::Reply(ProviderReply::text("Hi there")),
        Script::Stream(failing),
    ]);
    let gateway = gateway_with(provider, 10);

    gateway
        .send(AgentRequest::new("founder-1", "hello").with_session("s1"))
        .await
        .unwrap();
    assert_eq!(turn_count(&gateway, "s1", "founder-1").await, 2);

    let err = gateway
        .send(AgentRequest::new("founder-1", "how long is my runway?").with_session("s1").streaming())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(err.status(), 502);
    assert_eq!(turn_count(&gateway, "s1", "founder-1").await, 2);
}

#[tokio::test]
async fn test_error_frame_is_classified() {
    let provider = ScriptedProvider::new(vec![Script::Stream(frames(&[
        r#"data: {"chunk":"Let me"}"#,
        r#"data: {"error":{"type":"rate_limit_error","message":"slow down"}}"#,
        "data: [DONE]",
    ]))]);
    let gateway = gateway_with(provider, 10);

    let err = gateway
        .send(AgentRequest::new("founder-1", "hello").with_session("s1").streaming())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert_eq!(err.status(), 429);
    assert_eq!(err.message(), "slow down");
    assert_eq!(turn_count(&gateway, "s1", "founder-1").await, 0);
}

#[tokio::test]
async fn test_rejected_stream_status_is_classified() {
    let provider = ScriptedProvider::new(vec![Script::StreamStatus(
        503,
        r#"{"message":"Agent pool exhausted"}"#,
    )]);
    let gateway = gateway_with(provider, 10);

    let err = gateway
        .send(AgentRequest::new("founder-1", "hello").streaming())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(err.status(), 502);
    assert_eq!(err.message(), "Agent pool exhausted");
}

#[tokio::test]
async fn test_provider_error_types_map_to_kinds() {
    let provider = ScriptedProvider::new(vec![
        Script::Fail(ProviderError::InvalidRequest { message: "message too long".to_string() }.into()),
        Script::Fail(ProviderError::Authentication { message: "bad key".to_string() }.into()),
        Script::Fail(RawError::Unrecognized(json!("boom"))),
    ]);
    let gateway = gateway_with(provider, 10);

    let err = gateway.send(AgentRequest::new("founder-1", "a")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = gateway.send(AgentRequest::new("founder-1", "b")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let err = gateway.send(AgentRequest::new("founder-1", "c")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert_eq!(err.status(), 500);
}

#[tokio::test]
async fn test_denied_request_makes_no_provider_call() {
    let provider = ScriptedProvider::replying("ok", 2);
    let gateway = gateway_with(provider.clone(), 2);

    for _ in 0..2 {
        gateway.send(AgentRequest::new("founder-1", "hello")).await.unwrap();
    }

    let err = gateway.send(AgentRequest::new("founder-1", "hello")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert_eq!(err.code(), codes::RATE_LIMIT);
    let retry_after = err.retry_after_secs().unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
    assert_eq!(provider.calls(), 2);

    // Other identities have their own window
    let provider_for_other = ScriptedProvider::replying("ok", 1);
    let gateway = gateway_with(provider_for_other.clone(), 2);
    gateway.send(AgentRequest::new("investor-9", "hello")).await.unwrap();
    assert_eq!(provider_for_other.calls(), 1);
}

#[tokio::test]
async fn test_history_is_truncated_to_last_ten_turns() {
    let provider = ScriptedProvider::replying("noted", 8);
    let gateway = gateway_with(provider.clone(), 100);

    for i in 1..=8 {
        let request = AgentRequest::new("founder-1", format!("message {}", i)).with_session("s1");
        gateway.send(request).await.unwrap();
    }

    let payloads = provider.payloads();
    let last = payloads.last().unwrap();
    assert_eq!(last.history.len(), 10);
    assert_eq!(last.history[0].content, "message 3");
    assert_eq!(last.history[0].role, Role::User);
    assert_eq!(last.history[9].role, Role::Assistant);
    assert_eq!(payloads[0].history.len(), 0);
    assert_eq!(turn_count(&gateway, "s1", "founder-1").await, 16);
}

#[tokio::test]
async fn test_observed_chunks_match_recorded_turn() {
    let provider = ScriptedProvider::new(vec![Script::Stream(vec![
        Ok(Bytes::from_static(b"data: {\"chunk\":\"Seed \"}\ndata: {\"chu")),
        Ok(Bytes::from_static(b"nk\":\"rounds \"}\n\ndata: not json\n")),
        Ok(Bytes::from_static(b"data: {\"chunk\":\"vary.\",\"metadata\":{\"agentType\":\"funding\"}}\n")),
        Ok(Bytes::from_static(b"data: [DONE]\n")),
    ])]);
    let gateway = gateway_with(provider, 10);

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let response = gateway
        .send_with_observer(
            AgentRequest::new("founder-1", "what is a seed round?").with_session("s1").streaming(),
            move |chunk| sink.lock().unwrap().push(chunk.to_string()),
        )
        .await
        .unwrap();

    let observed = observed.lock().unwrap().concat();
    assert_eq!(observed, "Seed rounds vary.");
    assert_eq!(response.content, observed);
    assert_eq!(response.agent_type, "funding");

    let session = gateway.store().get("s1", "founder-1").await.unwrap().unwrap();
    let session = session.lock().await;
    let turns = session.history(None);
    assert_eq!(turns[1].content, observed);
}

#[tokio::test]
async fn test_cancelled_stream_releases_transport() {
    let provider = ScriptedProvider::new(vec![Script::StreamThenHang(vec![Bytes::from_static(
        b"data: {\"chunk\":\"partial\"}\n",
    )])]);
    let gateway = gateway_with(provider.clone(), 10);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut exchange = Box::pin(gateway.send_with_observer(
        AgentRequest::new("founder-1", "hello").with_session("s1").streaming(),
        move |chunk| {
            let _ = tx.send(chunk.to_string());
        },
    ));

    tokio::select! {
        _ = exchange.as_mut() => panic!("exchange should still be streaming"),
        chunk = rx.recv() => assert_eq!(chunk.as_deref(), Some("partial")),
    }
    assert!(!provider.stream_dropped.load(Ordering::SeqCst));

    drop(exchange);

    assert!(provider.stream_dropped.load(Ordering::SeqCst));
    assert_eq!(turn_count(&gateway, "s1", "founder-1").await, 0);
}

#[tokio::test]
async fn test_deadline_is_a_provider_timeout() {
    let provider = ScriptedProvider::new(vec![Script::Hang]);
    let gateway = gateway_with(provider, 10);

    let err = gateway
        .send(AgentRequest::new("founder-1", "hello").with_session("s1").with_timeout_ms(50))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(err.status(), 504);
    assert_eq!(err.code(), codes::PROVIDER_TIMEOUT);
    assert_eq!(turn_count(&gateway, "s1", "founder-1").await, 0);
}

#[tokio::test]
async fn test_session_owned_by_another_identity() {
    let provider = ScriptedProvider::replying("ok", 1);
    let gateway = gateway_with(provider.clone(), 10);

    gateway
        .send(AgentRequest::new("founder-1", "hello").with_session("s1"))
        .await
        .unwrap();

    let err = gateway
        .send(AgentRequest::new("investor-9", "let me in").with_session("s1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(err.status(), 403);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_foreign_session_does_not_spend_quota() {
    let provider = ScriptedProvider::replying("ok", 2);
    let gateway = gateway_with(provider.clone(), 1);

    gateway
        .send(AgentRequest::new("founder-1", "hello").with_session("s1"))
        .await
        .unwrap();

    let err = gateway
        .send(AgentRequest::new("investor-9", "let me in").with_session("s1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    // The single slot is still there for the investor's own session
    gateway
        .send(AgentRequest::new("investor-9", "hello").with_session("s2"))
        .await
        .unwrap();
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_context_reaches_the_provider() {
    let provider = ScriptedProvider::replying("ok", 1);
    let gateway = gateway_with(provider.clone(), 10);

    gateway
        .send(
            AgentRequest::new("founder-1", "what should we raise?")
                .with_context("stage", json!("seed"))
                .with_context("metrics", json!({ "mrr": 42000 })),
        )
        .await
        .unwrap();

    let context = &provider.payloads()[0].context;
    assert_eq!(context["stage"], "seed");
    assert_eq!(context["metrics"]["mrr"], 42000);
}

#[tokio::test]
async fn test_session_count_stays_bounded() {
    let provider = ScriptedProvider::replying("ok", 50);
    let limiter = Arc::new(RateLimiter::with_sweep_probability(
        RateLimitConfig {
            max_requests: 100,
            window_ms: 60_000,
        },
        0.0,
    ));
    let store = Arc::new(InMemoryStore::new(100).with_max_sessions(10));
    let gateway = AgentGateway::new(limiter, provider, store, SessionConfig::default());

    for _ in 0..50 {
        gateway.send(AgentRequest::new("founder-1", "hi")).await.unwrap();
    }

    assert_eq!(gateway.store().len().await, 10);
}

#[tokio::test]
async fn test_concurrent_sessions_proceed_independently() {
    let provider = ScriptedProvider::replying("ok", 6);
    let gateway = Arc::new(gateway_with(provider, 100));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                let request = AgentRequest::new("founder-1", "hello").with_session(format!("s{}", i % 3));
                gateway.send(request).await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for i in 0..3 {
        assert_eq!(turn_count(&gateway, &format!("s{}", i), "founder-1").await, 4);
    }
}
