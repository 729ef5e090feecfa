//! Gateway Integration Tests
//!
//! Each test drives a real client against a scripted mock gateway on
//! localhost.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use chord_gateway::{ConnectionState, Gateway, GatewayError, GatewayEvent};
use integration_tests::*;
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Handshake and Resume
// ============================================================================

#[tokio::test]
async fn test_identify_then_resume_after_transient_close() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let mut events = gateway.subscribe();
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();

    let identify = conn.recv_op(2).await.unwrap();
    assert_eq!(identify["d"]["token"], TEST_TOKEN);
    assert_eq!(identify["d"]["compress"], false);
    assert_eq!(identify["d"]["large_threshold"], 250);
    assert!(identify["d"]["properties"]["$os"].is_string());

    conn.send(ready("abc", 1)).await.unwrap();
    let event = next_event(&mut events, |e| matches!(e, GatewayEvent::Ready { .. })).await.unwrap();
    assert!(matches!(event, GatewayEvent::Ready { session_id, .. } if session_id == "abc"));
    assert_eq!(gateway.state(), ConnectionState::Active);

    conn.send(dispatch("MESSAGE_CREATE", 2, json!({"id": "1", "content": "hi"}))).await.unwrap();
    next_event(&mut events, |e| e.name() == Some("MESSAGE_CREATE")).await.unwrap();
    assert_eq!(gateway.session().sequence, Some(2));

    conn.close(4000).await.unwrap();
    next_event(&mut events, |e| matches!(e, GatewayEvent::Disconnected { code: Some(4000), terminal: false }))
        .await
        .unwrap();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    let resume = conn.recv_op(6).await.unwrap();
    assert_eq!(resume["d"], json!({"token": TEST_TOKEN, "session_id": "abc", "seq": 2}));

    conn.send(resumed(3)).await.unwrap();
    next_event(&mut events, |e| matches!(e, GatewayEvent::Resumed { .. })).await.unwrap();
    assert_eq!(gateway.session().sequence, Some(3));

    gateway.shutdown();
    assert_eq!(conn.recv_close().await.unwrap(), Some(1000));
    handle.await.unwrap().unwrap();
    assert_eq!(gateway.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_non_resumable_invalid_session_reidentifies() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 1)).await.unwrap();
    conn.send(invalid_session(false)).await.unwrap();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    // A Resume here would never be followed by an Identify
    conn.recv_op(2).await.unwrap();
    assert_eq!(gateway.session().session_id, None);

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reconnect_request_resumes() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 5)).await.unwrap();
    conn.send(reconnect()).await.unwrap();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    let resume = conn.recv_op(6).await.unwrap();
    assert_eq!(resume["d"]["seq"], 5);

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_repeated_resume_failures_fall_back_to_identify() {
    let mut server = MockServer::start().await.unwrap();
    let config = test_config(&server.url());
    let max_resumes = config.retry.max_resume_attempts;
    let gateway = Gateway::new(config);
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 1)).await.unwrap();
    conn.close(4000).await.unwrap();

    // Each Resume is cut off before RESUMED arrives
    for _ in 0..max_resumes {
        let mut conn = server.accept().await.unwrap();
        conn.send(hello(41_250)).await.unwrap();
        let resume = conn.recv_op(6).await.unwrap();
        assert_eq!(resume["d"]["session_id"], "abc");
        conn.close(4000).await.unwrap();
    }

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    // The first handshake frame must be an Identify, not another Resume
    let handshake = loop {
        let frame = conn.recv().await.unwrap();
        if frame["op"] != 1 {
            break frame;
        }
    };
    assert_eq!(handshake["op"], 2);
    assert_eq!(gateway.session().session_id, None);
    assert_eq!(gateway.session().sequence, None);

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}

// ============================================================================
// Failure Handling
// ============================================================================

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let mut events = gateway.subscribe();
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.close(4004).await.unwrap();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(GatewayError::AuthenticationFailed)));
    next_event(&mut events, |e| matches!(e, GatewayEvent::Disconnected { code: Some(4004), terminal: true }))
        .await
        .unwrap();
    server.expect_no_connection(Duration::from_millis(200)).await.unwrap();
}

#[tokio::test]
async fn test_retries_exhausted_emits_terminal_event() {
    let port = unused_port().unwrap();
    let mut config = test_config(&format!("ws://127.0.0.1:{port}"));
    config.retry.max_reconnect_attempts = 2;
    let gateway = Gateway::new(config);
    let mut events = gateway.subscribe();

    let result = tokio::time::timeout(STEP_TIMEOUT, gateway.run()).await.unwrap();
    assert!(matches!(result, Err(GatewayError::RetriesExhausted(2))));

    let mut reconnects = 0;
    let mut terminal = false;
    while let Ok(event) = events.try_recv() {
        match event {
            GatewayEvent::Reconnecting { resume, .. } => {
                assert!(!resume);
                reconnects += 1;
            }
            event if event.is_terminal() => terminal = true,
            _ => {}
        }
    }
    assert_eq!(reconnects, 2);
    assert!(terminal);
}

#[tokio::test]
async fn test_malformed_frame_surfaces_protocol_error() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let mut events = gateway.subscribe();
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 1)).await.unwrap();
    conn.send_text("{not json").await.unwrap();

    next_event(&mut events, |e| matches!(e, GatewayEvent::ProtocolError { .. })).await.unwrap();

    // Protocol violations start over with a fresh session
    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_opcode_is_ignored() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let mut events = gateway.subscribe();
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(json!({"op": 42, "d": {}})).await.unwrap();
    conn.send(ready("abc", 1)).await.unwrap();

    next_event(&mut events, |e| matches!(e, GatewayEvent::Ready { .. })).await.unwrap();
    assert!(gateway.is_connected());

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test]
async fn test_heartbeat_carries_last_sequence() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 7)).await.unwrap();

    // A heartbeat request is answered right away
    conn.send(heartbeat_request()).await.unwrap();
    let beat = conn.recv_op(1).await.unwrap();
    assert_eq!(beat["d"], 7);

    conn.send(heartbeat_ack()).await.unwrap();
    tokio::time::timeout(STEP_TIMEOUT, async {
        while gateway.latency().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_missed_ack_closes_zombie_connection() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let mut events = gateway.subscribe();
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(100)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 1)).await.unwrap();

    // Never acknowledge: the next due beat tears the socket down
    assert_eq!(conn.recv_close().await.unwrap(), Some(4000));
    next_event(&mut events, |e| matches!(e, GatewayEvent::Reconnecting { resume: true, .. }))
        .await
        .unwrap();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(6).await.unwrap();

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}

// ============================================================================
// Waiters and Commands
// ============================================================================

#[tokio::test]
async fn test_wait_for_over_live_connection() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 1)).await.unwrap();

    let ping = gateway
        .wait_for("MESSAGE_CREATE", |d| d["content"] == "ping", |d| d["id"].clone())
        .timeout(STEP_TIMEOUT);
    let never = gateway
        .wait_for_raw("MESSAGE_CREATE", |d| d["content"] == "never")
        .timeout(Duration::from_millis(300));

    conn.send(dispatch("MESSAGE_CREATE", 2, json!({"id": "10", "content": "hello"}))).await.unwrap();
    conn.send(dispatch("MESSAGE_CREATE", 3, json!({"id": "11", "content": "ping"}))).await.unwrap();

    assert_eq!(ping.await.unwrap(), json!("11"));
    assert_eq!(never.await, Err(chord_gateway::WaitError::TimedOut));

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_commands_reach_the_gateway() {
    let mut server = MockServer::start().await.unwrap();
    let gateway = Gateway::new(test_config(&server.url()));
    let mut events = gateway.subscribe();
    let handle = gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 1)).await.unwrap();
    next_event(&mut events, |e| matches!(e, GatewayEvent::Ready { .. })).await.unwrap();

    let guild = chord_core::Snowflake::new(41);
    gateway.request_members(vec![guild], "", 0).await.unwrap();
    let frame = conn.recv_op(8).await.unwrap();
    assert_eq!(frame["d"], json!({"guild_id": ["41"], "query": "", "limit": 0}));

    gateway.request_guild_sync(&[guild]).await.unwrap();
    let frame = conn.recv_op(12).await.unwrap();
    assert_eq!(frame["d"], json!(["41"]));

    gateway.change_presence(chord_core::Presence::default()).await.unwrap();
    let frame = conn.recv_op(3).await.unwrap();
    assert_eq!(frame["d"]["status"], "online");

    gateway.shutdown();
    handle.await.unwrap().unwrap();
}
