//! Voice Integration Tests
//!
//! A mock gateway hands out a mock voice server; the voice server plays the
//! Hello / Ready / discovery / Session Description exchange.
//!
//! Run with: cargo test -p integration-tests --test voice_tests

use chord_core::Snowflake;
use chord_gateway::voice::{EncryptionMode, VoiceError};
use chord_gateway::{ConnectionState, Gateway, GatewayEvent};
use integration_tests::*;
use serde_json::json;

const GUILD: u64 = 41;
const CHANNEL: u64 = 42;

/// Connect a gateway and finish its handshake
async fn ready_gateway(server: &mut MockServer) -> (Gateway, MockConnection) {
    let gateway = Gateway::new(test_config(&server.url()));
    let mut events = gateway.subscribe();
    gateway.spawn();

    let mut conn = server.accept().await.unwrap();
    conn.send(hello(41_250)).await.unwrap();
    conn.recv_op(2).await.unwrap();
    conn.send(ready("abc", 1)).await.unwrap();
    next_event(&mut events, |e| matches!(e, GatewayEvent::Ready { .. })).await.unwrap();
    (gateway, conn)
}

/// Answer the voice state update with both voice dispatches
async fn hand_out_voice_server(conn: &mut MockConnection, endpoint: &str) {
    let request = conn.recv_op(4).await.unwrap();
    assert_eq!(
        request["d"],
        json!({"guild_id": "41", "channel_id": "42", "self_mute": false, "self_deaf": true})
    );

    // Someone else's state in the same guild must not satisfy the waiter
    conn.send(dispatch("VOICE_STATE_UPDATE", 2, voice_state_update("41", "42", "8", "other")))
        .await
        .unwrap();
    conn.send(dispatch("VOICE_STATE_UPDATE", 3, voice_state_update("41", "42", "7", "abc")))
        .await
        .unwrap();
    conn.send(dispatch("VOICE_SERVER_UPDATE", 4, voice_server_update("41", "vtok", Some(endpoint))))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_voice_session_reaches_ready() {
    let mut server = MockServer::start().await.unwrap();
    let mut voice_server = MockServer::start().await.unwrap();
    let udp = UdpResponder::start().await.unwrap();
    let (gateway, mut conn) = ready_gateway(&mut server).await;

    let connect = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .connect_voice(Snowflake::new(GUILD), Snowflake::new(CHANNEL), false, true)
                .await
        })
    };
    hand_out_voice_server(&mut conn, &voice_server.url()).await;

    let mut voice = voice_server.accept().await.unwrap();
    voice.send(voice_hello(13_750.25)).await.unwrap();

    let identify = voice.recv_op(0).await.unwrap();
    assert_eq!(
        identify["d"],
        json!({"server_id": "41", "user_id": "7", "session_id": "abc", "token": "vtok"})
    );

    voice
        .send(voice_ready(99, udp.port, &["xsalsa20_poly1305", "xsalsa20_poly1305_lite"]))
        .await
        .unwrap();
    let select = voice.recv_op(1).await.unwrap();
    assert_eq!(select["d"]["protocol"], "udp");
    assert_eq!(select["d"]["data"]["address"], "127.0.0.1");
    assert_eq!(select["d"]["data"]["mode"], "xsalsa20_poly1305_lite");

    voice
        .send(session_description("xsalsa20_poly1305_lite", &[9; 32]))
        .await
        .unwrap();

    let session = tokio::time::timeout(STEP_TIMEOUT, connect)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(session.is_ready());
    assert_eq!(session.state(), ConnectionState::Active);

    let descriptor = session.descriptor();
    assert_eq!(descriptor.ssrc, Some(99));
    assert_eq!(descriptor.selected_mode, Some(EncryptionMode::XSalsa20Poly1305Lite));
    assert_eq!(descriptor.secret_key, Some([9; 32]));

    let transmitter = session.transmitter().unwrap();
    assert_eq!(transmitter.ssrc(), 99);
    assert!(transmitter.is_current());

    session.set_speaking(true).await.unwrap();
    let speaking = voice.recv_op(5).await.unwrap();
    assert_eq!(speaking["d"], json!({"speaking": true, "delay": 0, "ssrc": 99}));
    assert!(session.is_speaking());

    let heartbeat_nonce = 1_700_000_000_000_u64;
    voice.send(voice_heartbeat_ack(heartbeat_nonce)).await.unwrap();

    session.disconnect().await.unwrap();
    assert_eq!(voice.recv_close().await.unwrap(), Some(1000));
    assert!(!session.is_ready());
    // The key is gone, so the transmitter handed out earlier is dead too
    assert!(!transmitter.is_current());

    gateway.shutdown();
}

#[tokio::test]
async fn test_voice_without_compatible_mode_fails() {
    let mut server = MockServer::start().await.unwrap();
    let mut voice_server = MockServer::start().await.unwrap();
    let udp = UdpResponder::start().await.unwrap();
    let (gateway, mut conn) = ready_gateway(&mut server).await;

    let connect = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .connect_voice(Snowflake::new(GUILD), Snowflake::new(CHANNEL), false, true)
                .await
        })
    };
    hand_out_voice_server(&mut conn, &voice_server.url()).await;

    let mut voice = voice_server.accept().await.unwrap();
    voice.send(voice_hello(13_750.0)).await.unwrap();
    voice.recv_op(0).await.unwrap();
    voice.send(voice_ready(99, udp.port, &["aead_aes256_gcm"])).await.unwrap();

    let result = tokio::time::timeout(STEP_TIMEOUT, connect).await.unwrap().unwrap();
    assert!(matches!(result, Err(VoiceError::NoCompatibleMode { offered }) if offered == ["aead_aes256_gcm"]));

    gateway.shutdown();
}

#[tokio::test]
async fn test_missing_endpoint_is_reported() {
    let mut server = MockServer::start().await.unwrap();
    let (gateway, mut conn) = ready_gateway(&mut server).await;

    let connect = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .connect_voice(Snowflake::new(GUILD), Snowflake::new(CHANNEL), false, false)
                .await
        })
    };

    conn.recv_op(4).await.unwrap();
    conn.send(dispatch("VOICE_STATE_UPDATE", 2, voice_state_update("41", "42", "7", "abc")))
        .await
        .unwrap();
    conn.send(dispatch("VOICE_SERVER_UPDATE", 3, voice_server_update("41", "vtok", None)))
        .await
        .unwrap();

    let result = tokio::time::timeout(STEP_TIMEOUT, connect).await.unwrap().unwrap();
    assert!(matches!(result, Err(VoiceError::EndpointUnavailable)));

    gateway.shutdown();
}

#[tokio::test]
async fn test_voice_resumes_after_server_crash() {
    let mut server = MockServer::start().await.unwrap();
    let mut voice_server = MockServer::start().await.unwrap();
    let udp = UdpResponder::start().await.unwrap();
    let (gateway, mut conn) = ready_gateway(&mut server).await;

    let connect = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .connect_voice(Snowflake::new(GUILD), Snowflake::new(CHANNEL), false, true)
                .await
        })
    };
    hand_out_voice_server(&mut conn, &voice_server.url()).await;

    let mut voice = voice_server.accept().await.unwrap();
    voice.send(voice_hello(13_750.0)).await.unwrap();
    voice.recv_op(0).await.unwrap();
    voice.send(voice_ready(5, udp.port, &["xsalsa20_poly1305"])).await.unwrap();
    voice.recv_op(1).await.unwrap();
    voice.send(session_description("xsalsa20_poly1305", &[1; 32])).await.unwrap();
    let session = tokio::time::timeout(STEP_TIMEOUT, connect).await.unwrap().unwrap().unwrap();

    // 4015: the voice server crashed, resume
    voice.close(4015).await.unwrap();

    let mut voice = voice_server.accept().await.unwrap();
    voice.send(voice_hello(13_750.0)).await.unwrap();
    let resume = voice.recv_op(7).await.unwrap();
    assert_eq!(resume["d"], json!({"server_id": "41", "session_id": "abc", "token": "vtok"}));
    assert!(session.is_ready());

    session.disconnect().await.unwrap();
    gateway.shutdown();
}
