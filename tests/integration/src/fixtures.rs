//! Test fixtures and frame builders
//!
//! Frames are built as raw JSON so the tests check the wire format, not the
//! client's own serializers.

use chord_common::{GatewayConfig, RetryConfig};
use serde_json::{json, Value};
use std::time::Duration;

pub const TEST_TOKEN: &str = "test-token";

/// Client configuration pointing at a mock server, with fast backoff
pub fn test_config(url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::new(TEST_TOKEN);
    config.url = url.to_string();
    config.hello_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_reconnect_attempts: 5,
        max_resume_attempts: 3,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
    };
    config
}

// === Gateway frames ===

pub fn hello(heartbeat_interval: u64) -> Value {
    json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval, "_trace": ["mock-gw"]}})
}

pub fn dispatch(name: &str, seq: u64, data: Value) -> Value {
    json!({"op": 0, "t": name, "s": seq, "d": data})
}

pub fn ready(session_id: &str, seq: u64) -> Value {
    dispatch(
        "READY",
        seq,
        json!({
            "v": 6,
            "session_id": session_id,
            "user": {"id": "7", "username": "tester", "discriminator": "0001", "bot": true},
            "guilds": [{"id": "41", "unavailable": true}]
        }),
    )
}

pub fn resumed(seq: u64) -> Value {
    dispatch("RESUMED", seq, json!({"_trace": ["mock-gw"]}))
}

pub fn heartbeat_ack() -> Value {
    json!({"op": 11, "d": null})
}

pub fn heartbeat_request() -> Value {
    json!({"op": 1, "d": null})
}

pub fn reconnect() -> Value {
    json!({"op": 7, "d": null})
}

pub fn invalid_session(resumable: bool) -> Value {
    json!({"op": 9, "d": resumable})
}

pub fn voice_state_update(guild_id: &str, channel_id: &str, user_id: &str, session_id: &str) -> Value {
    json!({
        "guild_id": guild_id,
        "channel_id": channel_id,
        "user_id": user_id,
        "session_id": session_id,
        "self_mute": false,
        "self_deaf": false
    })
}

pub fn voice_server_update(guild_id: &str, token: &str, endpoint: Option<&str>) -> Value {
    json!({"guild_id": guild_id, "token": token, "endpoint": endpoint})
}

// === Voice frames ===

pub fn voice_hello(heartbeat_interval: f64) -> Value {
    json!({"op": 8, "d": {"heartbeat_interval": heartbeat_interval}})
}

pub fn voice_ready(ssrc: u32, port: u16, modes: &[&str]) -> Value {
    json!({"op": 2, "d": {"ssrc": ssrc, "ip": "127.0.0.1", "port": port, "modes": modes}})
}

pub fn session_description(mode: &str, secret_key: &[u8]) -> Value {
    json!({"op": 4, "d": {"mode": mode, "secret_key": secret_key}})
}

pub fn voice_heartbeat_ack(nonce: u64) -> Value {
    json!({"op": 6, "d": nonce})
}
