//! Voice payload definitions

use super::mode::EncryptionMode;
use chord_core::Snowflake;
use serde::{Deserialize, Serialize};

/// Payload for voice op 8 (Hello)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceHelloPayload {
    /// Milliseconds; the voice server sends a float
    pub heartbeat_interval: f64,
}

/// Payload for voice op 0 (Identify)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceIdentifyPayload {
    /// Guild id
    pub server_id: Snowflake,
    pub user_id: Snowflake,
    /// Gateway session id from VOICE_STATE_UPDATE
    pub session_id: String,
    /// Token from VOICE_SERVER_UPDATE
    pub token: String,
}

/// Payload for voice op 7 (Resume)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceResumePayload {
    pub server_id: Snowflake,
    pub session_id: String,
    pub token: String,
}

/// Payload for voice op 2 (Ready)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceReadyPayload {
    pub ssrc: u32,
    /// UDP address of the voice server
    pub ip: String,
    pub port: u16,
    /// Encryption modes the server supports
    #[serde(default)]
    pub modes: Vec<String>,
}

/// Payload for voice op 1 (Select Protocol)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocolPayload {
    /// Always `"udp"`
    pub protocol: String,
    pub data: SelectProtocolData,
}

/// Our external address as seen by the voice server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: EncryptionMode,
}

impl SelectProtocolPayload {
    #[must_use]
    pub fn udp(address: impl Into<String>, port: u16, mode: EncryptionMode) -> Self {
        Self {
            protocol: "udp".to_string(),
            data: SelectProtocolData {
                address: address.into(),
                port,
                mode,
            },
        }
    }
}

/// Payload for voice op 4 (Session Description)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptionPayload {
    pub mode: String,
    /// 32 bytes
    pub secret_key: Vec<u8>,
}

/// Payload for voice op 5 (Speaking)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingPayload {
    pub speaking: bool,
    #[serde(default)]
    pub delay: u32,
    pub ssrc: u32,
}
