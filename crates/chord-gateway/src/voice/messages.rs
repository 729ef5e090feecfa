//! Voice frame format
//!
//! Voice frames are `{op, d}` objects with no sequence or event name.

use super::opcodes::VoiceOpCode;
use super::payloads::{
    SelectProtocolPayload, SessionDescriptionPayload, SpeakingPayload, VoiceHelloPayload,
    VoiceIdentifyPayload, VoiceReadyPayload, VoiceResumePayload,
};
use crate::protocol::FrameError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Voice message format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub op: VoiceOpCode,
    #[serde(default)]
    pub d: Value,
}

impl VoiceMessage {
    fn encode<T: Serialize>(op: VoiceOpCode, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op,
            d: serde_json::to_value(payload)?,
        })
    }

    // === Client Messages ===

    pub fn identify(payload: &VoiceIdentifyPayload) -> Result<Self, serde_json::Error> {
        Self::encode(VoiceOpCode::Identify, payload)
    }

    pub fn select_protocol(payload: &SelectProtocolPayload) -> Result<Self, serde_json::Error> {
        Self::encode(VoiceOpCode::SelectProtocol, payload)
    }

    /// Heartbeat (op=3); the server echoes the nonce in its ACK
    #[must_use]
    pub fn heartbeat(nonce: u64) -> Self {
        Self {
            op: VoiceOpCode::Heartbeat,
            d: Value::from(nonce),
        }
    }

    pub fn speaking(payload: &SpeakingPayload) -> Result<Self, serde_json::Error> {
        Self::encode(VoiceOpCode::Speaking, payload)
    }

    pub fn resume(payload: &VoiceResumePayload) -> Result<Self, serde_json::Error> {
        Self::encode(VoiceOpCode::Resume, payload)
    }

    // === Server Messages ===

    #[must_use]
    pub fn hello(heartbeat_interval: f64) -> Self {
        Self {
            op: VoiceOpCode::Hello,
            d: serde_json::json!({ "heartbeat_interval": heartbeat_interval }),
        }
    }

    pub fn ready(payload: &VoiceReadyPayload) -> Result<Self, serde_json::Error> {
        Self::encode(VoiceOpCode::Ready, payload)
    }

    pub fn session_description(payload: &SessionDescriptionPayload) -> Result<Self, serde_json::Error> {
        Self::encode(VoiceOpCode::SessionDescription, payload)
    }

    #[must_use]
    pub fn heartbeat_ack(nonce: u64) -> Self {
        Self {
            op: VoiceOpCode::HeartbeatAck,
            d: Value::from(nonce),
        }
    }

    #[must_use]
    pub fn invalidate_session() -> Self {
        Self {
            op: VoiceOpCode::InvalidateSession,
            d: Value::Null,
        }
    }

    // === Parsing ===

    /// Decode `d` as `T` if the op code matches
    pub fn payload<T: DeserializeOwned>(&self, op: VoiceOpCode) -> Option<T> {
        if self.op != op {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    pub fn as_hello(&self) -> Option<VoiceHelloPayload> {
        self.payload(VoiceOpCode::Hello)
    }

    pub fn as_ready(&self) -> Option<VoiceReadyPayload> {
        self.payload(VoiceOpCode::Ready)
    }

    pub fn as_session_description(&self) -> Option<SessionDescriptionPayload> {
        self.payload(VoiceOpCode::SessionDescription)
    }

    /// Nonce echoed by a heartbeat ACK
    pub fn as_heartbeat_ack(&self) -> Option<u64> {
        self.payload(VoiceOpCode::HeartbeatAck)
    }

    // === Utilities ===

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON, reporting unknown op codes separately
    pub fn from_json(json: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(json)?;
        if let Some(op) = value.get("op").and_then(Value::as_u64) {
            let known = u8::try_from(op).ok().and_then(VoiceOpCode::from_u8).is_some();
            if !known {
                return Err(FrameError::UnknownOpCode(op));
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}
