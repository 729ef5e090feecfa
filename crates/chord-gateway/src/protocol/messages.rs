//! Gateway frame format
//!
//! Every text message in either direction is a `{op, d, s, t}` object.

use super::{
    HelloPayload, IdentifyPayload, OpCode, RequestMembersPayload, ResumePayload,
    VoiceStateUpdatePayload,
};
use chord_core::{Presence, Snowflake};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event data payload; always serialized, `null` when empty
    #[serde(default)]
    pub d: Value,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// Failure to turn a text frame into a `GatewayMessage`
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown op code: {0}")]
    UnknownOpCode(u64),
}

impl GatewayMessage {
    fn control(op: OpCode, d: Value) -> Self {
        Self { op, d, s: None, t: None }
    }

    fn encode<T: Serialize + ?Sized>(op: OpCode, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::control(op, serde_json::to_value(payload)?))
    }

    // === Client Messages ===

    /// Heartbeat (op=1) carrying the last seen sequence
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::control(OpCode::Heartbeat, last_sequence.map_or(Value::Null, Value::from))
    }

    /// Identify (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Self::encode(OpCode::Identify, payload)
    }

    /// Presence update (op=3)
    pub fn presence(presence: &Presence) -> Result<Self, serde_json::Error> {
        Self::encode(OpCode::Presence, presence)
    }

    /// Voice state update (op=4)
    pub fn voice_state(payload: &VoiceStateUpdatePayload) -> Result<Self, serde_json::Error> {
        Self::encode(OpCode::VoiceState, payload)
    }

    /// Resume (op=6)
    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Self::encode(OpCode::Resume, payload)
    }

    /// Request guild members (op=8)
    pub fn request_members(payload: &RequestMembersPayload) -> Result<Self, serde_json::Error> {
        Self::encode(OpCode::RequestMembers, payload)
    }

    /// Guild sync (op=12); `d` is the bare list of guild ids
    pub fn guild_sync(guild_ids: &[Snowflake]) -> Result<Self, serde_json::Error> {
        Self::encode(OpCode::GuildSync, guild_ids)
    }

    // === Server Messages ===

    /// Dispatch (op=0)
    #[must_use]
    pub fn dispatch(event_name: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d: data,
            s: Some(sequence),
            t: Some(event_name.into()),
        }
    }

    /// Hello (op=10)
    pub fn hello(heartbeat_interval: u64) -> Result<Self, serde_json::Error> {
        Self::encode(OpCode::Hello, &HelloPayload::with_interval(heartbeat_interval))
    }

    /// Heartbeat ACK (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::control(OpCode::HeartbeatAck, Value::Null)
    }

    /// Reconnect (op=7)
    #[must_use]
    pub fn reconnect() -> Self {
        Self::control(OpCode::Reconnect, Value::Null)
    }

    /// Invalid session (op=9); `resumable` says whether a Resume may follow
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::control(OpCode::InvalidateSession, Value::Bool(resumable))
    }

    // === Parsing ===

    /// Try to parse as a Hello payload (op=10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    /// Try to parse as an Identify payload (op=2)
    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    /// Try to parse as a Resume payload (op=6)
    pub fn as_resume(&self) -> Option<ResumePayload> {
        if self.op != OpCode::Resume {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    /// Resumable flag of an Invalid Session frame (op=9)
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidateSession {
            return None;
        }
        Some(self.d.as_bool().unwrap_or(false))
    }

    /// Try to parse the heartbeat sequence number (op=1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_u64())
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    ///
    /// Well-formed frames with an op code this client does not know are
    /// reported separately so the caller can skip them.
    pub fn from_json(json: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(json)?;
        if let Some(op) = value.get("op").and_then(Value::as_u64) {
            let known = u8::try_from(op).ok().and_then(OpCode::from_u8).is_some();
            if !known {
                return Err(FrameError::UnknownOpCode(op));
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
