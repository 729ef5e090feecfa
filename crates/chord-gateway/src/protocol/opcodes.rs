//! Gateway operation codes

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Gateway operation codes
///
/// Op codes define the type of message being sent or received over the WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Server dispatches an event to the client (receive only)
    Dispatch = 0,
    /// Heartbeat - keep connection alive (send, or server asks for one)
    Heartbeat = 1,
    /// Identify - start a new session (send only)
    Identify = 2,
    /// Presence Update - change status and activity (send only)
    Presence = 3,
    /// Voice State Update - join, move or leave a voice channel (send only)
    VoiceState = 4,
    /// Voice server ping (send only)
    VoicePing = 5,
    /// Resume - re-attach to a dropped session (send only)
    Resume = 6,
    /// Reconnect - server asks the client to reconnect and resume (receive only)
    Reconnect = 7,
    /// Request Guild Members (send only)
    RequestMembers = 8,
    /// Invalid Session - `d` tells whether the session may be resumed (receive only)
    InvalidateSession = 9,
    /// Hello - carries the heartbeat interval (receive only)
    Hello = 10,
    /// Heartbeat ACK (receive only)
    HeartbeatAck = 11,
    /// Guild Sync (send only)
    GuildSync = 12,
}

impl OpCode {
    /// Create an `OpCode` from a raw integer value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::Presence),
            4 => Some(Self::VoiceState),
            5 => Some(Self::VoicePing),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            8 => Some(Self::RequestMembers),
            9 => Some(Self::InvalidateSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            12 => Some(Self::GuildSync),
            _ => None,
        }
    }

    /// Get the raw integer value
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this op code may be sent by the client
    #[must_use]
    pub const fn is_client_op(self) -> bool {
        matches!(
            self,
            Self::Heartbeat
                | Self::Identify
                | Self::Presence
                | Self::VoiceState
                | Self::VoicePing
                | Self::Resume
                | Self::RequestMembers
                | Self::GuildSync
        )
    }

    /// Check if this op code may be sent by the server
    #[must_use]
    pub const fn is_server_op(self) -> bool {
        matches!(
            self,
            Self::Dispatch
                | Self::Heartbeat
                | Self::Reconnect
                | Self::InvalidateSession
                | Self::Hello
                | Self::HeartbeatAck
        )
    }

    /// Get the name of this op code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "Dispatch",
            Self::Heartbeat => "Heartbeat",
            Self::Identify => "Identify",
            Self::Presence => "Presence",
            Self::VoiceState => "VoiceState",
            Self::VoicePing => "VoicePing",
            Self::Resume => "Resume",
            Self::Reconnect => "Reconnect",
            Self::RequestMembers => "RequestMembers",
            Self::InvalidateSession => "InvalidateSession",
            Self::Hello => "Hello",
            Self::HeartbeatAck => "HeartbeatAck",
            Self::GuildSync => "GuildSync",
        }
    }
}

impl Serialize for OpCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Self::from_u8(value).ok_or_else(|| serde::de::Error::custom(format!("invalid op code: {value}")))
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}
