//! Voice op codes

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Voice connection op codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VoiceOpCode {
    /// Client → Server: Begin a voice session
    Identify = 0,
    /// Client → Server: Choose transport address and encryption mode
    SelectProtocol = 1,
    /// Server → Client: SSRC, UDP endpoint, and supported modes
    Ready = 2,
    /// Client → Server: Keep the connection alive (nonce payload)
    Heartbeat = 3,
    /// Server → Client: Selected mode and secret key
    SessionDescription = 4,
    /// Bidirectional: Speaking indicator
    Speaking = 5,
    /// Server → Client: Heartbeat acknowledged (echoes the nonce)
    HeartbeatAck = 6,
    /// Client → Server: Resume a dropped voice session
    Resume = 7,
    /// Server → Client: Heartbeat interval
    Hello = 8,
    /// Server → Client: Resume rejected, identify again
    InvalidateSession = 9,
}

impl VoiceOpCode {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Identify),
            1 => Some(Self::SelectProtocol),
            2 => Some(Self::Ready),
            3 => Some(Self::Heartbeat),
            4 => Some(Self::SessionDescription),
            5 => Some(Self::Speaking),
            6 => Some(Self::HeartbeatAck),
            7 => Some(Self::Resume),
            8 => Some(Self::Hello),
            9 => Some(Self::InvalidateSession),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Op codes only the client sends
    #[must_use]
    pub const fn is_client_op(self) -> bool {
        matches!(
            self,
            Self::Identify | Self::SelectProtocol | Self::Heartbeat | Self::Resume
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Identify => "Identify",
            Self::SelectProtocol => "SelectProtocol",
            Self::Ready => "Ready",
            Self::Heartbeat => "Heartbeat",
            Self::SessionDescription => "SessionDescription",
            Self::Speaking => "Speaking",
            Self::HeartbeatAck => "HeartbeatAck",
            Self::Resume => "Resume",
            Self::Hello => "Hello",
            Self::InvalidateSession => "InvalidateSession",
        }
    }
}

impl Serialize for VoiceOpCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for VoiceOpCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Self::from_u8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid voice op code: {value}")))
    }
}

impl std::fmt::Display for VoiceOpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}
