//! Voice close codes

use crate::protocol::CloseAction;

/// Close codes the voice server may send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum VoiceCloseCode {
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    /// The voice session is gone on the server
    SessionNoLongerValid = 4006,
    SessionTimeout = 4009,
    /// No voice server for this guild
    ServerNotFound = 4011,
    UnknownProtocol = 4012,
    /// Kicked from the channel or the channel was deleted
    Disconnected = 4014,
    /// The voice server crashed; resume
    ServerCrashed = 4015,
    UnknownEncryptionMode = 4016,
}

impl VoiceCloseCode {
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4006 => Some(Self::SessionNoLongerValid),
            4009 => Some(Self::SessionTimeout),
            4011 => Some(Self::ServerNotFound),
            4012 => Some(Self::UnknownProtocol),
            4014 => Some(Self::Disconnected),
            4015 => Some(Self::ServerCrashed),
            4016 => Some(Self::UnknownEncryptionMode),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Reconnect action for this code
    #[must_use]
    pub const fn action(self) -> CloseAction {
        match self {
            Self::UnknownOpcode
            | Self::DecodeError
            | Self::AlreadyAuthenticated
            | Self::ServerCrashed => CloseAction::Resume,
            Self::NotAuthenticated | Self::SessionNoLongerValid | Self::SessionTimeout => {
                CloseAction::Reidentify
            }
            Self::AuthenticationFailed
            | Self::ServerNotFound
            | Self::UnknownProtocol
            | Self::Disconnected
            | Self::UnknownEncryptionMode => CloseAction::Fatal,
        }
    }

    /// Classify any close code seen on a voice socket
    #[must_use]
    pub fn action_for(code: Option<u16>) -> CloseAction {
        match code {
            None => CloseAction::Resume,
            Some(1000 | 1001) => CloseAction::Reidentify,
            Some(raw) => Self::from_u16(raw).map_or(CloseAction::Resume, Self::action),
        }
    }
}

impl std::fmt::Display for VoiceCloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?} ({})", self.as_u16())
    }
}
