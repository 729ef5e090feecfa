//! Voice error types

use crate::broadcast::WaitError;
use crate::error::GatewayError;

/// Errors produced by a voice session
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Socket or gateway-side failure
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// UDP socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server offers none of the modes this client can use
    #[error("No compatible encryption mode (server offered {offered:?})")]
    NoCompatibleMode { offered: Vec<String> },

    /// Audio was requested before the secret key arrived
    #[error("Voice session is not ready to send audio")]
    NotReady,

    #[error("Voice session is not connected")]
    NotConnected,

    /// IP discovery failed or timed out
    #[error("IP discovery failed: {0}")]
    Discovery(String),

    /// The server never named a voice endpoint
    #[error("Voice endpoint unavailable")]
    EndpointUnavailable,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for voice Hello")]
    HelloTimeout,

    #[error("Voice connection closed with code {0:?}")]
    Closed(Option<u16>),

    #[error("Voice authentication failed (close code 4004)")]
    AuthenticationFailed,

    #[error("Unrecoverable voice close code: {0}")]
    FatalClose(u16),

    #[error("Gave up after {0} voice reconnect attempts")]
    RetriesExhausted(u32),

    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl VoiceError {
    /// Errors after which reconnecting cannot help
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::NoCompatibleMode { .. }
            | Self::AuthenticationFailed
            | Self::FatalClose(_)
            | Self::RetriesExhausted(_)
            | Self::EndpointUnavailable => true,
            Self::Gateway(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Voice result type
pub type VoiceResult<T> = Result<T, VoiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_compatible_mode_is_fatal() {
        let err = VoiceError::NoCompatibleMode {
            offered: vec!["aead_aes256_gcm".into()],
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("aead_aes256_gcm"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(!VoiceError::HelloTimeout.is_fatal());
        assert!(!VoiceError::Closed(Some(4015)).is_fatal());
        assert!(!VoiceError::NotReady.is_fatal());
        assert!(VoiceError::Gateway(GatewayError::AuthenticationFailed).is_fatal());
    }
}
