//! Gateway error types

use crate::broadcast::WaitError;
use crate::handlers::HandlerError;

/// Errors produced by the gateway client
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// `WebSocket` transport error
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote did not send Hello in time
    #[error("Timed out waiting for Hello from gateway")]
    HelloTimeout,

    /// The remote closed the socket before the handshake finished
    #[error("Connection closed with code {0:?}")]
    Closed(Option<u16>),

    /// The remote broke the protocol; the connection is dropped
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Token rejected (close code 4004)
    #[error("Authentication failed (close code 4004)")]
    AuthenticationFailed,

    /// A close code that no amount of retrying will fix
    #[error("Unrecoverable close code: {0}")]
    FatalClose(u16),

    /// Reconnect budget spent
    #[error("Gave up after {0} reconnect attempts")]
    RetriesExhausted(u32),

    /// No socket is open to send on
    #[error("Gateway is not connected")]
    NotConnected,

    /// The client has already been started
    #[error("Gateway is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl GatewayError {
    /// Errors after which reconnecting cannot help
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed
                | Self::FatalClose(_)
                | Self::RetriesExhausted(_)
                | Self::AlreadyRunning
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<HandlerError> for GatewayError {
    fn from(err: HandlerError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
