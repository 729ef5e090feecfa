//! Gateway events
//!
//! Event names, the payloads the client reads itself, and the lifecycle
//! events published to subscribers.

mod event_types;
mod payloads;

pub use event_types::GatewayEventType;
pub use payloads::{
    ReadyEvent, UnavailableGuild, UserPayload, VoiceServerUpdateEvent, VoiceStateUpdateEvent,
};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Everything a subscriber can observe on the general event stream
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A fresh session was established
    Ready {
        session_id: String,
        shard_id: Option<u32>,
    },
    /// A previous session was re-attached; replayed dispatches follow
    Resumed { session_id: String },
    /// Any dispatch frame, including READY and RESUMED
    Dispatch {
        name: String,
        sequence: Option<u64>,
        data: Arc<Value>,
    },
    /// The supervisor is about to reconnect
    Reconnecting {
        attempt: u32,
        resume: bool,
        delay: Duration,
    },
    /// The remote broke the protocol; the connection was dropped
    ProtocolError { message: String },
    /// The socket closed. `terminal` means no reconnect will follow.
    Disconnected { code: Option<u16>, terminal: bool },
}

impl GatewayEvent {
    /// Event name for dispatches, `None` for lifecycle events
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Dispatch { name, .. } => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected { terminal: true, .. })
    }
}
