//! # chord-gateway
//!
//! Realtime gateway client: keeps one authenticated `WebSocket` session
//! alive across network faults, fans dispatches out to subscribers and
//! one-shot waiters, and opens voice sessions on demand.

pub mod broadcast;
pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod handlers;
pub mod heartbeat;
pub mod protocol;
pub mod voice;

pub use broadcast::{EventDispatcher, WaitError, WaitFor};
pub use client::Gateway;
pub use connection::{ConnectionState, Session};
pub use error::{GatewayError, GatewayResult};
pub use events::GatewayEvent;
pub use voice::{VoiceError, VoiceResult, VoiceSession};
