//! Voice sessions
//!
//! Op codes, close codes, and payloads of the voice protocol, UDP IP
//! discovery, encryption mode negotiation, and the session supervisor.

mod close_codes;
mod connection;
pub mod discovery;
mod error;
mod messages;
mod mode;
mod opcodes;
mod payloads;
mod session;
mod transmitter;

pub use close_codes::VoiceCloseCode;
pub use discovery::{
    discover, discovery_request, discovery_response, parse_discovery_response, DISCOVERY_PACKET_LEN,
};
pub use error::{VoiceError, VoiceResult};
pub use messages::VoiceMessage;
pub use mode::{select_mode, EncryptionMode};
pub use opcodes::VoiceOpCode;
pub use payloads::{
    SelectProtocolData, SelectProtocolPayload, SessionDescriptionPayload, SpeakingPayload,
    VoiceHelloPayload, VoiceIdentifyPayload, VoiceReadyPayload, VoiceResumePayload,
};
pub use session::{VoiceConfig, VoiceSession, VoiceSessionDescriptor, VOICE_GATEWAY_VERSION};
pub use transmitter::{PacketSealer, VoiceTransmitter, FRAME_SAMPLES, RTP_HEADER_LEN};
