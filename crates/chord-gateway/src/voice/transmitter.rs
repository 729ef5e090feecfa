//! Outgoing voice frames
//!
//! Prepares RTP headers and keeps the per-stream sequence and timestamp.
//! Encrypting the packet is the job of a [`PacketSealer`] supplied by the
//! caller; this crate never implements the cipher itself.

use super::error::{VoiceError, VoiceResult};
use super::mode::EncryptionMode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Length of the RTP header
pub const RTP_HEADER_LEN: usize = 12;

/// Samples per 20 ms frame at 48 kHz
pub const FRAME_SAMPLES: u32 = 960;

const RTP_VERSION: u8 = 0x80;
const RTP_PAYLOAD_TYPE: u8 = 0x78;

/// Encrypts one voice packet
pub trait PacketSealer: Send + Sync {
    /// Append the sealed packet (header, ciphertext, and any nonce suffix) to `out`
    fn seal(
        &self,
        mode: EncryptionMode,
        key: &[u8; 32],
        header: &[u8; RTP_HEADER_LEN],
        payload: &[u8],
        out: &mut Vec<u8>,
    ) -> VoiceResult<()>;
}

/// Sends encoded audio frames for one voice session
///
/// Only obtainable once the session holds a secret key, and refuses to
/// seal anything once that key has been cleared or replaced.
pub struct VoiceTransmitter {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    mode: EncryptionMode,
    secret_key: [u8; 32],
    /// Session key generation; bumped whenever the key is installed or cleared
    key_epoch: Arc<AtomicU64>,
    issued_epoch: u64,
    /// Connected to the voice server's UDP endpoint
    socket: Option<Arc<UdpSocket>>,
}

impl VoiceTransmitter {
    /// Must be called while the key and `key_epoch` cannot change
    pub(crate) fn new(ssrc: u32, mode: EncryptionMode, secret_key: [u8; 32], key_epoch: Arc<AtomicU64>) -> Self {
        let issued_epoch = key_epoch.load(Ordering::Acquire);
        Self {
            ssrc,
            sequence: 0,
            timestamp: 0,
            mode,
            secret_key,
            key_epoch,
            issued_epoch,
            socket: None,
        }
    }

    pub(crate) fn with_socket(mut self, socket: Arc<UdpSocket>) -> Self {
        self.socket = Some(socket);
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// False once the session's key has been cleared or renegotiated
    pub fn is_current(&self) -> bool {
        self.key_epoch.load(Ordering::Acquire) == self.issued_epoch
    }

    /// RTP header for the next frame
    pub fn header(&self) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = RTP_VERSION;
        header[1] = RTP_PAYLOAD_TYPE;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Seal one encoded frame and advance the stream counters
    pub fn prepare(&mut self, payload: &[u8], sealer: &dyn PacketSealer) -> VoiceResult<Vec<u8>> {
        if !self.is_current() {
            return Err(VoiceError::NotReady);
        }
        let header = self.header();
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload.len() + 40);
        sealer.seal(self.mode, &self.secret_key, &header, payload, &mut packet)?;

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(FRAME_SAMPLES);
        Ok(packet)
    }

    /// Seal and send one frame over the session's UDP socket
    pub async fn send(&mut self, payload: &[u8], sealer: &dyn PacketSealer) -> VoiceResult<()> {
        let socket = self.socket.clone().ok_or(VoiceError::NotConnected)?;
        let packet = self.prepare(payload, sealer)?;
        socket.send(&packet).await?;
        tracing::trace!(seq = self.sequence, bytes = packet.len(), "Voice frame sent");
        Ok(())
    }
}

impl std::fmt::Debug for VoiceTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceTransmitter")
            .field("ssrc", &self.ssrc)
            .field("sequence", &self.sequence)
            .field("timestamp", &self.timestamp)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
