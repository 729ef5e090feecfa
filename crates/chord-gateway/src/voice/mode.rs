//! Encryption mode negotiation
//!
//! The client intersects its preference order with the modes the server
//! lists in READY and takes the first hit.

use super::error::VoiceError;
use serde::{Deserialize, Serialize};

/// Encryption modes this client can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionMode {
    /// Incrementing 4-byte nonce appended to the packet
    #[serde(rename = "xsalsa20_poly1305_lite")]
    XSalsa20Poly1305Lite,
    /// Random 24-byte nonce appended to the packet
    #[serde(rename = "xsalsa20_poly1305_suffix")]
    XSalsa20Poly1305Suffix,
    /// Nonce derived from the RTP header
    #[serde(rename = "xsalsa20_poly1305")]
    XSalsa20Poly1305,
}

impl EncryptionMode {
    /// Client preference, most preferred first
    pub const PREFERENCE: [Self; 3] = [
        Self::XSalsa20Poly1305Lite,
        Self::XSalsa20Poly1305Suffix,
        Self::XSalsa20Poly1305,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::XSalsa20Poly1305Lite => "xsalsa20_poly1305_lite",
            Self::XSalsa20Poly1305Suffix => "xsalsa20_poly1305_suffix",
            Self::XSalsa20Poly1305 => "xsalsa20_poly1305",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|mode| mode.as_str() == s)
    }
}

impl std::fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First entry of `preference` the server supports
///
/// Unknown server modes are ignored. No overlap is fatal for the voice
/// connection.
pub fn select_mode(preference: &[EncryptionMode], server_modes: &[String]) -> Result<EncryptionMode, VoiceError> {
    preference
        .iter()
        .copied()
        .find(|mode| server_modes.iter().any(|offered| offered == mode.as_str()))
        .ok_or_else(|| VoiceError::NoCompatibleMode {
            offered: server_modes.to_vec(),
        })
}
