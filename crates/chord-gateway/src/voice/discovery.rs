//! UDP IP discovery
//!
//! Before selecting a protocol the client asks the voice server which
//! address and port its UDP packets arrive from. Both directions use a
//! 74-byte packet:
//!
//! ```text
//! type u16 | length u16 (70) | ssrc u32 | address [u8; 64] (NUL padded) | port u16
//! ```
//!
//! All integers are big-endian.

use super::error::{VoiceError, VoiceResult};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Size of a discovery packet
pub const DISCOVERY_PACKET_LEN: usize = 74;

const REQUEST_TYPE: u16 = 0x1;
const RESPONSE_TYPE: u16 = 0x2;
const BODY_LEN: u16 = 70;
const ADDRESS_LEN: usize = 64;

/// Build the request sent to the voice server's UDP endpoint
#[must_use]
pub fn discovery_request(ssrc: u32) -> [u8; DISCOVERY_PACKET_LEN] {
    encode(REQUEST_TYPE, ssrc, "", 0)
}

/// Build the reply a voice server sends back
#[must_use]
pub fn discovery_response(ssrc: u32, address: &str, port: u16) -> [u8; DISCOVERY_PACKET_LEN] {
    encode(RESPONSE_TYPE, ssrc, address, port)
}

fn encode(kind: u16, ssrc: u32, address: &str, port: u16) -> [u8; DISCOVERY_PACKET_LEN] {
    let mut packet = [0u8; DISCOVERY_PACKET_LEN];
    packet[0..2].copy_from_slice(&kind.to_be_bytes());
    packet[2..4].copy_from_slice(&BODY_LEN.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());

    // Leave room for the terminating NUL
    let bytes = address.as_bytes();
    let len = bytes.len().min(ADDRESS_LEN - 1);
    packet[8..8 + len].copy_from_slice(&bytes[..len]);

    packet[72..74].copy_from_slice(&port.to_be_bytes());
    packet
}

/// Parse a discovery reply into `(address, port)`
pub fn parse_discovery_response(packet: &[u8]) -> VoiceResult<(String, u16)> {
    if packet.len() < DISCOVERY_PACKET_LEN {
        return Err(VoiceError::Discovery(format!(
            "short packet: {} bytes",
            packet.len()
        )));
    }

    let kind = u16::from_be_bytes([packet[0], packet[1]]);
    if kind != RESPONSE_TYPE {
        return Err(VoiceError::Discovery(format!("unexpected packet type {kind:#x}")));
    }

    let field = &packet[8..8 + ADDRESS_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(ADDRESS_LEN);
    let address = std::str::from_utf8(&field[..end])
        .map_err(|_| VoiceError::Discovery("address is not UTF-8".to_string()))?
        .to_string();
    if address.is_empty() {
        return Err(VoiceError::Discovery("empty address".to_string()));
    }

    let port = u16::from_be_bytes([packet[72], packet[73]]);
    Ok((address, port))
}

/// Run discovery on a socket already connected to the voice server
pub async fn discover(socket: &UdpSocket, ssrc: u32, timeout: Duration) -> VoiceResult<(String, u16)> {
    socket.send(&discovery_request(ssrc)).await?;

    let mut buf = [0u8; DISCOVERY_PACKET_LEN];
    let received = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| VoiceError::Discovery("timed out".to_string()))??;

    let (address, port) = parse_discovery_response(&buf[..received])?;
    tracing::debug!(ssrc, address = %address, port, "IP discovery complete");
    Ok((address, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let packet = discovery_request(0x0102_0304);
        assert_eq!(packet.len(), 74);
        assert_eq!(&packet[0..2], &[0x00, 0x01]);
        assert_eq!(&packet[2..4], &[0x00, 70]);
        assert_eq!(&packet[4..8], &[1, 2, 3, 4]);
        assert!(packet[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn response_parses() {
        let packet = discovery_response(9, "203.0.113.7", 50_004);
        assert_eq!(
            parse_discovery_response(&packet).unwrap(),
            ("203.0.113.7".to_string(), 50_004)
        );
    }

    #[test]
    fn malformed_responses_rejected() {
        assert!(parse_discovery_response(&[0u8; 10]).is_err());
        // A request is not a response
        assert!(parse_discovery_response(&discovery_request(1)).is_err());
        assert!(parse_discovery_response(&discovery_response(1, "", 1)).is_err());
    }

    #[tokio::test]
    async fn discover_against_local_responder() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; DISCOVERY_PACKET_LEN];
            let (_, from) = server.recv_from(&mut buf).await.unwrap();
            let ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
            let reply = discovery_response(ssrc, &from.ip().to_string(), from.port());
            server.send_to(&reply, from).await.unwrap();
        });

        let (address, port) = discover(&client, 77, Duration::from_secs(5)).await.unwrap();
        assert_eq!(address, "127.0.0.1");
        assert_eq!(port, client.local_addr().unwrap().port());
    }
}
