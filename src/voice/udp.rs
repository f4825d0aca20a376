use std::{net::SocketAddr, time::Duration};

use tokio::net::UdpSocket;

use crate::common::errors::VoiceError;

pub const DISCOVERY_PACKET_SIZE: usize = 74;
pub const IP_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// External address as seen by the voice server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddress {
    pub ip: String,
    pub port: u16,
}

/// Builds the discovery request: type 1, length 70, then the SSRC.
pub fn discovery_packet(ssrc: u32) -> [u8; DISCOVERY_PACKET_SIZE] {
    let mut packet = [0u8; DISCOVERY_PACKET_SIZE];
    packet[0..2].copy_from_slice(&1u16.to_be_bytes());
    packet[2..4].copy_from_slice(&70u16.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());
    packet
}

pub fn parse_discovery_response(buf: &[u8]) -> Result<DiscoveredAddress, VoiceError> {
    if buf.len() < DISCOVERY_PACKET_SIZE {
        return Err(VoiceError::Discovery(format!(
            "malformed response ({} bytes)",
            buf.len()
        )));
    }
    let ip = std::str::from_utf8(&buf[8..72])
        .map_err(|e| VoiceError::Discovery(e.to_string()))?
        .trim_matches('\0')
        .to_string();
    let port = u16::from_le_bytes([buf[72], buf[73]]);
    Ok(DiscoveredAddress { ip, port })
}

pub async fn discover_ip(
    socket: &UdpSocket,
    addr: SocketAddr,
    ssrc: u32,
) -> Result<DiscoveredAddress, VoiceError> {
    socket
        .send_to(&discovery_packet(ssrc), addr)
        .await
        .map_err(|e| VoiceError::Discovery(e.to_string()))?;

    let mut buf = [0u8; DISCOVERY_PACKET_SIZE];
    match tokio::time::timeout(IP_DISCOVERY_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(Ok(n)) => parse_discovery_response(&buf[..n]),
        Ok(Err(e)) => Err(VoiceError::Discovery(e.to_string())),
        Err(_) => Err(VoiceError::Discovery("timed out".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let packet = discovery_packet(0x01020304);
        assert_eq!(&packet[0..8], &[0, 1, 0, 70, 1, 2, 3, 4]);
        assert!(packet[8..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn discovers_against_a_local_responder() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; DISCOVERY_PACKET_SIZE];
            let (_, from) = server.recv_from(&mut buf).await.unwrap();
            let mut reply = [0u8; DISCOVERY_PACKET_SIZE];
            reply[0..2].copy_from_slice(&2u16.to_be_bytes());
            reply[2..4].copy_from_slice(&70u16.to_be_bytes());
            reply[4..8].copy_from_slice(&buf[4..8]);
            reply[8..17].copy_from_slice(b"203.0.113");
            reply[72..74].copy_from_slice(&50_004u16.to_le_bytes());
            server.send_to(&reply, from).await.unwrap();
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let found = discover_ip(&client, server_addr, 42).await.unwrap();
        assert_eq!(found.ip, "203.0.113");
        assert_eq!(found.port, 50_004);
    }

    #[test]
    fn short_response_is_rejected() {
        assert!(parse_discovery_response(&[0u8; 10]).is_err());
    }
}
