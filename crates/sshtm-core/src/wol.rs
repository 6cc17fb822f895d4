//! # Wake-on-LAN
//!
//! Magic packet: 6 bytes of 0xFF followed by the target MAC repeated 16
//! times, sent as a UDP broadcast to port 9.

use crate::SshtmError;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

pub const MAGIC_PACKET_LEN: usize = 102;
const WOL_PORT: u16 = 9;

/// Parse a MAC address written with `:`, `-`, `.` separators or none.
pub fn parse_mac(mac: &str) -> Result<[u8; 6], SshtmError> {
    let invalid = || SshtmError::InvalidMacAddress(mac.to_string());

    let digits: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        let pair = digits.get(i * 2..i * 2 + 2).ok_or_else(invalid)?;
        *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
    }
    Ok(bytes)
}

/// Build the magic packet for a MAC address.
pub fn magic_packet(mac: &[u8; 6]) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(mac);
    }
    packet
}

/// Broadcast a magic packet on the local network.
pub async fn send_magic_packet(mac: &str) -> Result<(), SshtmError> {
    let packet = magic_packet(&parse_mac(mac)?);

    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(&packet, SocketAddr::from((Ipv4Addr::BROADCAST, WOL_PORT)))
        .await?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x00, 0x11, 0x22, 0xaa, 0xbb, 0xcc];

    #[test]
    fn parse_accepts_common_notations() {
        assert_eq!(parse_mac("00:11:22:aa:bb:cc").expect("colon"), MAC);
        assert_eq!(parse_mac("00-11-22-AA-BB-CC").expect("dash"), MAC);
        assert_eq!(parse_mac("0011.22aa.bbcc").expect("dot"), MAC);
        assert_eq!(parse_mac("001122aabbcc").expect("bare"), MAC);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            parse_mac("00:11:22:aa:bb"),
            Err(SshtmError::InvalidMacAddress(_))
        ));
        assert!(matches!(
            parse_mac("00:11:22:aa:bb:zz"),
            Err(SshtmError::InvalidMacAddress(_))
        ));
        assert!(parse_mac("").is_err());
    }

    #[test]
    fn magic_packet_layout() {
        let packet = magic_packet(&MAC);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for i in 0..16 {
            let start = 6 + i * 6;
            assert_eq!(&packet[start..start + 6], &MAC);
        }
    }
}
