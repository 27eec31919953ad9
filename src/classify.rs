//! Priority classification of interface frames by transport protocol.

use smoltcp::wire::IpProtocol;

use crate::constants::{LINK_HEADER_LEN, PRIORITY_DEFAULT, PRIORITY_TCP};

/// Offset of the protocol field inside an IPv4 header.
const IPV4_PROTOCOL_OFFSET: usize = 9;
/// Offset of the next header field inside the fixed IPv6 header.
const IPV6_NEXT_HEADER_OFFSET: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Tcp,
    Other, // UDP, ICMP, etc.
    Unknown, // Not IP, or truncated
}

impl PacketType {
    /// Queue class for this frame, or `None` if it should be dropped.
    pub const fn priority(self) -> Option<usize> {
        match self {
            Self::Tcp => Some(PRIORITY_TCP),
            Self::Other => Some(PRIORITY_DEFAULT),
            Self::Unknown => None,
        }
    }
}

/// Sorts interface frames into priority classes by their transport protocol.
///
/// Frames read from the interface start with `link_header_len` bytes of link
/// metadata before the IP header. Only the fixed IP header is looked at; IPv6
/// extension headers are not walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    link_header_len: usize,
}

impl Classifier {
    pub const fn new(link_header_len: usize) -> Self {
        Self { link_header_len }
    }

    pub const fn link_header_len(&self) -> usize {
        self.link_header_len
    }

    /// Inspects the frame to determine if it carries TCP or something else.
    pub fn packet_type(&self, frame: &[u8]) -> PacketType {
        let Some(ip) = frame.get(self.link_header_len..) else {
            return PacketType::Unknown;
        };
        let Some(&first) = ip.first() else {
            return PacketType::Unknown;
        };

        let protocol_offset = match first >> 4 {
            4 => IPV4_PROTOCOL_OFFSET,
            6 => IPV6_NEXT_HEADER_OFFSET,
            _ => return PacketType::Unknown,
        };

        match ip.get(protocol_offset).map(|&p| IpProtocol::from(p)) {
            Some(IpProtocol::Tcp) => PacketType::Tcp,
            Some(_) => PacketType::Other,
            None => PacketType::Unknown,
        }
    }

    pub fn priority(&self, frame: &[u8]) -> Option<usize> {
        self.packet_type(frame).priority()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(LINK_HEADER_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Packet information header as the TUN device prepends it.
    fn link_header(ethertype: u16) -> Vec<u8> {
        vec![0, 0, (ethertype >> 8) as u8, (ethertype & 0xFF) as u8]
    }

    fn build_ipv4(protocol: u8) -> Vec<u8> {
        let mut frame = link_header(0x0800);
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[3] = 20;
        ip[8] = 64;
        ip[9] = protocol;
        ip[12..16].copy_from_slice(&[192, 168, 1, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 1]);
        frame.extend_from_slice(&ip);
        frame
    }

    fn build_ipv6(next_header: u8) -> Vec<u8> {
        let mut frame = link_header(0x86DD);
        let mut ip = vec![0u8; 40];
        ip[0] = 0x60;
        ip[6] = next_header;
        ip[7] = 64;
        frame.extend_from_slice(&ip);
        frame
    }

    #[test]
    fn test_tcp_v4_goes_to_tcp_class() {
        let classifier = Classifier::default();
        let frame = build_ipv4(6);
        assert_eq!(frame[13], 6);
        assert_eq!(classifier.packet_type(&frame), PacketType::Tcp);
        assert_eq!(classifier.priority(&frame), Some(PRIORITY_TCP));
    }

    #[test]
    fn test_udp_and_icmp_v4_go_to_default_class() {
        let classifier = Classifier::default();
        assert_eq!(classifier.priority(&build_ipv4(17)), Some(PRIORITY_DEFAULT));
        assert_eq!(classifier.priority(&build_ipv4(1)), Some(PRIORITY_DEFAULT));
    }

    #[test]
    fn test_tcp_v6_reads_next_header() {
        let classifier = Classifier::default();
        let frame = build_ipv6(6);
        assert_eq!(frame[10], 6);
        assert_eq!(classifier.packet_type(&frame), PacketType::Tcp);
        assert_eq!(classifier.priority(&build_ipv6(58)), Some(PRIORITY_DEFAULT));
    }

    #[test]
    fn test_unknown_version_is_dropped() {
        let classifier = Classifier::default();
        let mut frame = build_ipv4(6);
        frame[4] = 0x55;
        assert_eq!(classifier.packet_type(&frame), PacketType::Unknown);
        assert_eq!(classifier.priority(&frame), None);
    }

    #[test]
    fn test_truncated_frames_are_unknown() {
        let classifier = Classifier::default();
        assert_eq!(classifier.packet_type(&[]), PacketType::Unknown);
        assert_eq!(classifier.packet_type(&[0, 0, 8, 0]), PacketType::Unknown);
        assert_eq!(classifier.packet_type(&[0, 0, 8, 0, 0x45, 0, 0]), PacketType::Unknown);
    }

    #[test]
    fn test_without_link_header() {
        let classifier = Classifier::new(0);
        assert_eq!(classifier.link_header_len(), 0);
        assert_eq!(Classifier::default().link_header_len(), LINK_HEADER_LEN);
        let frame = build_ipv4(6);
        assert_eq!(classifier.packet_type(&frame[4..]), PacketType::Tcp);
    }
}
