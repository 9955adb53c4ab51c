//! Packet definitions

use crate::error::DecodeError;

/// One-byte tag that opens every packet on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Invalid = 0x01,
    Ping = 0x02,
    SyncRequest = 0x03,
    ChallengeRequest = 0x04,
    ChallengeResponse = 0x05,
}

impl PacketType {
    /// Number of length-prefixed fields following the tag
    pub fn field_count(self) -> usize {
        match self {
            PacketType::Invalid | PacketType::Ping => 0,
            PacketType::SyncRequest => 2,
            PacketType::ChallengeRequest | PacketType::ChallengeResponse => 1,
        }
    }

    /// Handshake traffic is the only kind allowed before authentication
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            PacketType::ChallengeRequest | PacketType::ChallengeResponse
        )
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(PacketType::Invalid),
            0x02 => Ok(PacketType::Ping),
            0x03 => Ok(PacketType::SyncRequest),
            0x04 => Ok(PacketType::ChallengeRequest),
            0x05 => Ok(PacketType::ChallengeResponse),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

/// All wire messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Sent back when a peer's stream could not be decoded
    Invalid,

    /// Liveness check, also used as its own acknowledgment
    Ping,

    /// Clipboard content for the group
    SyncRequest { mime_type: String, data: Vec<u8> },

    /// Nonce the peer must answer to authenticate
    ChallengeRequest { nonce: Vec<u8> },

    /// Value derived from a received nonce
    ChallengeResponse { nonce: Vec<u8> },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Invalid => PacketType::Invalid,
            Packet::Ping => PacketType::Ping,
            Packet::SyncRequest { .. } => PacketType::SyncRequest,
            Packet::ChallengeRequest { .. } => PacketType::ChallengeRequest,
            Packet::ChallengeResponse { .. } => PacketType::ChallengeResponse,
        }
    }

    /// Encode into the canonical wire layout.
    ///
    /// ```text
    /// [tag:1] ([len:4 BE][bytes:len])*
    /// ```
    ///
    /// Field lengths must fit the `u32` prefix; senders check them against
    /// the codec limit before building a packet.
    pub fn encode(&self) -> Vec<u8> {
        let fields: Vec<&[u8]> = match self {
            Packet::Invalid | Packet::Ping => Vec::new(),
            Packet::SyncRequest { mime_type, data } => vec![mime_type.as_bytes(), data],
            Packet::ChallengeRequest { nonce } | Packet::ChallengeResponse { nonce } => {
                vec![nonce]
            }
        };

        let body: usize = fields.iter().map(|f| 4 + f.len()).sum();
        let mut buf = Vec::with_capacity(1 + body);
        buf.push(self.packet_type() as u8);
        for field in fields {
            debug_assert!(field.len() <= u32::MAX as usize);
            buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
            buf.extend_from_slice(field);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_request_layout() {
        let packet = Packet::SyncRequest {
            mime_type: "text/plain".to_string(),
            data: b"hello".to_vec(),
        };

        let mut expected = vec![0x03, 0x00, 0x00, 0x00, 0x0A];
        expected.extend_from_slice(b"text/plain");
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x05]);
        expected.extend_from_slice(b"hello");

        assert_eq!(packet.encode(), expected);
    }

    #[test]
    fn test_empty_packets_are_just_a_tag() {
        assert_eq!(Packet::Ping.encode(), vec![0x02]);
        assert_eq!(Packet::Invalid.encode(), vec![0x01]);
    }

    #[test]
    fn test_field_counts_match_encoding() {
        let packets = [
            Packet::Invalid,
            Packet::Ping,
            Packet::SyncRequest {
                mime_type: "a".into(),
                data: vec![1],
            },
            Packet::ChallengeRequest { nonce: vec![7; 32] },
            Packet::ChallengeResponse { nonce: vec![9; 32] },
        ];

        for packet in packets {
            let ty = PacketType::try_from(packet.encode()[0]).unwrap();
            assert_eq!(ty, packet.packet_type());
        }
        assert_eq!(PacketType::SyncRequest.field_count(), 2);
        assert_eq!(PacketType::ChallengeRequest.field_count(), 1);
        assert_eq!(PacketType::Ping.field_count(), 0);
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(PacketType::try_from(0x00), Err(DecodeError::UnknownType(0x00)));
        assert_eq!(PacketType::try_from(0x06), Err(DecodeError::UnknownType(0x06)));
    }
}
