//! Binary codec for clipmesh packets.
//!
//! Wire format:
//! ```text
//! [tag:1][len:4][field:len]...[len:4][field:len]
//! ```
//! The number of fields is fixed per packet type. All lengths are big-endian.
//! Decoding bounds every declared length by a configurable maximum so a
//! hostile peer cannot make us allocate arbitrary amounts of memory.

use crate::error::DecodeError;
use crate::protocol::constants::{FIELD_LEN_SIZE, MAX_PAYLOAD_SIZE};
use crate::protocol::packet::{Packet, PacketType};

/// Decoder with a bound on field sizes
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    max_payload: usize,
}

impl Codec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Reject a declared field length above the configured bound
    pub fn check_length(&self, declared: usize) -> Result<(), DecodeError> {
        if declared > self.max_payload {
            return Err(DecodeError::LengthOverflow {
                declared,
                max: self.max_payload,
            });
        }
        Ok(())
    }

    /// Decode exactly one packet occupying all of `bytes`.
    ///
    /// Never panics: short input is [`DecodeError::Truncated`], leftovers
    /// are [`DecodeError::TrailingBytes`].
    pub fn decode(&self, bytes: &[u8]) -> Result<Packet, DecodeError> {
        let (&tag, rest) = bytes.split_first().ok_or(DecodeError::Truncated {
            needed: 1,
            available: 0,
        })?;
        let packet_type = PacketType::try_from(tag)?;

        let mut fields = Fields { codec: self, rest };
        let packet = match packet_type {
            PacketType::Invalid => Packet::Invalid,
            PacketType::Ping => Packet::Ping,
            PacketType::SyncRequest => {
                let mime = fields.next()?;
                let data = fields.next()?;
                let mime_type = std::str::from_utf8(mime)
                    .map_err(|_| DecodeError::InvalidMimeType)?
                    .to_string();
                Packet::SyncRequest {
                    mime_type,
                    data: data.to_vec(),
                }
            }
            PacketType::ChallengeRequest => Packet::ChallengeRequest {
                nonce: fields.next()?.to_vec(),
            },
            PacketType::ChallengeResponse => Packet::ChallengeResponse {
                nonce: fields.next()?.to_vec(),
            },
        };

        fields.finish()?;
        Ok(packet)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

/// Cursor over the length-prefixed fields of one packet
struct Fields<'a> {
    codec: &'a Codec,
    rest: &'a [u8],
}

impl<'a> Fields<'a> {
    fn next(&mut self) -> Result<&'a [u8], DecodeError> {
        if self.rest.len() < FIELD_LEN_SIZE {
            return Err(DecodeError::Truncated {
                needed: FIELD_LEN_SIZE,
                available: self.rest.len(),
            });
        }

        let (len_bytes, body) = self.rest.split_at(FIELD_LEN_SIZE);
        let declared =
            u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        self.codec.check_length(declared)?;

        if body.len() < declared {
            return Err(DecodeError::Truncated {
                needed: declared,
                available: body.len(),
            });
        }

        let (field, rest) = body.split_at(declared);
        self.rest = rest;
        Ok(field)
    }

    fn finish(self) -> Result<(), DecodeError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.rest.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Packet> {
        vec![
            Packet::Invalid,
            Packet::Ping,
            Packet::SyncRequest {
                mime_type: "text/plain".to_string(),
                data: b"hello".to_vec(),
            },
            Packet::SyncRequest {
                mime_type: "image/png".to_string(),
                data: Vec::new(),
            },
            Packet::ChallengeRequest {
                nonce: (0u8..32).collect(),
            },
            Packet::ChallengeResponse {
                nonce: vec![0xAB; 32],
            },
        ]
    }

    #[test]
    fn test_roundtrip() {
        let codec = Codec::default();
        for packet in samples() {
            let decoded = codec.decode(&packet.encode()).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_every_prefix_is_truncated() {
        let codec = Codec::default();
        for packet in samples() {
            let bytes = packet.encode();
            for end in 0..bytes.len() {
                match codec.decode(&bytes[..end]) {
                    Err(DecodeError::Truncated { .. }) => {}
                    other => panic!("prefix {} of {:?} gave {:?}", end, packet, other),
                }
            }
        }
    }

    #[test]
    fn test_unknown_type() {
        let codec = Codec::default();
        assert_eq!(codec.decode(&[0x7F]), Err(DecodeError::UnknownType(0x7F)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let codec = Codec::default();
        let mut bytes = Packet::Ping.encode();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(codec.decode(&bytes), Err(DecodeError::TrailingBytes(2)));
    }

    #[test]
    fn test_length_overflow() {
        let codec = Codec::new(8);
        let bytes = [0x04, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(
            codec.decode(&bytes),
            Err(DecodeError::LengthOverflow {
                declared: u32::MAX as usize,
                max: 8
            })
        );

        let packet = Packet::ChallengeRequest { nonce: vec![1; 9] };
        assert!(matches!(
            codec.decode(&packet.encode()),
            Err(DecodeError::LengthOverflow { declared: 9, max: 8 })
        ));

        let packet = Packet::ChallengeRequest { nonce: vec![1; 8] };
        assert_eq!(codec.decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn test_invalid_mime_type() {
        let codec = Codec::default();
        let mut bytes = vec![0x03, 0, 0, 0, 2, 0xC3, 0x28];
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(codec.decode(&bytes), Err(DecodeError::InvalidMimeType));
    }

    #[test]
    fn test_decode_wire_example() {
        let mut bytes = vec![0x03, 0x00, 0x00, 0x00, 0x0A];
        bytes.extend_from_slice(b"text/plain");
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x05]);
        bytes.extend_from_slice(b"hello");

        let packet = Codec::default().decode(&bytes).unwrap();
        assert_eq!(
            packet,
            Packet::SyncRequest {
                mime_type: "text/plain".to_string(),
                data: b"hello".to_vec()
            }
        );
    }
}
