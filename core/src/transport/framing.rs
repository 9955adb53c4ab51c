//! Packet-delimited framing for stream transports
//!
//! There is no separate transport framer: a frame is one packet, and its
//! extent is found by reading the tag and then each length-prefixed field
//! the packet type declares. Field lengths are checked against the codec's
//! bound before anything is allocated.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;
use crate::protocol::constants::FIELD_LEN_SIZE;
use crate::protocol::{Codec, PacketType};
use crate::transport::RecvError;

/// Read the raw bytes of one packet from an async reader.
///
/// Returns `Ok(None)` if the stream ends cleanly on a packet boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    codec: &Codec,
) -> Result<Option<Vec<u8>>, RecvError> {
    let mut tag = [0u8; 1];
    let n = reader.read(&mut tag).await.map_err(TransportError::from)?;
    if n == 0 {
        return Ok(None);
    }

    let packet_type = PacketType::try_from(tag[0])?;
    let mut frame = vec![tag[0]];

    for _ in 0..packet_type.field_count() {
        let mut len_buf = [0u8; FIELD_LEN_SIZE];
        reader
            .read_exact(&mut len_buf)
            .await
            .map_err(TransportError::from)?;

        let len = u32::from_be_bytes(len_buf) as usize;
        codec.check_length(len)?;

        frame.extend_from_slice(&len_buf);
        let start = frame.len();
        frame.resize(start + len, 0);
        reader
            .read_exact(&mut frame[start..])
            .await
            .map_err(TransportError::from)?;
    }

    tracing::trace!(kind = ?packet_type, len = frame.len(), "read frame");
    Ok(Some(frame))
}

/// Write one encoded packet and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> Result<(), TransportError> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::protocol::Packet;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_reads_consecutive_packets() {
        let first = Packet::SyncRequest {
            mime_type: "text/plain".to_string(),
            data: b"hello".to_vec(),
        };
        let second = Packet::Ping;

        let mut buffer = Vec::new();
        write_frame(&mut buffer, &first.encode()).await.unwrap();
        write_frame(&mut buffer, &second.encode()).await.unwrap();

        let codec = Codec::default();
        let mut cursor = Cursor::new(buffer);
        let a = read_frame(&mut cursor, &codec).await.unwrap().unwrap();
        let b = read_frame(&mut cursor, &codec).await.unwrap().unwrap();

        assert_eq!(codec.decode(&a).unwrap(), first);
        assert_eq!(codec.decode(&b).unwrap(), second);
        assert!(read_frame(&mut cursor, &codec).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let packet = Packet::ChallengeRequest { nonce: vec![5; 32] };
        let bytes = packet.encode();

        let mut reader = tokio_test::io::Builder::new()
            .read(&bytes[..1])
            .read(&bytes[1..3])
            .read(&bytes[3..20])
            .read(&bytes[20..])
            .build();

        let codec = Codec::default();
        let frame = read_frame(&mut reader, &codec).await.unwrap().unwrap();
        assert_eq!(codec.decode(&frame).unwrap(), packet);
    }

    #[tokio::test]
    async fn test_eof_mid_packet_is_closed() {
        let bytes = Packet::ChallengeRequest { nonce: vec![5; 32] }.encode();
        let mut cursor = Cursor::new(bytes[..10].to_vec());

        let result = read_frame(&mut cursor, &Codec::default()).await;
        assert!(matches!(
            result,
            Err(RecvError::Transport(TransportError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_unknown_tag_is_decode_error() {
        let mut cursor = Cursor::new(vec![0x42, 0, 0]);
        let result = read_frame(&mut cursor, &Codec::default()).await;
        assert!(matches!(
            result,
            Err(RecvError::Decode(DecodeError::UnknownType(0x42)))
        ));
    }

    #[tokio::test]
    async fn test_oversized_field_rejected_before_read() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0x03, 0x7F, 0xFF, 0xFF, 0xFF])
            .build();
        let result = read_frame(&mut reader, &Codec::new(1024)).await;
        assert!(matches!(
            result,
            Err(RecvError::Decode(DecodeError::LengthOverflow { max: 1024, .. }))
        ));
    }
}
