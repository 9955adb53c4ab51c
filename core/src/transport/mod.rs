//! Connection abstraction consumed by the group coordinator
//!
//! A [`Transport`] opens outbound connections and binds a [`Listener`] for
//! inbound ones. Every [`Connection`] exposes the certificate fingerprints
//! negotiated by the transport (if any) so the handshake can bind its proof
//! to them. Certificate validation itself belongs to the transport.

pub mod framing;
mod tcp;

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::device::{Device, Fingerprint};
use crate::error::{ConnectError, DecodeError, TransportError};
use crate::protocol::{Codec, Packet};

pub use tcp::TcpTransport;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Failure while receiving a packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecvError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind the listening endpoint; failure here is a startup failure
    async fn bind(&self, port: u16) -> Result<Box<dyn Listener>, TransportError>;

    /// Open a connection to a device
    async fn connect(&self, device: &Device) -> Result<Connection, ConnectError>;
}

#[async_trait]
pub trait Listener: Send {
    /// Port actually bound (differs from the requested one when it was 0)
    fn local_port(&self) -> u16;

    async fn accept(&mut self) -> Result<Connection, TransportError>;
}

/// An established byte stream to a peer
pub struct Connection {
    peer_addr: SocketAddr,
    local_fingerprint: Option<Fingerprint>,
    peer_fingerprint: Option<Fingerprint>,
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl Connection {
    /// Wrap any bidirectional stream
    pub fn new<S>(stream: S, peer_addr: SocketAddr) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            peer_addr,
            local_fingerprint: None,
            peer_fingerprint: None,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn from_tcp(stream: tokio::net::TcpStream, peer_addr: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            peer_addr,
            local_fingerprint: None,
            peer_fingerprint: None,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Record the certificates presented on each side
    pub fn with_fingerprints(
        mut self,
        local: Option<Fingerprint>,
        peer: Option<Fingerprint>,
    ) -> Self {
        self.local_fingerprint = local;
        self.peer_fingerprint = peer;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_fingerprint(&self) -> Option<&Fingerprint> {
        self.local_fingerprint.as_ref()
    }

    pub fn peer_fingerprint(&self) -> Option<&Fingerprint> {
        self.peer_fingerprint.as_ref()
    }

    /// Split into read and write halves for concurrent processing
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        (
            ConnectionReader {
                stream: self.reader,
            },
            ConnectionWriter {
                stream: self.writer,
            },
        )
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("peer_fingerprint", &self.peer_fingerprint)
            .finish()
    }
}

/// Read half of a connection
pub struct ConnectionReader {
    stream: BoxedReader,
}

impl ConnectionReader {
    /// Receive the next packet; `Ok(None)` on a clean close
    pub async fn recv(&mut self, codec: &Codec) -> Result<Option<Packet>, RecvError> {
        match framing::read_frame(&mut self.stream, codec).await? {
            Some(frame) => Ok(Some(codec.decode(&frame)?)),
            None => Ok(None),
        }
    }
}

/// Write half of a connection
pub struct ConnectionWriter {
    stream: BoxedWriter,
}

impl ConnectionWriter {
    pub async fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.send_frame(&packet.encode()).await
    }

    /// Send an already encoded packet
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        framing::write_frame(&mut self.stream, frame).await
    }

    pub async fn close(mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let (_, mut writer) = Connection::new(a, addr).into_split();
        let (mut reader, _) = Connection::new(b, addr).into_split();

        let packet = Packet::SyncRequest {
            mime_type: "text/plain".to_string(),
            data: b"over the wire".to_vec(),
        };
        writer.send(&packet).await.unwrap();
        writer.close().await.unwrap();

        let codec = Codec::default();
        assert_eq!(reader.recv(&codec).await.unwrap(), Some(packet));
        assert_eq!(reader.recv(&codec).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fingerprints_survive_wrapping() {
        let (a, _b) = tokio::io::duplex(64);
        let addr: SocketAddr = "10.0.0.5:17394".parse().unwrap();
        let conn = Connection::new(a, addr).with_fingerprints(
            Some(Fingerprint::new("local")),
            Some(Fingerprint::new("peer")),
        );

        assert_eq!(conn.peer_addr(), addr);
        assert_eq!(conn.local_fingerprint(), Some(&Fingerprint::new("local")));
        assert_eq!(conn.peer_fingerprint(), Some(&Fingerprint::new("peer")));
    }

    #[tokio::test]
    async fn test_garbage_is_decode_error() {
        let (a, b) = tokio::io::duplex(64);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (_, mut writer) = Connection::new(a, addr).into_split();
        let (mut reader, _) = Connection::new(b, addr).into_split();

        writer.send_frame(&[0xEE, 0x01]).await.unwrap();
        let result = reader.recv(&Codec::default()).await;
        assert_eq!(result, Err(RecvError::Decode(DecodeError::UnknownType(0xEE))));
    }
}
