//! Plain TCP transport
//!
//! Presents no certificates, so connections carry no fingerprints. A TLS
//! transport plugs in through the same traits and fills them in.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::device::Device;
use crate::error::{ConnectError, TransportError};
use crate::transport::{Connection, Listener, Transport};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn bind(&self, port: u16) -> Result<Box<dyn Listener>, TransportError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        tracing::info!("listening on port {}", port);
        Ok(Box::new(TcpGroupListener { listener, port }))
    }

    async fn connect(&self, device: &Device) -> Result<Connection, ConnectError> {
        let addr = device.socket_addr();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectError::Unreachable(format!("{} timed out", addr)))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => ConnectError::Refused,
                _ => ConnectError::Unreachable(e.to_string()),
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        Ok(Connection::from_tcp(stream, addr))
    }
}

struct TcpGroupListener {
    listener: TcpListener,
    port: u16,
}

#[async_trait]
impl Listener for TcpGroupListener {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn accept(&mut self) -> Result<Connection, TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        Ok(Connection::from_tcp(stream, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Codec, Packet};

    #[tokio::test]
    async fn test_connect_and_accept() {
        let transport = TcpTransport::new();
        let mut listener = transport.bind(0).await.unwrap();
        let port = listener.local_port();
        assert_ne!(port, 0);

        let device = Device::new("127.0.0.1".parse().unwrap(), port, "loopback");
        let (outbound, inbound) = tokio::join!(transport.connect(&device), listener.accept());

        let (_, mut writer) = outbound.unwrap().into_split();
        let (mut reader, _) = inbound.unwrap().into_split();

        writer.send(&Packet::Ping).await.unwrap();
        let received = reader.recv(&Codec::default()).await.unwrap();
        assert_eq!(received, Some(Packet::Ping));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let transport = TcpTransport::new().with_connect_timeout(Duration::from_secs(2));
        let listener = transport.bind(0).await.unwrap();
        let port = listener.local_port();
        drop(listener);

        let device = Device::new("127.0.0.1".parse().unwrap(), port, "gone");
        let err = transport.connect(&device).await.unwrap_err();
        assert_eq!(err, ConnectError::Refused);
    }
}
