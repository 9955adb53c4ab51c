use thiserror::Error;

/// Failure to turn bytes into a [`Packet`](crate::protocol::Packet)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated packet: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown packet type: 0x{0:02X}")]
    UnknownType(u8),

    #[error("declared length {declared} exceeds maximum {max}")]
    LengthOverflow { declared: usize, max: usize },

    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    #[error("mime type is not valid UTF-8")]
    InvalidMimeType,
}

/// Why a handshake did not produce an authenticated session
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("handshake timed out")]
    Timeout,

    #[error("challenge response does not match")]
    Mismatch,

    #[error("malformed handshake message")]
    Malformed,

    #[error("join request rejected")]
    Rejected,
}

/// Outbound connection failures, reported to whoever asked for the connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("TLS negotiation failed: {0}")]
    TlsFailure(String),

    #[error("connection refused")]
    Refused,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("I/O failure: {0}")]
    IoFailure(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::IoFailure(e.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("discovery service unavailable: {0}")]
    Unavailable(String),

    #[error("failed to advertise service: {0}")]
    Advertise(String),

    #[error("failed to browse for services: {0}")]
    Browse(String),
}

/// Clipmesh error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: TransportError,
    },

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Trust store error: {0}")]
    Trust(String),

    #[error("{field} is {size} bytes, the limit is {max}")]
    PayloadTooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to serialize/deserialize: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("coordinator has stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, Error>;
