//! Clipmesh Core - LAN clipboard sharing library
//!
//! Devices find each other over mDNS, prove possession of their transport
//! certificate with a nonce challenge, and then keep one shared clipboard:
//! every update a member publishes is relayed to every other member.

pub mod auth;
pub mod clipboard;
pub mod config;
pub mod device;
pub mod discovery;
pub mod group;
pub mod protocol;
pub mod transport;

mod error;

pub use error::{AuthError, ConnectError, DecodeError, DiscoveryError, Error, Result, TransportError};

// Re-export key types for convenience
pub use config::Config;
pub use device::{Device, Fingerprint, LocalIdentity};
pub use group::{ClipboardSnapshot, Collaborators, Coordinator, GroupEvent, UpdateOrigin};
pub use protocol::{Codec, Packet, PacketType};
