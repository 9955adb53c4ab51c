//! Centralized protocol constants
//!
//! All protocol-level constants are defined here to ensure consistency
//! across the codebase and make configuration easier.

/// Default TCP port for the group listener
pub const DEFAULT_PORT: u16 = 17394;

/// mDNS service type for discovery
pub const SERVICE_TYPE: &str = "_clipmesh._tcp.local.";

/// Current protocol version, advertised in the TXT record
pub const PROTOCOL_VERSION: u16 = 1;

/// Default upper bound for a single length-prefixed field (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Size of the random nonce in a challenge
pub const NONCE_LEN: usize = 32;

/// Size of a challenge response (SHA-256 output)
pub const CHALLENGE_RESPONSE_LEN: usize = 32;

/// Domain separation for the challenge response digest
pub const CHALLENGE_CONTEXT: &[u8] = b"clipmesh-challenge-v1";

/// Length prefix width of every packet field
pub const FIELD_LEN_SIZE: usize = 4;

/// Clipboard polling interval in milliseconds
pub const CLIPBOARD_POLL_INTERVAL_MS: u64 = 500;
