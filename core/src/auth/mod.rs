//! Device authentication: handshake, trust registry and join approval

mod approver;
mod handshake;
mod trust;

pub use approver::{AcceptAll, JoinApprover, RejectUnknown};
pub use handshake::{derive_response, ChallengeState, Handshake, HandshakeState, NonceChallenge};
pub use trust::{FileTrustStore, MemoryTrustStore, TrustStore, TRUST_FILE};
