//! Accept decision for devices that are not yet trusted

use std::net::IpAddr;

use async_trait::async_trait;

/// Decides whether an unknown device may join.
///
/// Usually backed by a prompt; the call may take as long as the user does.
/// The session drops the future if the peer goes away first.
#[async_trait]
pub trait JoinApprover: Send + Sync {
    async fn approve(&self, address: IpAddr, port: u16) -> bool;
}

/// Admit every device that completes the handshake
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl JoinApprover for AcceptAll {
    async fn approve(&self, _address: IpAddr, _port: u16) -> bool {
        true
    }
}

/// Admit only devices already in the trust registry
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectUnknown;

#[async_trait]
impl JoinApprover for RejectUnknown {
    async fn approve(&self, address: IpAddr, port: u16) -> bool {
        tracing::info!("rejecting unknown device {}:{}", address, port);
        false
    }
}
