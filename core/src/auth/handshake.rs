//! Nonce-challenge handshake
//!
//! Each side of a connection issues one challenge and answers one. The
//! answer is `SHA-256(context || nonce || certificate fingerprint)`, using
//! the certificate the answering side presents on this connection, so a
//! response cannot be replayed over a connection with a different
//! certificate.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::time::Instant;

use crate::device::Fingerprint;
use crate::error::AuthError;
use crate::protocol::constants::{CHALLENGE_CONTEXT, CHALLENGE_RESPONSE_LEN, NONCE_LEN};
use crate::protocol::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Issued,
    Completed,
    Expired,
}

/// A nonce handed to exactly one peer on exactly one connection
#[derive(Debug, Clone)]
pub struct NonceChallenge {
    nonce: [u8; NONCE_LEN],
    issued_at: Instant,
    state: ChallengeState,
}

impl NonceChallenge {
    pub fn issue() -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        Self {
            nonce,
            issued_at: Instant::now(),
            state: ChallengeState::Issued,
        }
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    /// Check a response against the value the peer should have derived.
    ///
    /// Moves the challenge to a terminal state either way.
    pub fn verify(
        &mut self,
        response: &[u8],
        peer: Option<&Fingerprint>,
    ) -> Result<(), AuthError> {
        if self.state != ChallengeState::Issued {
            return Err(AuthError::Malformed);
        }
        if response.len() != CHALLENGE_RESPONSE_LEN {
            self.state = ChallengeState::Expired;
            return Err(AuthError::Malformed);
        }

        let expected = derive_response(&self.nonce, peer);
        if bool::from(expected.ct_eq(response)) {
            self.state = ChallengeState::Completed;
            Ok(())
        } else {
            self.state = ChallengeState::Expired;
            Err(AuthError::Mismatch)
        }
    }

    pub fn expire(&mut self) {
        if self.state == ChallengeState::Issued {
            self.state = ChallengeState::Expired;
        }
    }
}

/// Value a peer must send back for `nonce`
pub fn derive_response(nonce: &[u8], fingerprint: Option<&Fingerprint>) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(CHALLENGE_CONTEXT);
    hasher.update(nonce);
    if let Some(fp) = fingerprint {
        hasher.update(fp.as_bytes());
    }
    hasher.finalize().to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unauthenticated,
    ChallengeIssued,
    Authenticated,
    Rejected(AuthError),
}

/// Per-connection handshake state machine.
///
/// Only reports outcomes; promoting the session is up to the coordinator.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    challenge: Option<NonceChallenge>,
    verified: bool,
    answered: bool,
    timeout: Duration,
}

impl Handshake {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: HandshakeState::Unauthenticated,
            challenge: None,
            verified: false,
            answered: false,
            timeout,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == HandshakeState::Authenticated
    }

    /// Issue our challenge. Returns `None` if one was already issued.
    pub fn issue(&mut self) -> Option<Packet> {
        if self.state != HandshakeState::Unauthenticated {
            return None;
        }
        let challenge = NonceChallenge::issue();
        let packet = Packet::ChallengeRequest {
            nonce: challenge.nonce().to_vec(),
        };
        self.challenge = Some(challenge);
        self.state = HandshakeState::ChallengeIssued;
        Some(packet)
    }

    /// When the peer's response is due, if we are still waiting for it
    pub fn response_deadline(&self) -> Option<Instant> {
        match (&self.state, &self.challenge) {
            (HandshakeState::ChallengeIssued, Some(challenge)) if !self.verified => {
                Some(challenge.issued_at() + self.timeout)
            }
            _ => None,
        }
    }

    /// Answer the peer's challenge. A peer gets one answer per connection.
    pub fn answer(
        &mut self,
        nonce: &[u8],
        local: Option<&Fingerprint>,
    ) -> Result<Packet, AuthError> {
        if self.answered || nonce.len() != NONCE_LEN {
            return Err(AuthError::Malformed);
        }
        self.answered = true;
        Ok(Packet::ChallengeResponse {
            nonce: derive_response(nonce, local),
        })
    }

    /// Verify the peer's response to our challenge.
    ///
    /// On success the handshake waits for an accept decision.
    pub fn on_response(
        &mut self,
        response: &[u8],
        peer: Option<&Fingerprint>,
    ) -> Result<(), AuthError> {
        if self.state != HandshakeState::ChallengeIssued || self.verified {
            return Err(self.reject(AuthError::Malformed));
        }
        let result = match self.challenge.as_mut() {
            Some(challenge) => challenge.verify(response, peer),
            None => Err(AuthError::Malformed),
        };
        match result {
            Ok(()) => {
                self.verified = true;
                Ok(())
            }
            Err(e) => Err(self.reject(e)),
        }
    }

    /// Response verified, accept decision still outstanding
    pub fn awaiting_decision(&self) -> bool {
        self.state == HandshakeState::ChallengeIssued && self.verified
    }

    pub fn approve(&mut self) -> Result<(), AuthError> {
        if !self.awaiting_decision() {
            return Err(AuthError::Malformed);
        }
        self.state = HandshakeState::Authenticated;
        Ok(())
    }

    pub fn reject(&mut self, cause: AuthError) -> AuthError {
        if let Some(challenge) = self.challenge.as_mut() {
            challenge.expire();
        }
        self.state = HandshakeState::Rejected(cause);
        cause
    }

    pub fn expire(&mut self) -> AuthError {
        self.reject(AuthError::Timeout)
    }
}
