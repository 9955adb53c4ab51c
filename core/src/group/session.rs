//! Per-connection session task
//!
//! A session runs the handshake, answers keepalives and forwards clipboard
//! updates to the coordinator. It never touches group state directly; all
//! it knows about the group arrives through its outbox.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, Instant};
use uuid::Uuid;

use crate::auth::{Handshake, JoinApprover, TrustStore};
use crate::config::Config;
use crate::device::Fingerprint;
use crate::error::{AuthError, DecodeError, TransportError};
use crate::group::actor::Command;
use crate::protocol::{Codec, Packet};
use crate::transport::{Connection, ConnectionWriter, RecvError};

pub(crate) type SessionId = Uuid;

/// How long queued frames get to drain once a session closes
const WRITER_DRAIN: Duration = Duration::from_secs(1);
const INBOUND_BUFFER: usize = 16;

type Decision = Pin<Box<dyn Future<Output = bool> + Send>>;
type Received = Result<Option<Packet>, RecvError>;

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Unauthenticated,
    Authenticated,
}

/// An encoded frame queued for one peer
#[derive(Debug, Clone)]
pub(crate) struct Outgoing {
    pub frame: Arc<[u8]>,
    /// Clipboard sequence carried by the frame, reported back once written
    pub seq: Option<u64>,
}

impl Outgoing {
    pub fn control(packet: &Packet) -> Self {
        Self {
            frame: packet.encode().into(),
            seq: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Auth(AuthError),
    Decode(DecodeError),
    Transport(TransportError),
    Idle,
    Kicked,
    PeerReportedInvalid,
    ProtocolViolation(&'static str),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Auth(e) => write!(f, "authentication failed: {}", e),
            CloseReason::Decode(e) => write!(f, "undecodable packet: {}", e),
            CloseReason::Transport(e) => write!(f, "{}", e),
            CloseReason::Idle => write!(f, "idle timeout"),
            CloseReason::Kicked => write!(f, "closed by coordinator"),
            CloseReason::PeerReportedInvalid => write!(f, "peer reported an invalid packet"),
            CloseReason::ProtocolViolation(what) => write!(f, "protocol violation: {}", what),
        }
    }
}

/// Timing and size limits a session runs under
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionSettings {
    pub codec: Codec,
    pub handshake_timeout: Duration,
    pub decision_timeout: Duration,
    pub idle_timeout: Duration,
    pub ping_interval: Duration,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            codec: config.codec(),
            handshake_timeout: config.handshake_timeout(),
            decision_timeout: config.decision_timeout(),
            idle_timeout: config.idle_timeout(),
            ping_interval: config.ping_interval(),
        }
    }
}

pub(crate) struct SessionTask {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub direction: Direction,
    pub settings: SessionSettings,
    pub trust: Arc<dyn TrustStore>,
    pub approver: Arc<dyn JoinApprover>,
    pub commands: mpsc::UnboundedSender<Command>,
    pub outbox: mpsc::Sender<Outgoing>,
}

struct Channels {
    frames: mpsc::Receiver<Received>,
    kick: oneshot::Receiver<()>,
    writer_failed: oneshot::Receiver<TransportError>,
}

impl SessionTask {
    pub async fn run(
        self,
        conn: Connection,
        outbox: mpsc::Receiver<Outgoing>,
        kick: oneshot::Receiver<()>,
    ) {
        let local_fp = conn.local_fingerprint().cloned();
        let peer_fp = conn.peer_fingerprint().cloned();
        let (mut reader, writer) = conn.into_split();

        // Reads happen on their own task so a half-read frame is never
        // dropped by the select loop below.
        let (frames_tx, frames) = mpsc::channel(INBOUND_BUFFER);
        let codec = self.settings.codec;
        let reader_task = tokio::spawn(async move {
            loop {
                let received = reader.recv(&codec).await;
                let last = !matches!(received, Ok(Some(_)));
                if frames_tx.send(received).await.is_err() || last {
                    break;
                }
            }
        });

        let (close_tx, close_rx) = oneshot::channel();
        let (failed_tx, writer_failed) = oneshot::channel();
        let mut writer_task = tokio::spawn(write_loop(
            self.id,
            writer,
            outbox,
            close_rx,
            failed_tx,
            self.commands.clone(),
        ));

        let mut channels = Channels {
            frames,
            kick,
            writer_failed,
        };
        let reason = self.drive(&mut channels, local_fp, peer_fp).await;

        reader_task.abort();
        let _ = close_tx.send(());
        if timeout(WRITER_DRAIN, &mut writer_task).await.is_err() {
            writer_task.abort();
        }

        match &reason {
            CloseReason::Kicked | CloseReason::Transport(TransportError::Closed) => {
                tracing::debug!("session {} with {} ended: {}", self.id, self.peer, reason)
            }
            _ => tracing::info!("session {} with {} ended: {}", self.id, self.peer, reason),
        }
        let _ = self.commands.send(Command::Closed {
            id: self.id,
            reason,
        });
    }

    async fn drive(
        &self,
        channels: &mut Channels,
        local_fp: Option<Fingerprint>,
        peer_fp: Option<Fingerprint>,
    ) -> CloseReason {
        let settings = self.settings;
        let mut handshake = Handshake::new(settings.handshake_timeout);
        if let Some(challenge) = handshake.issue() {
            if let Err(reason) = self.send(&challenge) {
                return reason;
            }
        }

        let mut decision: Option<Decision> = None;
        let mut decision_deadline = far_future();
        let mut last_received = Instant::now();
        let mut last_ping = Instant::now();
        // Our keepalive is out and the peer has not pinged since
        let mut awaiting_ack = false;

        loop {
            let response_deadline = handshake.response_deadline();

            tokio::select! {
                _ = &mut channels.kick => return CloseReason::Kicked,

                failed = &mut channels.writer_failed => {
                    return CloseReason::Transport(failed.unwrap_or(TransportError::Closed));
                }

                received = channels.frames.recv() => {
                    let packet = match received {
                        Some(Ok(Some(packet))) => packet,
                        Some(Ok(None)) | None => return CloseReason::Transport(TransportError::Closed),
                        Some(Err(RecvError::Decode(e))) => {
                            let _ = self.send(&Packet::Invalid);
                            return CloseReason::Decode(e);
                        }
                        Some(Err(RecvError::Transport(e))) => return CloseReason::Transport(e),
                    };
                    last_received = Instant::now();

                    if handshake.is_authenticated() && packet.packet_type().is_handshake() {
                        return CloseReason::ProtocolViolation("handshake packet after authentication");
                    }

                    match packet {
                        Packet::Ping => {
                            // A ping crossing our keepalive acknowledges it
                            if awaiting_ack {
                                awaiting_ack = false;
                            } else {
                                if let Err(reason) = self.send(&Packet::Ping) {
                                    return reason;
                                }
                                last_ping = Instant::now();
                            }
                        }
                        Packet::ChallengeRequest { nonce } => {
                            match handshake.answer(&nonce, local_fp.as_ref()) {
                                Ok(response) => {
                                    if let Err(reason) = self.send(&response) {
                                        return reason;
                                    }
                                }
                                Err(e) => return CloseReason::Auth(handshake.reject(e)),
                            }
                        }
                        Packet::ChallengeResponse { nonce } => {
                            if let Err(e) = handshake.on_response(&nonce, peer_fp.as_ref()) {
                                return CloseReason::Auth(e);
                            }
                            if self.admit_without_asking(peer_fp.as_ref()) {
                                self.promote(&mut handshake, peer_fp.as_ref());
                            } else {
                                tracing::info!("asking whether {} may join", self.peer);
                                let approver = self.approver.clone();
                                let (address, port) = (self.peer.ip(), self.peer.port());
                                decision = Some(Box::pin(async move {
                                    approver.approve(address, port).await
                                }));
                                decision_deadline = Instant::now() + settings.decision_timeout;
                            }
                        }
                        Packet::SyncRequest { mime_type, data } => {
                            let _ = self.commands.send(Command::Update {
                                id: self.id,
                                mime_type,
                                data,
                            });
                        }
                        Packet::Invalid => return CloseReason::PeerReportedInvalid,
                    }
                }

                approved = wait_for(&mut decision), if decision.is_some() => {
                    decision = None;
                    if !approved {
                        return CloseReason::Auth(handshake.reject(AuthError::Rejected));
                    }
                    self.promote(&mut handshake, peer_fp.as_ref());
                }

                _ = sleep_until(decision_deadline), if decision.is_some() => {
                    return CloseReason::Auth(handshake.expire());
                }

                _ = sleep_until(response_deadline.unwrap_or_else(far_future)), if response_deadline.is_some() => {
                    return CloseReason::Auth(handshake.expire());
                }

                _ = sleep_until(last_received + settings.idle_timeout) => return CloseReason::Idle,

                _ = sleep_until(last_ping.max(last_received) + settings.ping_interval) => {
                    if let Err(reason) = self.send(&Packet::Ping) {
                        return reason;
                    }
                    last_ping = Instant::now();
                    awaiting_ack = true;
                }
            }
        }
    }

    /// Devices we dialed ourselves and remembered devices skip the prompt
    fn admit_without_asking(&self, peer_fp: Option<&Fingerprint>) -> bool {
        self.direction == Direction::Outbound
            || peer_fp.map(|fp| self.trust.is_trusted(fp)).unwrap_or(false)
    }

    fn promote(&self, handshake: &mut Handshake, peer_fp: Option<&Fingerprint>) {
        if handshake.approve().is_err() {
            return;
        }
        if let Some(fp) = peer_fp {
            if let Err(e) = self.trust.remember(fp.clone()) {
                tracing::warn!("failed to remember {}: {}", fp, e);
            }
        }
        let _ = self.commands.send(Command::Authenticated { id: self.id });
    }

    /// Queue a control packet behind any pending clipboard frames
    fn send(&self, packet: &Packet) -> Result<(), CloseReason> {
        match self.outbox.try_send(Outgoing::control(packet)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(CloseReason::Transport(
                TransportError::IoFailure("peer is not draining its queue".to_string()),
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(CloseReason::Transport(TransportError::Closed))
            }
        }
    }
}

async fn write_loop(
    id: SessionId,
    mut writer: ConnectionWriter,
    mut outbox: mpsc::Receiver<Outgoing>,
    mut close: oneshot::Receiver<()>,
    failed: oneshot::Sender<TransportError>,
    commands: mpsc::UnboundedSender<Command>,
) {
    loop {
        let item = tokio::select! {
            item = outbox.recv() => item,
            _ = &mut close => {
                while let Ok(item) = outbox.try_recv() {
                    if writer.send_frame(&item.frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        let Some(item) = item else { break };

        if let Err(e) = writer.send_frame(&item.frame).await {
            let _ = failed.send(e);
            return;
        }
        if let Some(seq) = item.seq {
            let _ = commands.send(Command::Flushed { id, seq });
        }
    }

    if let Err(e) = writer.close().await {
        tracing::debug!("session {} shutdown: {}", id, e);
    }
}

async fn wait_for(decision: &mut Option<Decision>) -> bool {
    match decision {
        Some(pending) => pending.await,
        None => std::future::pending().await,
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}
