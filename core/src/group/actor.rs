//! The coordinator task: sole writer of group state

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::auth::{JoinApprover, TrustStore};
use crate::config::Config;
use crate::device::{Device, LocalIdentity};
use crate::discovery::DiscoveryEvent;
use crate::error::ConnectError;
use crate::group::history::ClipboardSnapshot;
use crate::group::session::{
    CloseReason, Direction, Role, SessionId, SessionSettings, SessionTask,
};
use crate::group::state::{GroupState, SessionEntry, UpdateOutcome};
use crate::transport::{Connection, Transport};

/// Pause before dialing a member again after its session dropped
const REDIAL_DELAY: Duration = Duration::from_secs(1);

pub(crate) enum Command {
    Attach {
        conn: Connection,
        /// Known for outbound connections; resolved for inbound ones
        device: Option<Device>,
        direction: Direction,
    },
    Authenticated {
        id: SessionId,
    },
    Update {
        id: SessionId,
        mime_type: String,
        data: Vec<u8>,
    },
    Flushed {
        id: SessionId,
        seq: u64,
    },
    Closed {
        id: SessionId,
        reason: CloseReason,
    },
    Publish {
        mime_type: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Option<u64>>,
    },
    Discovery(DiscoveryEvent),
    DialFailed {
        device: Device,
        error: ConnectError,
    },
    Members(oneshot::Sender<Vec<Device>>),
    Discovered(oneshot::Sender<Vec<Device>>),
    Snapshot(oneshot::Sender<Option<ClipboardSnapshot>>),
    History(oneshot::Sender<Vec<ClipboardSnapshot>>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct Actor {
    state: GroupState,
    identity: LocalIdentity,
    local_port: u16,
    settings: SessionSettings,
    outbox_capacity: usize,
    auto_connect: bool,
    transport: Arc<dyn Transport>,
    trust: Arc<dyn TrustStore>,
    approver: Arc<dyn JoinApprover>,
    commands: mpsc::UnboundedSender<Command>,
    sessions: JoinSet<()>,
    dials: JoinSet<()>,
    dialing: HashSet<Device>,
}

pub(crate) struct ActorParts {
    pub state: GroupState,
    pub identity: LocalIdentity,
    pub local_port: u16,
    pub transport: Arc<dyn Transport>,
    pub trust: Arc<dyn TrustStore>,
    pub approver: Arc<dyn JoinApprover>,
    pub commands: mpsc::UnboundedSender<Command>,
}

impl Actor {
    pub fn new(config: &Config, parts: ActorParts) -> Self {
        Self {
            state: parts.state,
            identity: parts.identity,
            local_port: parts.local_port,
            settings: SessionSettings::from(config),
            outbox_capacity: config.outbox_capacity,
            auto_connect: config.auto_connect,
            transport: parts.transport,
            trust: parts.trust,
            approver: parts.approver,
            commands: parts.commands,
            sessions: JoinSet::new(),
            dials: JoinSet::new(),
            dialing: HashSet::new(),
        }
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown(done)) => {
                            self.shutdown().await;
                            let _ = done.send(());
                            return;
                        }
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("session task panicked: {}", e);
                        }
                    }
                }
                Some(_) = self.dials.join_next(), if !self.dials.is_empty() => {}
            }
        }
        self.shutdown().await;
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Attach {
                conn,
                device,
                direction,
            } => self.attach(conn, device, direction),
            Command::Authenticated { id } => {
                self.state.promote(id);
            }
            Command::Update {
                id,
                mime_type,
                data,
            } => match self.state.accept_update(id, mime_type, data) {
                UpdateOutcome::Accepted { seq, recipients } => {
                    tracing::debug!("update {} from session {} relayed to {} peers", seq, id, recipients);
                }
                outcome => tracing::debug!("update from session {} dropped: {:?}", id, outcome),
            },
            Command::Flushed { id, seq } => self.state.flushed(&id, seq),
            Command::Closed { id, reason } => {
                let left = self.state.remove(&id, &reason);
                // Still advertised means the link dropped, not the peer
                if let Some(device) = left.and_then(|d| self.state.discovered_device(&d)) {
                    self.maybe_dial(device, REDIAL_DELAY);
                }
            }
            Command::Publish {
                mime_type,
                data,
                reply,
            } => {
                let _ = reply.send(self.state.publish_local(mime_type, data));
            }
            Command::Discovery(event) => {
                if let Some(device) = self.state.on_discovery(event, &self.identity, self.local_port) {
                    self.maybe_dial(device, Duration::ZERO);
                }
            }
            Command::DialFailed { device, error } => {
                tracing::warn!("could not connect to {}: {}", device, error);
                self.dialing.remove(&device);
            }
            Command::Members(reply) => {
                let _ = reply.send(self.state.members());
            }
            Command::Discovered(reply) => {
                let _ = reply.send(self.state.discovered());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            Command::History(reply) => {
                let _ = reply.send(self.state.history());
            }
            // Intercepted by the run loop
            Command::Shutdown(_) => {}
        }
    }

    fn attach(&mut self, conn: Connection, device: Option<Device>, direction: Direction) {
        let peer_addr = conn.peer_addr();
        let peer_fingerprint = conn.peer_fingerprint().cloned();

        let device = match device {
            Some(mut device) => {
                self.dialing.remove(&device);
                if peer_fingerprint.is_some() {
                    device.fingerprint = peer_fingerprint.clone();
                }
                device
            }
            None => self.state.resolve_inbound(peer_addr, peer_fingerprint.as_ref()),
        };

        let id = Uuid::new_v4();
        let (outbox_tx, outbox_rx) = mpsc::channel(self.outbox_capacity);
        let (kick_tx, kick_rx) = oneshot::channel();
        tracing::debug!("session {} with {} ({:?})", id, device, direction);

        self.state.attach(
            id,
            SessionEntry {
                device,
                peer_addr,
                peer_fingerprint,
                direction,
                role: Role::Unauthenticated,
                outbox: outbox_tx.clone(),
                kick: Some(kick_tx),
                in_flight: None,
            },
        );

        let task = SessionTask {
            id,
            peer: peer_addr,
            direction,
            settings: self.settings,
            trust: self.trust.clone(),
            approver: self.approver.clone(),
            commands: self.commands.clone(),
            outbox: outbox_tx,
        };
        self.sessions.spawn(task.run(conn, outbox_rx, kick_rx));
    }

    /// Dial a discovered device unless a session exists or the peer is
    /// the one expected to dial
    fn maybe_dial(&mut self, device: Device, delay: Duration) {
        if !self.auto_connect
            || !dials_first(&self.identity, self.local_port, &device)
            || self.state.has_session_for(&device)
            || !self.dialing.insert(device.clone())
        {
            return;
        }

        let transport = self.transport.clone();
        let commands = self.commands.clone();
        self.dials.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            tracing::info!("connecting to {}", device);
            let command = match transport.connect(&device).await {
                Ok(conn) => Command::Attach {
                    conn,
                    device: Some(device),
                    direction: Direction::Outbound,
                },
                Err(error) => Command::DialFailed { device, error },
            };
            let _ = commands.send(command);
        });
    }

    async fn shutdown(&mut self) {
        self.dials.abort_all();
        tracing::debug!("closing {} sessions", self.state.session_count());
        self.state.kick_all();
        while self.sessions.join_next().await.is_some() {}
        tracing::debug!("coordinator stopped");
    }
}

/// Of two nodes that discover each other, only the one whose (name, port)
/// orders first dials
pub(crate) fn dials_first(local: &LocalIdentity, local_port: u16, peer: &Device) -> bool {
    (local.display_name.as_str(), local_port) < (peer.display_name.as_str(), peer.port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_side_dials() {
        let a = LocalIdentity::new("alpha");
        let b = LocalIdentity::new("beta");
        let ip = "10.0.0.1".parse().unwrap();

        assert!(dials_first(&a, 4000, &Device::new(ip, 4001, "beta")));
        assert!(!dials_first(&b, 4001, &Device::new(ip, 4000, "alpha")));

        // Same name, tie broken by port
        assert!(dials_first(&a, 4000, &Device::new(ip, 4001, "alpha")));
        assert!(!dials_first(&a, 4001, &Device::new(ip, 4000, "alpha")));
    }
}
