//! Membership table and clipboard state owned by the coordinator task

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::device::{Device, Fingerprint, LocalIdentity};
use crate::discovery::DiscoveryEvent;
use crate::group::history::{ClipboardHistory, ClipboardSnapshot, ContentHash, UpdateOrigin};
use crate::group::session::{CloseReason, Direction, Outgoing, Role, SessionId};
use crate::group::GroupEvent;
use crate::protocol::Packet;

pub(crate) struct SessionEntry {
    pub device: Device,
    pub peer_addr: SocketAddr,
    pub peer_fingerprint: Option<Fingerprint>,
    pub direction: Direction,
    pub role: Role,
    pub outbox: mpsc::Sender<Outgoing>,
    pub kick: Option<oneshot::Sender<()>>,
    /// Newest clipboard sequence queued to this peer but not yet written
    pub in_flight: Option<u64>,
}

impl SessionEntry {
    fn kick(&mut self) {
        if let Some(kick) = self.kick.take() {
            let _ = kick.send(());
        }
    }
}

/// What happened to a clipboard update received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UpdateOutcome {
    Accepted { seq: u64, recipients: usize },
    /// Same content as the current clipboard
    Echo,
    /// We are still sending this peer a newer value
    Stale,
    Unauthenticated,
    UnknownSession,
}

pub(crate) struct GroupState {
    sessions: HashMap<SessionId, SessionEntry>,
    members: HashMap<Device, SessionId>,
    discovered: HashSet<Device>,
    history: ClipboardHistory,
    events: broadcast::Sender<GroupEvent>,
}

impl GroupState {
    pub fn new(history_limit: usize, events: broadcast::Sender<GroupEvent>) -> Self {
        Self {
            sessions: HashMap::new(),
            members: HashMap::new(),
            discovered: HashSet::new(),
            history: ClipboardHistory::new(history_limit),
            events,
        }
    }

    fn emit(&self, event: GroupEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn attach(&mut self, id: SessionId, entry: SessionEntry) {
        self.sessions.insert(id, entry);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// A live session (authenticated or not) exists for the device
    pub fn has_session_for(&self, device: &Device) -> bool {
        self.members.contains_key(device) || self.sessions.values().any(|e| &e.device == device)
    }

    /// Match an inbound connection to what discovery knows about its sender.
    ///
    /// A certificate already seen on a member session keeps that member's
    /// identity, so an undiscovered peer reconnecting replaces itself.
    pub fn resolve_inbound(&self, addr: SocketAddr, fingerprint: Option<&Fingerprint>) -> Device {
        if let Some(fp) = fingerprint {
            let known = self
                .discovered
                .iter()
                .chain(self.members.keys())
                .find(|d| d.fingerprint.as_ref() == Some(fp));
            if let Some(device) = known {
                return device.clone();
            }
        }

        let mut at_address = self.discovered.iter().filter(|d| d.address == addr.ip());
        let mut device = match (at_address.next(), at_address.next()) {
            (Some(device), None) => device.clone(),
            _ => Device::anonymous(addr),
        };
        if fingerprint.is_some() {
            device.fingerprint = fingerprint.cloned();
        }
        device
    }

    /// Make an authenticated session the device's member session.
    ///
    /// A previous session for the same device is closed.
    pub fn promote(&mut self, id: SessionId) -> bool {
        let refreshed = match self.sessions.get(&id) {
            Some(entry) if entry.role == Role::Unauthenticated => {
                match entry.direction {
                    // Discovery may have caught up since the connection arrived
                    Direction::Inbound => Some(
                        self.resolve_inbound(entry.peer_addr, entry.peer_fingerprint.as_ref()),
                    ),
                    Direction::Outbound => None,
                }
            }
            _ => return false,
        };

        let Some(entry) = self.sessions.get_mut(&id) else {
            return false;
        };
        if let Some(device) = refreshed {
            entry.device = device;
        }
        entry.role = Role::Authenticated;
        let device = entry.device.clone();

        if let Some(previous) = self.members.insert(device.clone(), id) {
            if let Some(mut old) = self.sessions.remove(&previous) {
                tracing::info!("{} reconnected, replacing session {}", device, previous);
                old.kick();
            }
        }

        tracing::info!("{} joined the group", device);
        self.emit(GroupEvent::DeviceJoined(device));
        true
    }

    /// Drop a finished session; returns the member that left, if any
    pub fn remove(&mut self, id: &SessionId, reason: &CloseReason) -> Option<Device> {
        let entry = self.sessions.remove(id)?;

        if self.members.get(&entry.device) == Some(id) {
            self.members.remove(&entry.device);
            tracing::info!("{} left the group", entry.device);
            self.emit(GroupEvent::DeviceLeft(entry.device.clone()));
            return Some(entry.device);
        }

        if let (Role::Unauthenticated, CloseReason::Auth(cause)) = (entry.role, reason) {
            tracing::warn!("authentication with {} failed: {}", entry.device, cause);
            self.emit(GroupEvent::AuthenticationFailed {
                device: entry.device,
                cause: *cause,
            });
        }
        None
    }

    /// Close every session
    pub fn kick_all(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(entry) = self.sessions.get_mut(&id) {
                entry.kick();
            }
            self.remove(&id, &CloseReason::Kicked);
        }
    }

    /// A peer sent us its clipboard
    pub fn accept_update(&mut self, id: SessionId, mime_type: String, data: Vec<u8>) -> UpdateOutcome {
        let Some(entry) = self.sessions.get(&id) else {
            return UpdateOutcome::UnknownSession;
        };
        if entry.role != Role::Authenticated {
            return UpdateOutcome::Unauthenticated;
        }
        if self.history.is_current(&ContentHash::of(&mime_type, &data)) {
            return UpdateOutcome::Echo;
        }
        if entry.in_flight.is_some() {
            return UpdateOutcome::Stale;
        }

        let device = entry.device.clone();
        let snapshot = self.history.record(mime_type, data, UpdateOrigin::Remote(device));
        let recipients = self.fan_out(&snapshot, Some(id));
        self.emit_update(&snapshot);
        UpdateOutcome::Accepted {
            seq: snapshot.seq,
            recipients,
        }
    }

    /// The local clipboard changed; `None` when it already is the current value
    pub fn publish_local(&mut self, mime_type: String, data: Vec<u8>) -> Option<u64> {
        if self.history.is_current(&ContentHash::of(&mime_type, &data)) {
            return None;
        }
        let snapshot = self.history.record(mime_type, data, UpdateOrigin::Local);
        let recipients = self.fan_out(&snapshot, None);
        tracing::debug!("local update {} sent to {} peers", snapshot.seq, recipients);
        self.emit_update(&snapshot);
        Some(snapshot.seq)
    }

    fn emit_update(&self, snapshot: &ClipboardSnapshot) {
        self.emit(GroupEvent::ClipboardUpdated {
            seq: snapshot.seq,
            mime_type: snapshot.mime_type.clone(),
            data: snapshot.data.clone(),
            origin: snapshot.origin.clone(),
        });
    }

    /// Queue the snapshot to every member except `except`
    fn fan_out(&mut self, snapshot: &ClipboardSnapshot, except: Option<SessionId>) -> usize {
        let packet = Packet::SyncRequest {
            mime_type: snapshot.mime_type.clone(),
            data: snapshot.data.to_vec(),
        };
        let frame: std::sync::Arc<[u8]> = packet.encode().into();

        let Self {
            members, sessions, ..
        } = self;
        let mut delivered = 0;
        for (device, id) in members.iter() {
            if Some(*id) == except {
                continue;
            }
            let Some(entry) = sessions.get_mut(id) else {
                continue;
            };
            let outgoing = Outgoing {
                frame: frame.clone(),
                seq: Some(snapshot.seq),
            };
            match entry.outbox.try_send(outgoing) {
                Ok(()) => {
                    entry.in_flight = Some(snapshot.seq);
                    delivered += 1;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("{} is not keeping up, dropped update {}", device, snapshot.seq);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("{} is closing, skipped update {}", device, snapshot.seq);
                }
            }
        }
        delivered
    }

    /// A session finished writing the frame carrying `seq`
    pub fn flushed(&mut self, id: &SessionId, seq: u64) {
        if let Some(entry) = self.sessions.get_mut(id) {
            if entry.in_flight == Some(seq) {
                entry.in_flight = None;
            }
        }
    }

    /// Apply a discovery hint. Returns a device worth dialing.
    pub fn on_discovery(
        &mut self,
        event: DiscoveryEvent,
        local: &LocalIdentity,
        local_port: u16,
    ) -> Option<Device> {
        match event {
            DiscoveryEvent::DeviceAdded(device) => {
                if local.is_self(&device, local_port) {
                    return None;
                }
                match self.discovered.get(&device) {
                    Some(known) if known.fingerprint == device.fingerprint => {}
                    Some(_) => {
                        // Same device, new certificate
                        self.discovered.replace(device.clone());
                    }
                    None => {
                        tracing::info!("discovered {}", device);
                        self.discovered.insert(device.clone());
                        self.emit(GroupEvent::DeviceDiscovered(device.clone()));
                    }
                }
                // Refreshes for a peer whose session ended offer it again
                (!self.has_session_for(&device)).then_some(device)
            }
            DiscoveryEvent::DeviceRemoved(device) => {
                if self.discovered.remove(&device) {
                    tracing::info!("lost {}", device);
                    self.emit(GroupEvent::DeviceLost(device));
                }
                None
            }
        }
    }

    /// The discovered record for `device`, if discovery still reports it
    pub fn discovered_device(&self, device: &Device) -> Option<Device> {
        self.discovered.get(device).cloned()
    }

    pub fn members(&self) -> Vec<Device> {
        let mut members: Vec<Device> = self.members.keys().cloned().collect();
        members.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.port.cmp(&b.port)));
        members
    }

    pub fn discovered(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.discovered.iter().cloned().collect();
        devices.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.port.cmp(&b.port)));
        devices
    }

    pub fn snapshot(&self) -> Option<ClipboardSnapshot> {
        self.history.current().cloned()
    }

    pub fn history(&self) -> Vec<ClipboardSnapshot> {
        self.history.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use uuid::Uuid;

    struct Peer {
        id: SessionId,
        outbox: mpsc::Receiver<Outgoing>,
        kicked: oneshot::Receiver<()>,
    }

    fn state() -> (GroupState, broadcast::Receiver<GroupEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (GroupState::new(10, tx), rx)
    }

    fn device(name: &str, port: u16) -> Device {
        Device::new("10.0.0.9".parse().unwrap(), port, name)
    }

    fn attach(state: &mut GroupState, device: Device, capacity: usize) -> Peer {
        let id = Uuid::new_v4();
        let (tx, outbox) = mpsc::channel(capacity);
        let (kick, kicked) = oneshot::channel();
        state.attach(
            id,
            SessionEntry {
                peer_addr: device.socket_addr(),
                device,
                peer_fingerprint: None,
                direction: Direction::Outbound,
                role: Role::Unauthenticated,
                outbox: tx,
                kick: Some(kick),
                in_flight: None,
            },
        );
        Peer { id, outbox, kicked }
    }

    fn attach_inbound(state: &mut GroupState, from: &str, fp: &Fingerprint) -> Peer {
        let peer_addr: SocketAddr = from.parse().unwrap();
        let device = state.resolve_inbound(peer_addr, Some(fp));
        let id = Uuid::new_v4();
        let (tx, outbox) = mpsc::channel(8);
        let (kick, kicked) = oneshot::channel();
        state.attach(
            id,
            SessionEntry {
                device,
                peer_addr,
                peer_fingerprint: Some(fp.clone()),
                direction: Direction::Inbound,
                role: Role::Unauthenticated,
                outbox: tx,
                kick: Some(kick),
                in_flight: None,
            },
        );
        Peer { id, outbox, kicked }
    }

    fn join(state: &mut GroupState, device: Device) -> Peer {
        let peer = attach(state, device, 8);
        assert!(state.promote(peer.id));
        peer
    }

    fn sync_frame(mime: &str, data: &[u8]) -> Vec<u8> {
        Packet::SyncRequest {
            mime_type: mime.to_string(),
            data: data.to_vec(),
        }
        .encode()
    }

    #[tokio::test]
    async fn test_promote_emits_joined() {
        let (mut state, mut events) = state();
        let peer = attach(&mut state, device("b", 1), 8);
        assert!(state.members().is_empty());

        assert!(state.promote(peer.id));
        assert!(!state.promote(peer.id));
        assert_eq!(state.members(), vec![device("b", 1)]);
        assert!(matches!(events.recv().await.unwrap(), GroupEvent::DeviceJoined(d) if d == device("b", 1)));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let (mut state, _events) = state();
        let first = join(&mut state, device("b", 1));
        let second = join(&mut state, device("b", 1));

        assert_eq!(state.members().len(), 1);
        assert_eq!(state.session_count(), 1);
        assert!(first.kicked.await.is_ok());

        // The replaced session reporting its close is not a departure
        assert_eq!(state.remove(&first.id, &CloseReason::Kicked), None);
        assert_eq!(state.members().len(), 1);
        assert_eq!(state.remove(&second.id, &CloseReason::Idle), Some(device("b", 1)));
        assert!(state.members().is_empty());
    }

    #[tokio::test]
    async fn test_update_fans_out_to_everyone_but_origin() {
        let (mut state, _events) = state();
        let mut b = join(&mut state, device("b", 1));
        let mut c = join(&mut state, device("c", 2));
        let mut d = join(&mut state, device("d", 3));

        let outcome = state.accept_update(b.id, "text/plain".into(), b"hello".to_vec());
        assert_eq!(outcome, UpdateOutcome::Accepted { seq: 1, recipients: 2 });

        let expected = sync_frame("text/plain", b"hello");
        assert_eq!(&*c.outbox.try_recv().unwrap().frame, &expected[..]);
        assert_eq!(&*d.outbox.try_recv().unwrap().frame, &expected[..]);
        assert!(b.outbox.try_recv().is_err());

        let current = state.snapshot().unwrap();
        assert_eq!(current.origin, UpdateOrigin::Remote(device("b", 1)));
    }

    #[tokio::test]
    async fn test_local_publish_reaches_members_only() {
        let (mut state, mut events) = state();
        let mut b = join(&mut state, device("b", 1));
        let mut pending = attach(&mut state, device("x", 9), 8);
        let _ = events.recv().await;

        assert_eq!(state.publish_local("text/plain".into(), b"mine".to_vec()), Some(1));
        assert_eq!(b.outbox.try_recv().unwrap().seq, Some(1));
        assert!(pending.outbox.try_recv().is_err());

        match events.recv().await.unwrap() {
            GroupEvent::ClipboardUpdated { origin, data, .. } => {
                assert_eq!(origin, UpdateOrigin::Local);
                assert_eq!(&*data, b"mine");
            }
            other => panic!("unexpected {:?}", other),
        }

        // Same content again is not a new update
        assert_eq!(state.publish_local("text/plain".into(), b"mine".to_vec()), None);
    }

    #[tokio::test]
    async fn test_echo_is_suppressed() {
        let (mut state, _events) = state();
        let b = join(&mut state, device("b", 1));
        let mut c = join(&mut state, device("c", 2));

        state.publish_local("text/plain".into(), b"x".to_vec());
        let _ = c.outbox.try_recv();
        state.flushed(&b.id, 1);

        assert_eq!(
            state.accept_update(b.id, "text/plain".into(), b"x".to_vec()),
            UpdateOutcome::Echo
        );
        assert_eq!(state.history().len(), 1);
        assert!(c.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_racing_our_broadcast_is_stale() {
        let (mut state, _events) = state();
        let b = join(&mut state, device("b", 1));

        state.publish_local("text/plain".into(), b"newer".to_vec());
        assert_eq!(
            state.accept_update(b.id, "text/plain".into(), b"older".to_vec()),
            UpdateOutcome::Stale
        );

        state.flushed(&b.id, 1);
        assert!(matches!(
            state.accept_update(b.id, "text/plain".into(), b"later".to_vec()),
            UpdateOutcome::Accepted { seq: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_unauthenticated_updates_are_dropped() {
        let (mut state, _events) = state();
        let pending = attach(&mut state, device("x", 9), 8);
        assert_eq!(
            state.accept_update(pending.id, "text/plain".into(), b"sneaky".to_vec()),
            UpdateOutcome::Unauthenticated
        );
        assert_eq!(
            state.accept_update(Uuid::new_v4(), "text/plain".into(), b"?".to_vec()),
            UpdateOutcome::UnknownSession
        );
        assert!(state.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_full_outbox_drops_for_that_peer_only() {
        let (mut state, _events) = state();
        let slow = attach(&mut state, device("slow", 1), 1);
        state.promote(slow.id);
        let mut fast = join(&mut state, device("fast", 2));

        state.publish_local("text/plain".into(), b"1".to_vec());
        state.publish_local("text/plain".into(), b"2".to_vec());

        assert_eq!(fast.outbox.try_recv().unwrap().seq, Some(1));
        assert_eq!(fast.outbox.try_recv().unwrap().seq, Some(2));
        assert_eq!(state.snapshot().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_failed_handshake_is_reported() {
        let (mut state, mut events) = state();
        let peer = attach(&mut state, device("x", 9), 8);

        assert_eq!(state.remove(&peer.id, &CloseReason::Auth(AuthError::Mismatch)), None);
        match events.recv().await.unwrap() {
            GroupEvent::AuthenticationFailed { cause, .. } => assert_eq!(cause, AuthError::Mismatch),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discovery_is_idempotent() {
        let (mut state, mut events) = state();
        let me = LocalIdentity::new("me");
        let b = device("b", 1);

        assert_eq!(
            state.on_discovery(DiscoveryEvent::DeviceAdded(b.clone()), &me, 4000),
            Some(b.clone())
        );
        // Still worth dialing, but nothing new to report
        assert_eq!(
            state.on_discovery(DiscoveryEvent::DeviceAdded(b.clone()), &me, 4000),
            Some(b.clone())
        );
        assert_eq!(state.discovered(), vec![b.clone()]);

        state.on_discovery(DiscoveryEvent::DeviceRemoved(b.clone()), &me, 4000);
        state.on_discovery(DiscoveryEvent::DeviceRemoved(b.clone()), &me, 4000);
        assert!(state.discovered().is_empty());

        assert!(matches!(events.recv().await.unwrap(), GroupEvent::DeviceDiscovered(_)));
        assert!(matches!(events.recv().await.unwrap(), GroupEvent::DeviceLost(_)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_offers_peer_again_once_its_session_ends() {
        let (mut state, _events) = state();
        let me = LocalIdentity::new("me");
        let b = device("b", 1);
        state.on_discovery(DiscoveryEvent::DeviceAdded(b.clone()), &me, 4000);

        let session = join(&mut state, b.clone());
        assert_eq!(state.on_discovery(DiscoveryEvent::DeviceAdded(b.clone()), &me, 4000), None);

        assert_eq!(state.remove(&session.id, &CloseReason::Idle), Some(b.clone()));
        assert_eq!(state.discovered_device(&b), Some(b.clone()));
        assert_eq!(
            state.on_discovery(DiscoveryEvent::DeviceAdded(b.clone()), &me, 4000),
            Some(b.clone())
        );
        assert_eq!(state.discovered(), vec![b]);
    }

    #[tokio::test]
    async fn test_reconnecting_certificate_keeps_identity() {
        let (mut state, mut events) = state();
        let fp = Fingerprint::new("cert-b");

        let first = attach_inbound(&mut state, "10.0.0.2:61000", &fp);
        assert!(state.promote(first.id));
        let joined = state.members();
        assert_eq!(joined.len(), 1);

        let second = attach_inbound(&mut state, "10.0.0.2:61001", &fp);
        assert!(state.promote(second.id));
        assert_eq!(state.members(), joined);
        assert_eq!(state.session_count(), 1);
        assert!(first.kicked.await.is_ok());

        assert!(matches!(events.recv().await.unwrap(), GroupEvent::DeviceJoined(_)));
        assert!(matches!(events.recv().await.unwrap(), GroupEvent::DeviceJoined(_)));
        assert_eq!(state.remove(&first.id, &CloseReason::Kicked), None);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_own_advertisement_is_ignored() {
        let (mut state, _events) = state();
        let me = LocalIdentity::new("me");
        let own = Device::new("127.0.0.1".parse().unwrap(), 4000, "me");
        assert_eq!(state.on_discovery(DiscoveryEvent::DeviceAdded(own), &me, 4000), None);
        assert!(state.discovered().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_resolution() {
        let (mut state, _events) = state();
        let me = LocalIdentity::new("me");
        let fp = Fingerprint::new("fp-b");
        let b = Device::new("10.0.0.2".parse().unwrap(), 5000, "b").with_fingerprint(fp.clone());
        state.on_discovery(DiscoveryEvent::DeviceAdded(b.clone()), &me, 4000);

        let from_b: SocketAddr = "10.0.0.2:61000".parse().unwrap();
        assert_eq!(state.resolve_inbound(from_b, None), b);
        assert_eq!(state.resolve_inbound("10.0.0.7:61000".parse().unwrap(), Some(&fp)), b);

        let unknown: SocketAddr = "10.0.0.3:61000".parse().unwrap();
        assert_eq!(state.resolve_inbound(unknown, None), Device::anonymous(unknown));
    }

    #[tokio::test]
    async fn test_kick_all_empties_group() {
        let (mut state, _events) = state();
        let b = join(&mut state, device("b", 1));
        let _pending = attach(&mut state, device("x", 9), 8);

        state.kick_all();
        assert_eq!(state.session_count(), 0);
        assert!(state.members().is_empty());
        assert!(b.kicked.await.is_ok());
    }
}
