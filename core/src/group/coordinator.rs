//! Caller-facing handle to a running node

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::auth::{JoinApprover, TrustStore};
use crate::config::Config;
use crate::device::{Device, LocalIdentity};
use crate::discovery::{AdvertiseHandle, DiscoveryProvider};
use crate::error::DiscoveryError;
use crate::group::actor::{Actor, ActorParts, Command};
use crate::group::history::ClipboardSnapshot;
use crate::group::session::Direction;
use crate::group::state::GroupState;
use crate::group::GroupEvent;
use crate::protocol::Codec;
use crate::transport::{Listener, Transport};
use crate::{Error, Result};

const EVENT_BUFFER: usize = 256;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Everything the coordinator talks to
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    /// `None` runs without discovery; peers must be connected manually
    pub discovery: Option<Box<dyn DiscoveryProvider>>,
    pub trust: Arc<dyn TrustStore>,
    pub approver: Arc<dyn JoinApprover>,
}

/// A running clipboard group node
pub struct Coordinator {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<GroupEvent>,
    identity: LocalIdentity,
    local_port: u16,
    codec: Codec,
    transport: Arc<dyn Transport>,
    discovery: Option<Box<dyn DiscoveryProvider>>,
    advertisement: Option<AdvertiseHandle>,
    degraded: Option<DiscoveryError>,
    actor: JoinHandle<()>,
    accept_task: JoinHandle<()>,
    browse_task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Coordinator {
    /// Bind the listener, start discovery and begin accepting peers.
    ///
    /// Failing to bind is fatal. Discovery failing is not: the node comes up
    /// degraded and reports [`GroupEvent::DiscoveryDegraded`].
    pub async fn start(config: Config, identity: LocalIdentity, deps: Collaborators) -> Result<Self> {
        config.validate()?;

        let listener = deps
            .transport
            .bind(config.port)
            .await
            .map_err(|source| Error::Bind {
                port: config.port,
                source,
            })?;
        let local_port = listener.local_port();

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let actor = Actor::new(
            &config,
            ActorParts {
                state: GroupState::new(config.history_limit, events.clone()),
                identity: identity.clone(),
                local_port,
                transport: deps.transport.clone(),
                trust: deps.trust,
                approver: deps.approver,
                commands: commands.clone(),
            },
        );
        let actor = tokio::spawn(actor.run(commands_rx));
        let accept_task = tokio::spawn(accept_loop(listener, commands.clone()));

        let mut advertisement = None;
        let mut browse_task = None;
        let mut degraded = None;
        if let Some(provider) = &deps.discovery {
            match provider.advertise(&identity.display_name, local_port) {
                Ok(handle) => advertisement = Some(handle),
                Err(e) => degraded = Some(e),
            }
            match provider.browse() {
                Ok(mut discovered) => {
                    let commands = commands.clone();
                    browse_task = Some(tokio::spawn(async move {
                        while let Some(event) = discovered.recv().await {
                            if commands.send(Command::Discovery(event)).is_err() {
                                break;
                            }
                        }
                    }));
                }
                Err(e) => degraded = degraded.or(Some(e)),
            }
        }
        if let Some(e) = &degraded {
            tracing::warn!("discovery unavailable, manual connections only: {}", e);
            let _ = events.send(GroupEvent::DiscoveryDegraded(e.clone()));
        }

        tracing::info!("{} listening on port {}", identity.display_name, local_port);

        Ok(Self {
            commands,
            events,
            identity,
            local_port,
            codec: config.codec(),
            transport: deps.transport,
            discovery: deps.discovery,
            advertisement,
            degraded,
            actor,
            accept_task,
            browse_task,
            stopped: false,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GroupEvent> {
        self.events.subscribe()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Port the listener is bound to
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Why discovery is not running, if it is not
    pub fn discovery_degraded(&self) -> Option<&DiscoveryError> {
        self.degraded.as_ref()
    }

    /// Connect to a device directly.
    ///
    /// Returns once the connection is open; the device joins after the
    /// handshake completes.
    pub async fn connect(&self, device: Device) -> Result<()> {
        let conn = self.transport.connect(&device).await?;
        self.commands
            .send(Command::Attach {
                conn,
                device: Some(device),
                direction: Direction::Outbound,
            })
            .map_err(|_| Error::Stopped)
    }

    /// Publish a local clipboard change to the group.
    ///
    /// Returns the sequence number assigned, or `None` when the content
    /// already is the group's current clipboard. Content peers could not
    /// decode is refused with [`Error::PayloadTooLarge`] and not recorded.
    pub async fn publish(&self, mime_type: impl Into<String>, data: Vec<u8>) -> Result<Option<u64>> {
        let mime_type = mime_type.into();
        check_payload(&self.codec, "mime type", mime_type.len())?;
        check_payload(&self.codec, "clipboard data", data.len())?;

        self.request(|reply| Command::Publish {
            mime_type,
            data,
            reply,
        })
        .await
    }

    /// Authenticated members
    pub async fn members(&self) -> Result<Vec<Device>> {
        self.request(Command::Members).await
    }

    /// Devices discovery currently reports
    pub async fn discovered(&self) -> Result<Vec<Device>> {
        self.request(Command::Discovered).await
    }

    /// Current clipboard value
    pub async fn snapshot(&self) -> Result<Option<ClipboardSnapshot>> {
        self.request(Command::Snapshot).await
    }

    /// Recent clipboard values, oldest first
    pub async fn history(&self) -> Result<Vec<ClipboardSnapshot>> {
        self.request(Command::History).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply)).map_err(|_| Error::Stopped)?;
        response.await.map_err(|_| Error::Stopped)
    }

    /// Stop discovery, close every session and wait for them to finish
    pub async fn shutdown(mut self) -> Result<()> {
        self.stopped = true;

        if let Some(task) = self.browse_task.take() {
            task.abort();
        }
        if let Some(provider) = self.discovery.take() {
            if let Err(e) = provider.stop_browsing() {
                tracing::debug!("stop browsing: {}", e);
            }
            if let Some(handle) = self.advertisement.take() {
                if let Err(e) = provider.stop_advertising(handle) {
                    tracing::warn!("failed to withdraw advertisement: {}", e);
                }
            }
        }

        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;

        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).is_ok() {
            let _ = finished.await;
        }
        let _ = (&mut self.actor).await;

        tracing::info!("{} stopped", self.identity.display_name);
        Ok(())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        self.accept_task.abort();
        if let Some(task) = &self.browse_task {
            task.abort();
        }
        let (done, _) = oneshot::channel();
        let _ = self.commands.send(Command::Shutdown(done));
    }
}

/// Every field must fit the peers' decode limit and a `u32` length prefix
fn check_payload(codec: &Codec, field: &'static str, size: usize) -> Result<()> {
    let max = codec.max_payload().min(u32::MAX as usize);
    if size > max {
        return Err(Error::PayloadTooLarge { field, size, max });
    }
    Ok(())
}

async fn accept_loop(mut listener: Box<dyn Listener>, commands: mpsc::UnboundedSender<Command>) {
    loop {
        match listener.accept().await {
            Ok(conn) => {
                tracing::debug!("incoming connection from {}", conn.peer_addr());
                let attach = Command::Attach {
                    conn,
                    device: None,
                    direction: Direction::Inbound,
                };
                if commands.send(attach).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("accept error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
