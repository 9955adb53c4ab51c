//! Service discovery for finding peers on the local network
//!
//! Backends implement [`DiscoveryProvider`]; the coordinator only consumes
//! the trait. Event streams may repeat or reorder events, so consumers must
//! treat them as hints.

mod mdns;
mod memory;

use std::net::IpAddr;

use tokio::sync::mpsc;

use crate::config::{Config, DiscoveryBackend};
use crate::device::{Device, LocalIdentity};
use crate::error::DiscoveryError;

pub use mdns::MdnsDiscovery;
pub use memory::{MemoryDiscovery, MemoryNetwork};

/// Event from a discovery backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceAdded(Device),
    DeviceRemoved(Device),
}

/// Token for a running advertisement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdvertiseHandle(pub(crate) String);

impl AdvertiseHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

pub trait DiscoveryProvider: Send + Sync {
    /// Advertise this node under `service_name` on `port`
    fn advertise(&self, service_name: &str, port: u16) -> Result<AdvertiseHandle, DiscoveryError>;

    fn stop_advertising(&self, handle: AdvertiseHandle) -> Result<(), DiscoveryError>;

    /// Start browsing; events arrive until [`stop_browsing`](Self::stop_browsing)
    fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError>;

    fn stop_browsing(&self) -> Result<(), DiscoveryError>;
}

/// Build the backend selected in the configuration
pub fn from_config(
    config: &Config,
    identity: &LocalIdentity,
) -> Result<Option<Box<dyn DiscoveryProvider>>, DiscoveryError> {
    match config.discovery {
        DiscoveryBackend::Mdns => {
            let provider = MdnsDiscovery::new(&config.service_type, identity.fingerprint.clone())?;
            Ok(Some(Box::new(provider)))
        }
        DiscoveryBackend::None => Ok(None),
    }
}

/// Get local IP addresses (non-loopback)
pub fn get_local_ips() -> Vec<IpAddr> {
    let mut ips = Vec::new();

    if let Ok(interfaces) = get_if_addrs::get_if_addrs() {
        for iface in interfaces {
            if !iface.is_loopback() {
                ips.push(iface.ip());
            }
        }
    }

    ips
}
