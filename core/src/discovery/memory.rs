//! In-process discovery backend
//!
//! A [`MemoryNetwork`] plays the part of the multicast segment: every
//! provider created from it sees the services the others advertise. Used
//! by tests and for manually assembled groups.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::device::{Device, Fingerprint};
use crate::discovery::{AdvertiseHandle, DiscoveryEvent, DiscoveryProvider};
use crate::error::DiscoveryError;

const BROWSE_BUFFER: usize = 64;

#[derive(Default)]
struct NetworkState {
    services: HashMap<String, Device>,
    browsers: HashMap<u64, mpsc::Sender<DiscoveryEvent>>,
    next_id: u64,
}

impl NetworkState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn notify(&mut self, event: DiscoveryEvent) {
        self.browsers.retain(|_, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("discovery browser lagging, dropped {:?}", event);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Shared segment that providers advertise on and browse
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider for a node reachable at `address`
    pub fn provider(&self, address: IpAddr, fingerprint: Option<Fingerprint>) -> MemoryDiscovery {
        MemoryDiscovery {
            network: self.clone(),
            address,
            fingerprint,
            browser: Mutex::new(None),
        }
    }

    /// Inject an arbitrary event, as a misbehaving daemon might
    pub fn inject(&self, event: DiscoveryEvent) {
        if let Ok(mut state) = self.state.lock() {
            state.notify(event);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, NetworkState>, DiscoveryError> {
        self.state
            .lock()
            .map_err(|_| DiscoveryError::Unavailable("memory network poisoned".to_string()))
    }
}

pub struct MemoryDiscovery {
    network: MemoryNetwork,
    address: IpAddr,
    fingerprint: Option<Fingerprint>,
    browser: Mutex<Option<u64>>,
}

impl DiscoveryProvider for MemoryDiscovery {
    fn advertise(&self, service_name: &str, port: u16) -> Result<AdvertiseHandle, DiscoveryError> {
        let mut device = Device::new(self.address, port, service_name);
        device.fingerprint = self.fingerprint.clone();

        let mut state = self.network.lock()?;
        let handle = format!("{}#{}", service_name, state.next_id());
        state.services.insert(handle.clone(), device.clone());
        state.notify(DiscoveryEvent::DeviceAdded(device));
        Ok(AdvertiseHandle(handle))
    }

    fn stop_advertising(&self, handle: AdvertiseHandle) -> Result<(), DiscoveryError> {
        let mut state = self.network.lock()?;
        if let Some(device) = state.services.remove(&handle.0) {
            state.notify(DiscoveryEvent::DeviceRemoved(device));
        }
        Ok(())
    }

    fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let (tx, rx) = mpsc::channel(BROWSE_BUFFER);
        let mut state = self.network.lock()?;

        for device in state.services.values() {
            if tx.try_send(DiscoveryEvent::DeviceAdded(device.clone())).is_err() {
                break;
            }
        }

        let id = state.next_id();
        state.browsers.insert(id, tx);
        if let Ok(mut browser) = self.browser.lock() {
            if let Some(previous) = browser.replace(id) {
                state.browsers.remove(&previous);
            }
        }
        Ok(rx)
    }

    fn stop_browsing(&self) -> Result<(), DiscoveryError> {
        let previous = self.browser.lock().ok().and_then(|mut b| b.take());
        if let Some(id) = previous {
            self.network.lock()?.browsers.remove(&id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_browse_sees_existing_and_new_services() {
        let network = MemoryNetwork::new();
        let a = network.provider(ip("10.0.0.1"), None);
        let b = network.provider(ip("10.0.0.2"), Some(Fingerprint::new("fp-b")));

        a.advertise("alpha", 4000).unwrap();
        let mut events = b.browse().unwrap();
        let handle = b.advertise("beta", 4001).unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(
            first,
            DiscoveryEvent::DeviceAdded(Device::new(ip("10.0.0.1"), 4000, "alpha"))
        );

        match events.recv().await.unwrap() {
            DiscoveryEvent::DeviceAdded(device) => {
                assert_eq!(device.display_name, "beta");
                assert_eq!(device.fingerprint, Some(Fingerprint::new("fp-b")));
            }
            other => panic!("unexpected {:?}", other),
        }

        b.stop_advertising(handle).unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            DiscoveryEvent::DeviceRemoved(d) if d.display_name == "beta"
        ));
    }

    #[tokio::test]
    async fn test_stop_browsing_closes_stream() {
        let network = MemoryNetwork::new();
        let a = network.provider(ip("10.0.0.1"), None);
        let mut events = a.browse().unwrap();
        a.stop_browsing().unwrap();
        assert!(events.recv().await.is_none());
    }
}
