//! mDNS / DNS-SD backend

use std::collections::HashMap;
use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;

use crate::device::{Device, Fingerprint};
use crate::discovery::{AdvertiseHandle, DiscoveryEvent, DiscoveryProvider};
use crate::error::DiscoveryError;
use crate::protocol::constants::PROTOCOL_VERSION;

/// mDNS discovery service
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    service_type: String,
    fingerprint: Option<Fingerprint>,
}

impl MdnsDiscovery {
    pub fn new(service_type: &str, fingerprint: Option<Fingerprint>) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Unavailable(e.to_string()))?;

        Ok(Self {
            daemon,
            service_type: service_type.to_string(),
            fingerprint,
        })
    }
}

impl DiscoveryProvider for MdnsDiscovery {
    fn advertise(&self, service_name: &str, port: u16) -> Result<AdvertiseHandle, DiscoveryError> {
        let mut properties = HashMap::new();
        properties.insert("v".to_string(), PROTOCOL_VERSION.to_string());
        if let Some(fp) = &self.fingerprint {
            properties.insert("fp".to_string(), fp.to_string());
        }

        let host = format!(
            "{}.local.",
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "clipmesh".to_string())
        );

        let service = ServiceInfo::new(&self.service_type, service_name, &host, (), port, properties)
            .map_err(|e| DiscoveryError::Advertise(e.to_string()))?
            .enable_addr_auto();
        let fullname = service.get_fullname().to_string();

        self.daemon
            .register(service)
            .map_err(|e| DiscoveryError::Advertise(e.to_string()))?;

        tracing::info!("registered mDNS service: {}", fullname);
        Ok(AdvertiseHandle(fullname))
    }

    fn stop_advertising(&self, handle: AdvertiseHandle) -> Result<(), DiscoveryError> {
        self.daemon
            .unregister(&handle.0)
            .map_err(|e| DiscoveryError::Advertise(e.to_string()))?;
        tracing::info!("unregistered mDNS service: {}", handle.0);
        Ok(())
    }

    fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let (tx, rx) = mpsc::channel(32);
        let service_type = self.service_type.clone();

        let receiver = self
            .daemon
            .browse(&self.service_type)
            .map_err(|e| DiscoveryError::Browse(e.to_string()))?;

        tokio::spawn(async move {
            // fullname -> last device reported for it
            let mut resolved: HashMap<String, Device> = HashMap::new();

            while let Ok(event) = receiver.recv_async().await {
                let out = match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let Some(device) = device_from_info(&info, &service_type) else {
                            continue;
                        };
                        let fullname = info.get_fullname().to_string();
                        let mut out = Vec::new();
                        if let Some(previous) = resolved.insert(fullname, device.clone()) {
                            if previous != device {
                                out.push(DiscoveryEvent::DeviceRemoved(previous));
                            }
                        }
                        out.push(DiscoveryEvent::DeviceAdded(device));
                        out
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => match resolved.remove(&fullname) {
                        Some(device) => vec![DiscoveryEvent::DeviceRemoved(device)],
                        None => continue,
                    },
                    ServiceEvent::SearchStopped(_) => break,
                    _ => continue,
                };

                for event in out {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            tracing::debug!("mDNS browse for {} ended", service_type);
        });

        Ok(rx)
    }

    fn stop_browsing(&self) -> Result<(), DiscoveryError> {
        self.daemon
            .stop_browse(&self.service_type)
            .map_err(|e| DiscoveryError::Browse(e.to_string()))
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!("mDNS daemon shutdown: {}", e);
        }
    }
}

fn device_from_info(info: &ServiceInfo, service_type: &str) -> Option<Device> {
    let address = preferred_address(info.get_addresses().iter().copied())?;
    let fullname = info.get_fullname();
    let name = instance_name(fullname, service_type);
    let fingerprint = info
        .get_property_val_str("fp")
        .filter(|fp| !fp.is_empty())
        .map(Fingerprint::new);

    Some(Device {
        address,
        port: info.get_port(),
        display_name: name,
        fingerprint,
    })
}

/// Prefer IPv4 so both ends agree on the address they see
fn preferred_address(addresses: impl Iterator<Item = IpAddr>) -> Option<IpAddr> {
    let mut all: Vec<IpAddr> = addresses.collect();
    all.sort_by_key(|ip| (ip.is_ipv6(), *ip));
    all.into_iter().next()
}

fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or_else(|| fullname.split('.').next().unwrap_or(fullname))
        .to_string()
}
