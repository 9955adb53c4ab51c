//! Peer and local device identity

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Certificate fingerprint presented by a peer's transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// SHA-256 of a DER certificate, base64 encoded
    pub fn of_certificate(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        Self(BASE64.encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer participant.
///
/// Two devices are the same device when address, port and display name
/// match; the fingerprint rides along but does not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub address: IpAddr,
    pub port: u16,
    pub display_name: String,
    pub fingerprint: Option<Fingerprint>,
}

impl Device {
    pub fn new(address: IpAddr, port: u16, display_name: impl Into<String>) -> Self {
        Self {
            address,
            port,
            display_name: display_name.into(),
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Device for an inbound connection nothing else is known about
    pub fn anonymous(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port(), addr.to_string())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.port == other.port
            && self.display_name == other.display_name
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
        self.display_name.hash(state);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.display_name, self.address, self.port)
    }
}

/// How this node presents itself to the group
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub display_name: String,
    /// Fingerprint of the certificate our transport presents, if any
    pub fingerprint: Option<Fingerprint>,
}

impl LocalIdentity {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Whether a discovered device is this node's own advertisement
    pub fn is_self(&self, device: &Device, local_port: u16) -> bool {
        device.display_name == self.display_name
            && device.port == local_port
            && (device.address.is_loopback()
                || crate::discovery::get_local_ips().contains(&device.address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_equality_ignores_fingerprint() {
        let a = Device::new(addr("10.0.0.2"), 17394, "laptop")
            .with_fingerprint(Fingerprint::new("aaa"));
        let b = Device::new(addr("10.0.0.2"), 17394, "laptop")
            .with_fingerprint(Fingerprint::new("bbb"));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn test_equality_uses_name_and_port() {
        let a = Device::new(addr("10.0.0.2"), 17394, "laptop");
        assert_ne!(a, Device::new(addr("10.0.0.2"), 17395, "laptop"));
        assert_ne!(a, Device::new(addr("10.0.0.2"), 17394, "desktop"));
        assert_ne!(a, Device::new(addr("10.0.0.3"), 17394, "laptop"));
    }

    #[test]
    fn test_certificate_fingerprint_is_stable() {
        let fp1 = Fingerprint::of_certificate(b"certificate");
        let fp2 = Fingerprint::of_certificate(b"certificate");
        assert_eq!(fp1, fp2);
        assert_ne!(fp1, Fingerprint::of_certificate(b"other"));
    }

    #[test]
    fn test_is_self_on_loopback() {
        let me = LocalIdentity::new("desk");
        let own = Device::new(addr("127.0.0.1"), 4000, "desk");
        assert!(me.is_self(&own, 4000));
        assert!(!me.is_self(&own, 4001));
        assert!(!me.is_self(&Device::new(addr("127.0.0.1"), 4000, "other"), 4000));
    }
}
