//! Node configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::constants::{DEFAULT_PORT, MAX_PAYLOAD_SIZE, SERVICE_TYPE};
use crate::protocol::Codec;
use crate::{Error, Result};

/// File name of the configuration inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Which discovery backend to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryBackend {
    #[default]
    Mdns,
    /// Manual connections only
    None,
}

/// Configuration for a clipmesh node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port to listen on for incoming connections (0 picks a free one)
    pub port: u16,
    /// mDNS service type
    pub service_type: String,
    /// Path to store persistent data (trusted devices, config)
    pub data_dir: PathBuf,
    /// Upper bound for a single packet field
    pub max_payload_size: usize,
    /// How long a peer has to answer our challenge
    pub handshake_timeout_ms: u64,
    /// How long to wait for the user to approve an unknown device
    pub decision_timeout_ms: u64,
    /// Silence after which a session is considered stale
    pub idle_timeout_ms: u64,
    /// Silence after which we send a ping
    pub ping_interval_ms: u64,
    /// Clipboard entries kept in memory
    pub history_limit: usize,
    /// Frames queued per peer before updates to it are dropped
    pub outbox_capacity: usize,
    pub discovery: DiscoveryBackend,
    /// Dial newly discovered devices
    pub auto_connect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            service_type: SERVICE_TYPE.to_string(),
            data_dir: dirs_home().join(".clipmesh"),
            max_payload_size: MAX_PAYLOAD_SIZE,
            handshake_timeout_ms: 10_000,
            decision_timeout_ms: 60_000,
            idle_timeout_ms: 30_000,
            ping_interval_ms: 10_000,
            history_limit: 50,
            outbox_capacity: 32,
            discovery: DiscoveryBackend::Mdns,
            auto_connect: true,
        }
    }
}

impl Config {
    /// Load from a JSON file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config.json` from `data_dir` if present
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if path.exists() {
            let mut config = Self::load(&path)?;
            config.data_dir = data_dir.to_path_buf();
            Ok(config)
        } else {
            Ok(Self {
                data_dir: data_dir.to_path_buf(),
                ..Self::default()
            })
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 || self.max_payload_size > u32::MAX as usize {
            return Err(Error::Config(format!(
                "max_payload_size must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.ping_interval_ms == 0 || self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(Error::Config(
                "idle_timeout_ms must be longer than a non-zero ping_interval_ms".to_string(),
            ));
        }
        if self.handshake_timeout_ms == 0 || self.decision_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.outbox_capacity == 0 {
            return Err(Error::Config("outbox_capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn codec(&self) -> Codec {
        Codec::new(self.max_payload_size)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.codec().max_payload(), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"port": 4000, "discovery": "none"}"#).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.discovery, DiscoveryBackend::None);
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn test_idle_must_exceed_ping() {
        let config = Config {
            idle_timeout_ms: 1_000,
            ping_interval_ms: 1_000,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = std::env::temp_dir().join(format!("clipmesh-config-{}", uuid::Uuid::new_v4()));
        let config = Config::load_or_default(&dir).unwrap();
        assert_eq!(config.data_dir, dir);
    }
}
