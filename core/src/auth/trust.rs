//! Registry of certificate fingerprints that may join without a prompt

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::device::Fingerprint;
use crate::{Error, Result};

/// File name of the persisted registry inside the data directory
pub const TRUST_FILE: &str = "trusted_devices.json";

pub trait TrustStore: Send + Sync {
    fn is_trusted(&self, fingerprint: &Fingerprint) -> bool;

    fn remember(&self, fingerprint: Fingerprint) -> Result<()>;

    fn trusted(&self) -> Vec<Fingerprint>;
}

#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    fingerprints: RwLock<BTreeSet<Fingerprint>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustStore for MemoryTrustStore {
    fn is_trusted(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints
            .read()
            .map(|set| set.contains(fingerprint))
            .unwrap_or(false)
    }

    fn remember(&self, fingerprint: Fingerprint) -> Result<()> {
        self.fingerprints
            .write()
            .map_err(|_| poisoned())?
            .insert(fingerprint);
        Ok(())
    }

    fn trusted(&self) -> Vec<Fingerprint> {
        self.fingerprints
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrustFile {
    fingerprints: BTreeSet<Fingerprint>,
}

/// JSON-backed registry, rewritten on every change
#[derive(Debug)]
pub struct FileTrustStore {
    path: PathBuf,
    fingerprints: RwLock<BTreeSet<Fingerprint>>,
}

impl FileTrustStore {
    /// Open the registry in `data_dir`, starting empty if the file is missing
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(TRUST_FILE);
        let file = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<TrustFile>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TrustFile::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            "loaded {} trusted fingerprints from {}",
            file.fingerprints.len(),
            path.display()
        );
        Ok(Self {
            path,
            fingerprints: RwLock::new(file.fingerprints),
        })
    }

    fn save(&self, fingerprints: &BTreeSet<Fingerprint>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = TrustFile {
            fingerprints: fingerprints.clone(),
        };
        std::fs::write(&self.path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }
}

impl TrustStore for FileTrustStore {
    fn is_trusted(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints
            .read()
            .map(|set| set.contains(fingerprint))
            .unwrap_or(false)
    }

    fn remember(&self, fingerprint: Fingerprint) -> Result<()> {
        let snapshot = {
            let mut set = self.fingerprints.write().map_err(|_| poisoned())?;
            if !set.insert(fingerprint) {
                return Ok(());
            }
            set.clone()
        };
        self.save(&snapshot)
    }

    fn trusted(&self) -> Vec<Fingerprint> {
        self.fingerprints
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> Error {
    Error::Trust("registry lock poisoned".to_string())
}
