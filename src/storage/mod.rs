pub mod block_store;
pub mod peer_store;
pub mod snapshots;

use crate::consensus::ChainTip;
use crate::crypto::ed25519::Ed25519Keypair;
use crate::execution::ChainState;
use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path};

/// Current state plus the tip it was committed at. Persisted as
/// `<data_dir>/state.db` after every block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateDocument {
    pub state: ChainState,
    pub tip: ChainTip,
}

/// Per-node data directory:
///
/// ```text
/// <root>/genesis.json
/// <root>/state.db
/// <root>/blocks/
/// <root>/snapshots/
/// <root>/keys/validator_key
/// <root>/peers.json
/// ```
#[derive(Clone)]
pub struct DataDir {
    pub root: String,
}

impl DataDir {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    fn p(&self, file: &str) -> String {
        format!("{}/{}", self.root, file)
    }

    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.p("keys"))
    }

    pub fn genesis_path(&self) -> String {
        self.p("genesis.json")
    }

    pub fn blocks_dir(&self) -> String {
        self.p("blocks")
    }

    pub fn snapshots_dir(&self) -> String {
        self.p("snapshots")
    }

    pub fn peers_path(&self) -> String {
        self.p("peers.json")
    }

    pub fn state_path(&self) -> String {
        self.p("state.db")
    }

    pub fn load_state(&self) -> io::Result<Option<StateDocument>> {
        let path = self.state_path();
        if !Path::new(&path).exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&path)?;
        serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("state.db parse: {e}")))
    }

    /// Atomic save: write to `.tmp`, then rename over the old file.
    pub fn save_state(&self, doc: &StateDocument) -> io::Result<()> {
        self.ensure()?;
        let path = self.state_path();
        let tmp = format!("{path}.tmp");
        let out = serde_json::to_string(doc)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("state.db encode: {e}")))?;
        fs::write(&tmp, &out)?;
        fs::rename(&tmp, &path)
    }

    /// Read the validator seed from `keys/validator_key`, generating and
    /// persisting a fresh one on first start.
    pub fn load_or_create_validator_key(&self) -> io::Result<Ed25519Keypair> {
        self.ensure()?;
        let path = self.p("keys/validator_key");
        if let Ok(bytes) = fs::read(&path) {
            if bytes.len() == 32 {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                return Ok(Ed25519Keypair::from_seed(seed));
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "validator_key must be exactly 32 bytes",
            ));
        }
        let kp = Ed25519Keypair::generate();
        fs::write(&path, kp.to_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }
        Ok(kp)
    }
}
