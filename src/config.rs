//! TOML node configuration.
//!
//! Node-local operational knobs only; consensus parameters live in the
//! genesis document. Loaded from --config (default ./config.toml), with CLI
//! flags taking precedence.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub mempool: MempoolSection,
    #[serde(default)]
    pub rpc: RpcSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub data_dir: String,
    pub log_level: String,
    /// Produce blocks when our validator key is in the active set.
    pub propose: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: "./data/node".into(),
            log_level: "info".into(),
            propose: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub listen: String,
    /// Seed peers ("host:port").
    pub peers: Vec<String>,
    pub max_peers: usize,
    pub peer_io_timeout_s: u64,
    pub blacklist_s: u64,
    pub reconnect_s: u64,
    /// Fall back to snapshot bootstrap when this many blocks behind.
    pub snapshot_sync_threshold: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7001".into(),
            peers: vec![],
            max_peers: 50,
            peer_io_timeout_s: 120,
            blacklist_s: 300,
            reconnect_s: 30,
            snapshot_sync_threshold: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSection {
    pub capacity: usize,
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self { capacity: 5_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub listen: String,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self { listen: "127.0.0.1:9001".into() }
    }
}

impl NodeConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        let cfg: NodeConfig = toml::from_str(&s)?;
        Ok(cfg)
    }

    pub fn example_toml() -> &'static str {
        r#"# ComputeChain node configuration
# All values shown are defaults. Consensus parameters come from genesis.json.

[node]
data_dir  = "./data/node1"
log_level = "info"   # trace | debug | info | warn | error
propose   = true     # produce blocks when our key is in the active set

[network]
listen = "0.0.0.0:7001"
peers  = [
  # "10.0.0.2:7001",
  # "10.0.0.3:7001",
]
max_peers = 50
peer_io_timeout_s = 120
blacklist_s = 300
reconnect_s = 30
snapshot_sync_threshold = 1000

[mempool]
capacity = 5000

[rpc]
listen = "127.0.0.1:9001"
"#
    }

    pub fn write_example(path: &str) -> std::io::Result<()> {
        std::fs::write(path, Self::example_toml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_parses_back_to_defaults() {
        let cfg: NodeConfig = toml::from_str(NodeConfig::example_toml()).unwrap();
        assert_eq!(cfg.mempool.capacity, 5_000);
        assert_eq!(cfg.rpc.listen, "127.0.0.1:9001");
        assert!(cfg.node.propose);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = NodeConfig::load("/nonexistent/config.toml").unwrap();
        assert_eq!(cfg.network.max_peers, 50);
    }
}
