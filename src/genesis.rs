//! Genesis document.
//!
//! Every node of a network must start from a byte-identical genesis file;
//! the SHA-256 of its canonical encoding is the network identity used to
//! gate peer sessions. The consensus parameters live inside the document,
//! so the genesis hash pins them network-wide.

use crate::crypto::PublicKeyBytes;
use crate::economics::ChainParams;
use crate::types::{hash_bytes, Amount, Hash32};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub consensus_addr: String,
    pub operator_addr: String,
    pub pubkey: PublicKeyBytes,
    pub self_stake: Amount,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: String,
    pub balance: Amount,
    #[serde(default)]
    pub pubkey: Option<PublicKeyBytes>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Genesis {
    pub network_id: String,
    /// Unix seconds; slot 0 starts here.
    pub genesis_time: u64,
    pub params: ChainParams,
    pub initial_validators: Vec<GenesisValidator>,
    pub initial_accounts: Vec<GenesisAccount>,
}

impl Genesis {
    /// Network identity: SHA-256 over the domain-tagged canonical encoding.
    pub fn hash(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(b"CPC_GEN");
        buf.extend_from_slice(&bincode::serialize(self).unwrap_or_default());
        hash_bytes(&buf)
    }

    /// Sum of all initial balances and self-stakes.
    pub fn total_supply(&self) -> Amount {
        let accounts = self
            .initial_accounts
            .iter()
            .fold(Amount::ZERO, |acc, a| acc + a.balance);
        self.initial_validators
            .iter()
            .fold(accounts, |acc, v| acc + v.self_stake)
    }

    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        serde_json::from_str(&s)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("genesis.json parse: {e}")))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let out = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("genesis.json encode: {e}")))?;
        std::fs::write(path, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::cpc;

    fn genesis() -> Genesis {
        Genesis {
            network_id: "cpc-devnet-1".into(),
            genesis_time: 1_700_000_000,
            params: ChainParams::devnet(),
            initial_validators: vec![GenesisValidator {
                consensus_addr: "cpcvalcons1v".into(),
                operator_addr: "cpc1v".into(),
                pubkey: PublicKeyBytes(vec![1; 32]),
                self_stake: cpc(10_000),
                name: "genesis-val".into(),
            }],
            initial_accounts: vec![GenesisAccount {
                address: "cpc1alice".into(),
                balance: cpc(1_000),
                pubkey: None,
            }],
        }
    }

    #[test]
    fn hash_changes_with_any_field() {
        let g = genesis();
        let mut h = genesis();
        h.genesis_time += 1;
        assert_ne!(g.hash(), h.hash());
        let mut p = genesis();
        p.params.block_reward = cpc(11);
        assert_ne!(g.hash(), p.hash());
    }

    #[test]
    fn total_supply_counts_stakes_and_balances() {
        assert_eq!(genesis().total_supply(), cpc(11_000));
    }

    #[test]
    fn file_roundtrip() {
        let dir = std::env::temp_dir().join("cpc_genesis_test");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("genesis.json");
        let g = genesis();
        g.save(&path).unwrap();
        let loaded = Genesis::load(&path).unwrap();
        assert_eq!(g, loaded);
        assert_eq!(g.hash(), loaded.hash());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
