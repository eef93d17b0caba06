//! Block assembly and signing.
//!
//! The proposer does one thing: when the local validator key is the
//! designated proposer for the current slot, it executes the drained
//! transactions on a copy of state, assembles and signs the block, and
//! hands back the block together with the post-state. Broadcasting and
//! persistence belong to the node loop.

use crate::consensus::block_validator::ChainTip;
use crate::consensus::slots::proposer_index;
use crate::crypto::{consensus_address, Ed25519Keypair, Signer};
use crate::economics::ChainParams;
use crate::execution::{BlockContext, BlockOutcome, ChainState};
use crate::types::{compute_root, tx_root, Block, BlockHeader, Slot, Tx, PROTOCOL_VERSION};
use tracing::info;

pub struct BlockProposer {
    signer: Ed25519Keypair,
    consensus_addr: String,
}

impl BlockProposer {
    pub fn new(signer: Ed25519Keypair) -> Self {
        let consensus_addr =
            consensus_address(&signer.public_key()).expect("valid ed25519 pubkey");
        Self { signer, consensus_addr }
    }

    pub fn consensus_addr(&self) -> &str {
        &self.consensus_addr
    }

    /// Whether the local key is designated for `slot` in the current
    /// active set.
    pub fn is_our_slot(&self, state: &ChainState, slot: Slot) -> bool {
        let active = state.active_set();
        if active.is_empty() {
            return false;
        }
        active[proposer_index(slot, active.len())].address == self.consensus_addr
    }

    /// Execute `txs` against a copy of `state` and produce the signed block.
    /// Invalid transactions are skipped (reported in the outcome) and left
    /// out of the block.
    pub fn build_block(
        &self,
        state: &ChainState,
        tip: &ChainTip,
        slot: Slot,
        now_unix: u64,
        txs: Vec<Tx>,
        params: &ChainParams,
    ) -> (Block, ChainState, BlockOutcome) {
        let height = tip.height + 1;
        let mut working = state.clone();
        let ctx = BlockContext {
            height,
            timestamp: now_unix,
            slot,
            prev_slot: tip.slot,
            proposer: self.consensus_addr.clone(),
        };
        let outcome = working.execute_block(&ctx, &txs, params);

        let header = BlockHeader {
            height,
            prev_hash: tip.hash,
            timestamp: now_unix,
            slot,
            proposer: self.consensus_addr.clone(),
            tx_root: tx_root(&outcome.applied),
            state_root: working.state_root(),
            compute_root: compute_root(&outcome.compute_results),
            version: PROTOCOL_VERSION,
        };
        let signature = self.signer.sign(&header.hash().0);
        let block = Block { header, txs: outcome.applied.clone(), signature };

        info!(
            height,
            slot,
            txs = block.txs.len(),
            skipped = outcome.failed.len(),
            "block assembled"
        );
        (block, working, outcome)
    }
}
