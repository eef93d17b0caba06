//! Validation of received blocks.
//!
//! Single authorized proposer per slot, single-signature finality: a block
//! that passes these checks and re-executes to the advertised state root is
//! final. There is no fork choice; anything that fails is rejected outright.

use crate::consensus::slots::{proposer_index, slot_at};
use crate::crypto::{Ed25519Verifier, Verifier};
use crate::economics::ChainParams;
use crate::execution::{BlockContext, BlockOutcome, ChainState};
use crate::genesis::Genesis;
use crate::types::{compute_root, tx_root, Block, Hash32, Height, Slot};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum BlockError {
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: Height, got: Height },
    #[error("previous hash mismatch")]
    PrevHashMismatch,
    #[error("proposer mismatch: expected {expected}, got {got}")]
    ProposerMismatch { expected: String, got: String },
    #[error("state root mismatch")]
    StateRootMismatch,
    #[error("transaction root mismatch")]
    TxRootMismatch,
    #[error("compute root mismatch")]
    ComputeRootMismatch,
    #[error("invalid timestamp")]
    TimestampInvalid,
    #[error("invalid proposer signature")]
    InvalidSignature,
    #[error("no active validators")]
    EmptyActiveSet,
    #[error("block exceeds size or gas limits")]
    TooLarge,
}

/// Local chain tip the next block must extend.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChainTip {
    pub height: Height,
    pub hash: Hash32,
    pub timestamp: u64,
    /// `None` when the tip is genesis itself.
    pub slot: Option<Slot>,
}

impl ChainTip {
    pub fn genesis(genesis: &Genesis) -> Self {
        Self {
            height: 0,
            hash: genesis.hash(),
            timestamp: genesis.genesis_time,
            slot: None,
        }
    }
}

/// Header-level checks: linkage, timestamps, slot/proposer consistency,
/// proposer signature, transaction root.
pub fn validate_block(
    block: &Block,
    tip: &ChainTip,
    state: &ChainState,
    genesis: &Genesis,
    now_unix: u64,
) -> Result<(), BlockError> {
    let header = &block.header;

    if header.height != tip.height + 1 {
        return Err(BlockError::HeightMismatch { expected: tip.height + 1, got: header.height });
    }
    if header.prev_hash != tip.hash {
        return Err(BlockError::PrevHashMismatch);
    }

    if header.timestamp <= tip.timestamp && tip.height > 0 {
        return Err(BlockError::TimestampInvalid);
    }
    if header.timestamp > now_unix + genesis.params.max_timestamp_skew_seconds {
        return Err(BlockError::TimestampInvalid);
    }

    // The header slot must match the timestamp and move forward.
    let derived = slot_at(
        header.timestamp,
        genesis.genesis_time,
        genesis.params.block_time_seconds,
    )
    .ok_or(BlockError::TimestampInvalid)?;
    if derived != header.slot {
        return Err(BlockError::TimestampInvalid);
    }
    if let Some(tip_slot) = tip.slot {
        if header.slot <= tip_slot {
            return Err(BlockError::TimestampInvalid);
        }
    }

    // Slot → proposer mapping over the active set.
    let active = state.active_set();
    if active.is_empty() {
        return Err(BlockError::EmptyActiveSet);
    }
    let expected = active[proposer_index(header.slot, active.len())];
    if expected.address != header.proposer {
        return Err(BlockError::ProposerMismatch {
            expected: expected.address.clone(),
            got: header.proposer.clone(),
        });
    }

    Ed25519Verifier::verify(&expected.pubkey, &header.hash().0, &block.signature)
        .map_err(|_| BlockError::InvalidSignature)?;

    if block.txs.len() > genesis.params.max_tx_per_block {
        return Err(BlockError::TooLarge);
    }
    let gas: u64 = block.txs.iter().map(|tx| tx.tx_type.base_gas()).sum();
    if gas > genesis.params.block_gas_limit {
        return Err(BlockError::TooLarge);
    }

    if tx_root(&block.txs) != header.tx_root {
        return Err(BlockError::TxRootMismatch);
    }
    Ok(())
}

/// Re-execute a validated block and commit it if the resulting state root
/// matches the header. On any mismatch the pre-state is left untouched.
pub fn apply_block(
    state: &mut ChainState,
    block: &Block,
    tip_slot: Option<Slot>,
    params: &ChainParams,
) -> Result<BlockOutcome, BlockError> {
    let mut working = state.clone();
    let ctx = BlockContext {
        height: block.header.height,
        timestamp: block.header.timestamp,
        slot: block.header.slot,
        prev_slot: tip_slot,
        proposer: block.header.proposer.clone(),
    };
    let outcome = working.execute_block(&ctx, &block.txs, params);

    if compute_root(&outcome.compute_results) != block.header.compute_root {
        return Err(BlockError::ComputeRootMismatch);
    }
    if working.state_root() != block.header.state_root {
        return Err(BlockError::StateRootMismatch);
    }

    *state = working;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::proposer::BlockProposer;
    use crate::crypto::{account_address, consensus_address, Ed25519Keypair, Signer};
    use crate::economics::ChainParams;
    use crate::genesis::GenesisValidator;
    use crate::types::cpc;

    fn fixture() -> (Genesis, ChainState, ChainTip, Ed25519Keypair) {
        let kp = Ed25519Keypair::from_seed([42; 32]);
        let genesis = Genesis {
            network_id: "cpc-test".into(),
            genesis_time: 1_700_000_000,
            params: ChainParams::devnet(),
            initial_validators: vec![GenesisValidator {
                consensus_addr: consensus_address(&kp.public_key()).unwrap(),
                operator_addr: account_address(&kp.public_key()).unwrap(),
                pubkey: kp.public_key(),
                self_stake: cpc(10_000),
                name: String::new(),
            }],
            initial_accounts: vec![],
        };
        let state = ChainState::from_genesis(&genesis);
        let tip = ChainTip::genesis(&genesis);
        (genesis, state, tip, kp)
    }

    fn build(genesis: &Genesis, state: &ChainState, tip: &ChainTip, kp: &Ed25519Keypair) -> Block {
        let proposer = BlockProposer::new(kp.clone());
        let now = genesis.genesis_time + genesis.params.block_time_seconds;
        let (block, _, _) = proposer.build_block(state, tip, 1, now, vec![], &genesis.params);
        block
    }

    #[test]
    fn valid_block_passes_and_applies() {
        let (genesis, mut state, tip, kp) = fixture();
        let block = build(&genesis, &state, &tip, &kp);
        let now = block.header.timestamp;
        validate_block(&block, &tip, &state, &genesis, now).unwrap();
        apply_block(&mut state, &block, tip.slot, &genesis.params).unwrap();
        assert_eq!(state.total_minted, genesis.params.block_reward);
    }

    #[test]
    fn wrong_prev_hash_is_rejected() {
        let (genesis, state, tip, kp) = fixture();
        let mut block = build(&genesis, &state, &tip, &kp);
        block.header.prev_hash = Hash32([0xEE; 32]);
        let err = validate_block(&block, &tip, &state, &genesis, block.header.timestamp);
        assert_eq!(err.unwrap_err(), BlockError::PrevHashMismatch);
    }

    #[test]
    fn wrong_height_is_rejected() {
        let (genesis, state, tip, kp) = fixture();
        let mut block = build(&genesis, &state, &tip, &kp);
        block.header.height = 5;
        let err = validate_block(&block, &tip, &state, &genesis, block.header.timestamp);
        assert_eq!(err.unwrap_err(), BlockError::HeightMismatch { expected: 1, got: 5 });
    }

    #[test]
    fn future_timestamp_is_rejected() {
        let (genesis, state, tip, kp) = fixture();
        let block = build(&genesis, &state, &tip, &kp);
        // Pretend our clock is far behind the block timestamp.
        let now = block.header.timestamp - genesis.params.max_timestamp_skew_seconds - 10;
        let err = validate_block(&block, &tip, &state, &genesis, now);
        assert_eq!(err.unwrap_err(), BlockError::TimestampInvalid);
    }

    #[test]
    fn tampered_header_breaks_the_signature() {
        let (genesis, state, tip, kp) = fixture();
        let mut block = build(&genesis, &state, &tip, &kp);
        block.header.state_root = Hash32([0xAA; 32]);
        let err = validate_block(&block, &tip, &state, &genesis, block.header.timestamp);
        assert_eq!(err.unwrap_err(), BlockError::InvalidSignature);
    }

    #[test]
    fn foreign_signer_is_rejected() {
        let (genesis, state, tip, kp) = fixture();
        let mut block = build(&genesis, &state, &tip, &kp);
        let imposter = Ed25519Keypair::from_seed([43; 32]);
        block.signature = imposter.sign(&block.header.hash().0);
        let err = validate_block(&block, &tip, &state, &genesis, block.header.timestamp);
        assert_eq!(err.unwrap_err(), BlockError::InvalidSignature);
    }

    #[test]
    fn diverging_state_root_rejects_on_apply() {
        let (genesis, mut state, tip, kp) = fixture();
        let mut block = build(&genesis, &state, &tip, &kp);
        // Forge a self-consistent header with a bogus state root.
        block.header.state_root = Hash32([0xBB; 32]);
        block.signature = kp.sign(&block.header.hash().0);
        validate_block(&block, &tip, &state, &genesis, block.header.timestamp).unwrap();
        let before = state.clone();
        let err = apply_block(&mut state, &block, tip.slot, &genesis.params).unwrap_err();
        assert_eq!(err, BlockError::StateRootMismatch);
        assert_eq!(state, before, "rejected blocks leave state untouched");
    }
}
