//! Shared harness for integration tests: a small devnet genesis, signed
//! transaction builders, and a driver that produces blocks through the real
//! proposer and re-applies them through block validation — the same paths a
//! live network exercises.

#![allow(dead_code)]

use computechain::consensus::{apply_block, validate_block, BlockProposer, ChainTip};
use computechain::crypto::{account_address, consensus_address, Ed25519Keypair, Signer, SignatureBytes};
use computechain::economics::ChainParams;
use computechain::execution::{BlockOutcome, ChainState};
use computechain::genesis::{Genesis, GenesisAccount, GenesisValidator};
use computechain::types::{Amount, Block, Tx, TxPayload, TxType};

pub const GENESIS_TIME: u64 = 1_700_000_000;

pub fn keypair(seed: u8) -> Ed25519Keypair {
    Ed25519Keypair::from_seed([seed; 32])
}

pub fn acct(kp: &Ed25519Keypair) -> String {
    account_address(&kp.public_key()).unwrap()
}

pub fn cons(kp: &Ed25519Keypair) -> String {
    consensus_address(&kp.public_key()).unwrap()
}

pub fn signed_tx(
    kp: &Ed25519Keypair,
    tx_type: TxType,
    to: Option<String>,
    amount: Amount,
    nonce: u64,
    gas_price: u64,
    payload: TxPayload,
) -> Tx {
    let mut tx = Tx {
        tx_type,
        from: acct(kp),
        to,
        amount,
        nonce,
        gas_price,
        gas_limit: tx_type.base_gas(),
        pubkey: kp.public_key(),
        signature: SignatureBytes::empty(),
        payload,
    };
    tx.signature = kp.sign(&tx.sign_bytes());
    tx
}

pub fn transfer(kp: &Ed25519Keypair, to: &str, amount: Amount, nonce: u64) -> Tx {
    signed_tx(kp, TxType::Transfer, Some(to.into()), amount, nonce, 1_000, TxPayload::None)
}

/// A network fixture: genesis with validator keys and funded accounts.
pub struct TestNet {
    pub genesis: Genesis,
    pub validators: Vec<Ed25519Keypair>,
    pub state: ChainState,
    pub tip: ChainTip,
}

impl TestNet {
    /// `validator_stakes[i]` funds validator i (also the operator account);
    /// `accounts` are plain funded accounts.
    pub fn new(validator_stakes: &[Amount], accounts: &[(&Ed25519Keypair, Amount)]) -> Self {
        let validators: Vec<Ed25519Keypair> =
            (0..validator_stakes.len()).map(|i| keypair(100 + i as u8)).collect();

        let genesis = Genesis {
            network_id: "cpc-test-1".into(),
            genesis_time: GENESIS_TIME,
            params: ChainParams::devnet(),
            initial_validators: validators
                .iter()
                .zip(validator_stakes)
                .map(|(kp, stake)| GenesisValidator {
                    consensus_addr: cons(kp),
                    operator_addr: acct(kp),
                    pubkey: kp.public_key(),
                    self_stake: *stake,
                    name: String::new(),
                })
                .collect(),
            initial_accounts: accounts
                .iter()
                .map(|(kp, bal)| GenesisAccount {
                    address: acct(kp),
                    balance: *bal,
                    pubkey: Some(kp.public_key()),
                })
                .collect(),
        };
        let state = ChainState::from_genesis(&genesis);
        let tip = ChainTip::genesis(&genesis);
        Self { genesis, validators, state, tip }
    }

    pub fn params(&self) -> &ChainParams {
        &self.genesis.params
    }

    /// The validator key designated for `slot` under the current state.
    pub fn designated(&self, slot: u64) -> &Ed25519Keypair {
        let active: Vec<String> = self
            .state
            .active_set()
            .iter()
            .map(|v| v.address.clone())
            .collect();
        assert!(!active.is_empty(), "no active validators");
        let addr = &active[(slot % active.len() as u64) as usize];
        self.validators
            .iter()
            .find(|kp| &cons(kp) == addr)
            .expect("designated proposer key in fixture")
    }

    /// Produce a block for `slot` through the proposer, then validate and
    /// apply it the way a remote node would. Panics on any divergence.
    pub fn produce_block(&mut self, slot: u64, txs: Vec<Tx>) -> (Block, BlockOutcome) {
        let now = GENESIS_TIME + slot * self.genesis.params.block_time_seconds;
        let proposer = BlockProposer::new(self.designated(slot).clone());
        let (block, _post, outcome) =
            proposer.build_block(&self.state, &self.tip, slot, now, txs, &self.genesis.params);

        // Foreign-node path: header checks, re-execution, state-root match.
        validate_block(&block, &self.tip, &self.state, &self.genesis, now)
            .expect("produced block must validate");
        apply_block(&mut self.state, &block, self.tip.slot, &self.genesis.params)
            .expect("produced block must re-apply");

        self.tip = ChainTip {
            height: block.header.height,
            hash: block.id(),
            timestamp: block.header.timestamp,
            slot: Some(block.header.slot),
        };
        (block, outcome)
    }

    /// Produce consecutive empty blocks, one slot apart, starting after the
    /// current tip.
    pub fn produce_empty_blocks(&mut self, count: u64) {
        for _ in 0..count {
            let slot = self.tip.slot.map(|s| s + 1).unwrap_or(0);
            self.produce_block(slot, vec![]);
        }
    }

    /// Supply identity: balances + power + unbonding + burned must equal
    /// minted + genesis supply after every block.
    pub fn assert_supply_identity(&self) {
        assert_eq!(
            self.state.circulating_and_locked() + self.state.total_burned,
            self.state.total_minted + self.genesis.total_supply(),
            "supply identity violated"
        );
    }
}
