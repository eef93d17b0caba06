//! Deterministic state machine: account and validator state, per-transaction
//! validation and application, block execution, and the canonical state root.
//!
//! All arithmetic is integer-only. Every check that can reject a transaction
//! runs before any mutation, so a failed transaction leaves the state
//! untouched and is simply skipped during block execution.

use crate::crypto::{account_address, consensus_address, Ed25519Verifier, Verifier};
use crate::economics::params::{DEFAULT_COMMISSION_BPS, JAIL_UNSTAKE_PENALTY_BPS, MAX_RESULT_WEIGHT};
use crate::economics::{
    Account, ChainParams, Delegation, UnbondingEntry, Validator, BPS_DENOM, TREASURY_ADDRESS,
};
use crate::genesis::Genesis;
use crate::types::{hash_bytes, Amount, ComputeResult, Gas, Hash32, Height, Tx, TxPayload, TxType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum StateError {
    #[error("malformed transaction: {0}")]
    Malformed(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: Amount, need: Amount },
    #[error("unknown validator {0}")]
    UnknownValidator(String),
    #[error("account {0} already operates a validator")]
    ValidatorExists(String),
    #[error("invalid amount")]
    InvalidAmount,
    #[error("gas limit below base cost")]
    GasLimitTooLow,
    #[error("gas price below network minimum")]
    GasPriceTooLow,
    #[error("invalid commission")]
    InvalidCommission,
    #[error("metadata too long")]
    MetadataTooLong,
    #[error("delegation below minimum")]
    MinDelegationNotMet,
    #[error("delegator participates in too many validators")]
    MaxValidatorsPerDelegatorExceeded,
    #[error("validator power share above cap")]
    MaxValidatorPowerShareExceeded,
    #[error("validator is jailed")]
    Jailed,
    #[error("validator permanently ejected")]
    EjectionPermanent,
    #[error("sender is not the validator operator")]
    NotOwner,
}

/// Result of applying a single transaction.
#[derive(Clone, Debug)]
pub struct TxOutcome {
    pub gas_used: Gas,
    pub fee: Amount,
    pub compute: Option<ComputeResult>,
}

/// Execution context for one block.
#[derive(Clone, Debug)]
pub struct BlockContext {
    pub height: Height,
    pub timestamp: u64,
    pub slot: u64,
    /// Slot of the parent block; `None` for the first block after genesis.
    pub prev_slot: Option<u64>,
    /// Consensus address of the proposer.
    pub proposer: String,
}

/// Result of executing a block body.
#[derive(Clone, Debug, Default)]
pub struct BlockOutcome {
    pub applied: Vec<Tx>,
    pub failed: Vec<(Hash32, StateError)>,
    pub compute_results: Vec<ComputeResult>,
    pub gas_used: Gas,
    pub minted: Amount,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    pub accounts: BTreeMap<String, Account>,
    pub validators: BTreeMap<String, Validator>,
    pub total_minted: Amount,
    pub total_burned: Amount,
    pub epoch_index: u64,
}

impl ChainState {
    pub fn from_genesis(genesis: &Genesis) -> Self {
        let mut state = Self::default();
        for acc in &genesis.initial_accounts {
            state
                .accounts
                .insert(acc.address.clone(), Account::with_balance(acc.balance));
        }
        for v in &genesis.initial_validators {
            let mut val = Validator::new(
                v.consensus_addr.clone(),
                v.operator_addr.clone(),
                v.pubkey.clone(),
                v.self_stake,
                DEFAULT_COMMISSION_BPS,
                0,
            );
            val.name = v.name.clone();
            val.is_active = v.self_stake >= genesis.params.min_validator_stake;
            state.validators.insert(v.consensus_addr.clone(), val);
        }
        state
    }

    pub fn nonce_of(&self, addr: &str) -> u64 {
        self.accounts.get(addr).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn balance_of(&self, addr: &str) -> Amount {
        self.accounts.get(addr).map(|a| a.balance).unwrap_or(Amount::ZERO)
    }

    fn account_entry(&mut self, addr: &str) -> &mut Account {
        self.accounts.entry(addr.to_string()).or_default()
    }

    pub fn validator_by_operator(&self, operator: &str) -> Option<&Validator> {
        self.validators.values().find(|v| v.operator == operator)
    }

    /// Sum of `power` across every validator.
    pub fn total_staked_power(&self) -> Amount {
        self.validators
            .values()
            .fold(Amount::ZERO, |acc, v| acc + v.power())
    }

    /// Active validators ordered canonically by consensus address.
    pub fn active_set(&self) -> Vec<&Validator> {
        self.validators.values().filter(|v| v.is_active).collect()
    }

    fn burn(&mut self, amount: Amount) {
        self.total_burned += amount;
    }

    /// Charge a fee that was already covered by the sender balance check:
    /// deduct, route the treasury share, burn the rest.
    fn charge_fee(&mut self, sender: &str, fee: Amount, params: &ChainParams) {
        self.account_entry(sender).balance -= fee;
        let (treasury, burned) = params.split_fee(fee);
        if treasury > Amount::ZERO {
            self.account_entry(TREASURY_ADDRESS).balance += treasury;
        }
        self.burn(burned);
    }

    // ── Transaction application ───────────────────────────────────────────

    pub fn apply_transaction(
        &mut self,
        tx: &Tx,
        height: Height,
        params: &ChainParams,
    ) -> Result<TxOutcome, StateError> {
        // Authentication
        if tx.pubkey.0.is_empty() || tx.signature.0.is_empty() {
            return Err(StateError::Malformed("missing signature or pubkey".into()));
        }
        let derived = account_address(&tx.pubkey).map_err(|_| StateError::InvalidSignature)?;
        if derived != tx.from {
            return Err(StateError::InvalidSignature);
        }
        Ed25519Verifier::verify(&tx.pubkey, &tx.sign_bytes(), &tx.signature)
            .map_err(|_| StateError::InvalidSignature)?;

        // Nonce
        let expected = self.nonce_of(&tx.from);
        if tx.nonce != expected {
            return Err(StateError::InvalidNonce { expected, got: tx.nonce });
        }

        // Gas and fee
        let base_gas = tx.tx_type.base_gas();
        if tx.gas_limit < base_gas {
            return Err(StateError::GasLimitTooLow);
        }
        if tx.gas_price < params.min_gas_price {
            return Err(StateError::GasPriceTooLow);
        }
        let fee = Amount::from(base_gas) * Amount::from(tx.gas_price);

        let required = match tx.tx_type {
            TxType::Unstake | TxType::Undelegate | TxType::UpdateValidator => fee,
            TxType::Unjail => fee + params.unjail_fee,
            _ => tx.amount + fee,
        };
        let have = self.balance_of(&tx.from);
        if have < required {
            return Err(StateError::InsufficientFunds { have, need: required });
        }

        let compute = match tx.tx_type {
            TxType::Transfer => {
                let to = tx
                    .to
                    .as_deref()
                    .ok_or_else(|| StateError::Malformed("transfer requires recipient".into()))?
                    .to_string();
                self.charge_fee(&tx.from, fee, params);
                self.account_entry(&tx.from).balance -= tx.amount;
                self.account_entry(&to).balance += tx.amount;
                None
            }
            TxType::Stake => {
                self.apply_stake(tx, height, fee, params)?;
                None
            }
            TxType::Unstake => {
                self.apply_unstake(tx, height, fee, params)?;
                None
            }
            TxType::UpdateValidator => {
                self.apply_update_validator(tx, fee, params)?;
                None
            }
            TxType::Delegate => {
                self.apply_delegate(tx, height, fee, params)?;
                None
            }
            TxType::Undelegate => {
                self.apply_undelegate(tx, height, fee, params)?;
                None
            }
            TxType::Unjail => {
                self.apply_unjail(tx, fee, params)?;
                None
            }
            TxType::SubmitResult => Some(self.apply_submit_result(tx, fee, params)?),
        };

        self.account_entry(&tx.from).nonce += 1;
        Ok(TxOutcome { gas_used: base_gas, fee, compute })
    }

    fn validator_key_payload(tx: &Tx) -> Result<String, StateError> {
        match &tx.payload {
            TxPayload::ValidatorKey { pubkey } => consensus_address(pubkey)
                .map_err(|_| StateError::Malformed("bad validator pubkey".into())),
            _ => Err(StateError::Malformed("missing validator pubkey".into())),
        }
    }

    fn apply_stake(
        &mut self,
        tx: &Tx,
        height: Height,
        fee: Amount,
        params: &ChainParams,
    ) -> Result<(), StateError> {
        if tx.amount == Amount::ZERO {
            return Err(StateError::InvalidAmount);
        }
        let val_addr = Self::validator_key_payload(tx)?;
        let pubkey = match &tx.payload {
            TxPayload::ValidatorKey { pubkey } => pubkey.clone(),
            _ => unreachable!("checked by validator_key_payload"),
        };

        match self.validators.get(&val_addr) {
            Some(v) if v.operator != tx.from => return Err(StateError::NotOwner),
            Some(_) => {}
            None => {
                if self.validator_by_operator(&tx.from).is_some() {
                    return Err(StateError::ValidatorExists(tx.from.clone()));
                }
            }
        }

        self.charge_fee(&tx.from, fee, params);
        self.account_entry(&tx.from).balance -= tx.amount;

        match self.validators.get_mut(&val_addr) {
            Some(v) => v.self_stake += tx.amount,
            None => {
                // New validators start inactive; the next epoch boundary
                // admits them once self_stake clears the minimum.
                let v = Validator::new(
                    val_addr.clone(),
                    tx.from.clone(),
                    pubkey,
                    tx.amount,
                    DEFAULT_COMMISSION_BPS,
                    height,
                );
                self.validators.insert(val_addr, v);
            }
        }
        Ok(())
    }

    fn apply_unstake(
        &mut self,
        tx: &Tx,
        height: Height,
        fee: Amount,
        params: &ChainParams,
    ) -> Result<(), StateError> {
        if tx.amount == Amount::ZERO {
            return Err(StateError::InvalidAmount);
        }
        let val_addr = Self::validator_key_payload(tx)?;
        let (jailed, self_stake) = {
            let v = self
                .validators
                .get(&val_addr)
                .ok_or_else(|| StateError::UnknownValidator(val_addr.clone()))?;
            if v.operator != tx.from {
                return Err(StateError::NotOwner);
            }
            (v.is_jailed(height), v.self_stake)
        };
        if tx.amount > self_stake {
            return Err(StateError::InvalidAmount);
        }

        self.charge_fee(&tx.from, fee, params);

        // Unstaking while jailed forfeits a fraction of the amount.
        let penalty = if jailed {
            tx.amount * Amount::from(JAIL_UNSTAKE_PENALTY_BPS) / Amount::from(BPS_DENOM)
        } else {
            Amount::ZERO
        };
        let returned = tx.amount - penalty;
        self.burn(penalty);
        self.account_entry(&tx.from).balance += returned;

        let v = self.validators.get_mut(&val_addr).expect("validator checked above");
        v.self_stake -= tx.amount;
        if v.power() == Amount::ZERO {
            v.is_active = false;
        }
        if penalty > Amount::ZERO {
            v.total_penalties += penalty;
        }
        Ok(())
    }

    fn apply_update_validator(
        &mut self,
        tx: &Tx,
        fee: Amount,
        params: &ChainParams,
    ) -> Result<(), StateError> {
        let (pubkey, name, website, description, commission_bps) = match &tx.payload {
            TxPayload::ValidatorUpdate { pubkey, name, website, description, commission_bps } => (
                pubkey.clone(),
                name.clone(),
                website.clone(),
                description.clone(),
                *commission_bps,
            ),
            _ => return Err(StateError::Malformed("missing validator update".into())),
        };
        let val_addr =
            consensus_address(&pubkey).map_err(|_| StateError::Malformed("bad validator pubkey".into()))?;

        {
            let v = self
                .validators
                .get(&val_addr)
                .ok_or_else(|| StateError::UnknownValidator(val_addr.clone()))?;
            if v.operator != tx.from {
                return Err(StateError::NotOwner);
            }
        }
        if name.as_ref().map(|s| s.len() > 64).unwrap_or(false)
            || website.as_ref().map(|s| s.len() > 128).unwrap_or(false)
            || description.as_ref().map(|s| s.len() > 256).unwrap_or(false)
        {
            return Err(StateError::MetadataTooLong);
        }
        if let Some(bps) = commission_bps {
            if bps > params.max_commission_bps {
                return Err(StateError::InvalidCommission);
            }
        }

        self.charge_fee(&tx.from, fee, params);
        let v = self.validators.get_mut(&val_addr).expect("validator checked above");
        if let Some(name) = name {
            v.name = name;
        }
        if let Some(website) = website {
            v.website = website;
        }
        if let Some(description) = description {
            v.description = description;
        }
        if let Some(bps) = commission_bps {
            v.commission_bps = bps;
        }
        Ok(())
    }

    fn apply_delegate(
        &mut self,
        tx: &Tx,
        height: Height,
        fee: Amount,
        params: &ChainParams,
    ) -> Result<(), StateError> {
        let val_addr = match &tx.payload {
            TxPayload::ValidatorTarget { validator } => validator.clone(),
            _ => return Err(StateError::Malformed("missing target validator".into())),
        };
        if tx.amount < params.min_delegation {
            return Err(StateError::MinDelegationNotMet);
        }
        let existing = {
            let v = self
                .validators
                .get(&val_addr)
                .ok_or_else(|| StateError::UnknownValidator(val_addr.clone()))?;
            v.delegation_of(&tx.from).is_some()
        };

        if !existing {
            let active_positions = self
                .validators
                .values()
                .filter(|v| v.delegation_of(&tx.from).is_some())
                .count();
            if active_positions >= params.max_validators_per_delegator {
                return Err(StateError::MaxValidatorsPerDelegatorExceeded);
            }
        }

        // Concentration cap. Unsatisfiable with too few validators
        // (N * cap < 100%), in which case it is waived.
        let cap_bps = Amount::from(params.max_validator_power_share_bps);
        let cap_applies =
            (self.validators.len() as u64) * params.max_validator_power_share_bps as u64 >= BPS_DENOM;
        if cap_applies {
            let new_power = self.validators[&val_addr].power() + tx.amount;
            let new_total = self.total_staked_power() + tx.amount;
            if new_power * Amount::from(BPS_DENOM) > cap_bps * new_total {
                return Err(StateError::MaxValidatorPowerShareExceeded);
            }
        }

        self.charge_fee(&tx.from, fee, params);
        self.account_entry(&tx.from).balance -= tx.amount;

        let v = self.validators.get_mut(&val_addr).expect("validator checked above");
        match v.delegation_of_mut(&tx.from) {
            Some(d) => d.amount += tx.amount,
            None => v.delegations.push(Delegation {
                delegator: tx.from.clone(),
                amount: tx.amount,
                created_height: height,
            }),
        }
        v.total_delegated += tx.amount;
        Ok(())
    }

    fn apply_undelegate(
        &mut self,
        tx: &Tx,
        height: Height,
        fee: Amount,
        params: &ChainParams,
    ) -> Result<(), StateError> {
        let val_addr = match &tx.payload {
            TxPayload::ValidatorTarget { validator } => validator.clone(),
            _ => return Err(StateError::Malformed("missing target validator".into())),
        };
        if tx.amount == Amount::ZERO {
            return Err(StateError::InvalidAmount);
        }
        {
            let v = self
                .validators
                .get(&val_addr)
                .ok_or_else(|| StateError::UnknownValidator(val_addr.clone()))?;
            let d = v.delegation_of(&tx.from).ok_or(StateError::InvalidAmount)?;
            if tx.amount > d.amount {
                return Err(StateError::InvalidAmount);
            }
        }

        self.charge_fee(&tx.from, fee, params);

        let v = self.validators.get_mut(&val_addr).expect("validator checked above");
        let d = v.delegation_of_mut(&tx.from).expect("delegation checked above");
        d.amount -= tx.amount;
        if d.amount == Amount::ZERO {
            v.delegations.retain(|d| d.delegator != tx.from);
        }
        v.total_delegated -= tx.amount;

        // Tokens stay locked until the unbonding window elapses.
        let completion_height = height + params.unbonding_blocks;
        self.account_entry(&tx.from).unbonding.push(UnbondingEntry {
            validator: val_addr,
            amount: tx.amount,
            completion_height,
        });
        Ok(())
    }

    fn apply_unjail(&mut self, tx: &Tx, fee: Amount, params: &ChainParams) -> Result<(), StateError> {
        let val_addr = Self::validator_key_payload(tx)?;
        {
            let v = self
                .validators
                .get(&val_addr)
                .ok_or_else(|| StateError::UnknownValidator(val_addr.clone()))?;
            if v.operator != tx.from {
                return Err(StateError::NotOwner);
            }
            if v.jail_count >= params.ejection_threshold_jails {
                return Err(StateError::EjectionPermanent);
            }
            if v.jailed_until_height == 0 {
                return Err(StateError::Malformed("validator is not jailed".into()));
            }
        }

        self.charge_fee(&tx.from, fee, params);
        // The unjail fee burns in full, on top of gas.
        self.account_entry(&tx.from).balance -= params.unjail_fee;
        self.burn(params.unjail_fee);

        let v = self.validators.get_mut(&val_addr).expect("validator checked above");
        v.jailed_until_height = 0;
        v.missed_blocks = 0;
        v.is_active = true;
        Ok(())
    }

    fn apply_submit_result(
        &mut self,
        tx: &Tx,
        fee: Amount,
        params: &ChainParams,
    ) -> Result<ComputeResult, StateError> {
        let res = match &tx.payload {
            TxPayload::ComputeResult(res) => res.clone(),
            _ => return Err(StateError::Malformed("missing compute result".into())),
        };
        if res.worker != tx.from {
            return Err(StateError::Malformed("worker address mismatch".into()));
        }
        if res.weight == 0 || res.weight > MAX_RESULT_WEIGHT {
            return Err(StateError::InvalidAmount);
        }
        if tx.amount != Amount::ZERO {
            return Err(StateError::InvalidAmount);
        }
        self.charge_fee(&tx.from, fee, params);
        Ok(res)
    }

    // ── Block execution ───────────────────────────────────────────────────

    /// Mature unbonding entries whose completion height has been reached.
    fn mature_unbonding(&mut self, height: Height) {
        for acc in self.accounts.values_mut() {
            let mut released = Amount::ZERO;
            acc.unbonding.retain(|e| {
                if e.completion_height <= height {
                    released += e.amount;
                    false
                } else {
                    true
                }
            });
            acc.balance += released;
        }
    }

    /// Execute a block body against this state. Used identically by the
    /// proposer (to build) and by validation (to verify): same inputs, same
    /// post-state.
    pub fn execute_block(
        &mut self,
        ctx: &BlockContext,
        txs: &[Tx],
        params: &ChainParams,
    ) -> BlockOutcome {
        let mut outcome = BlockOutcome::default();

        // 1. Unbonding maturation
        self.mature_unbonding(ctx.height);

        // 2. Mint the block reward; the validator pool distributes now,
        //    the miner pool waits for this block's submissions.
        let (minted, miner_pool) =
            crate::economics::rewards::distribute_validator_rewards(self, ctx.height, params);
        outcome.minted = minted;

        // 3. Transactions, sequentially. Failures skip the transaction,
        //    never the block.
        for tx in txs {
            match self.apply_transaction(tx, ctx.height, params) {
                Ok(res) => {
                    outcome.gas_used += res.gas_used;
                    if let Some(c) = res.compute {
                        outcome.compute_results.push(c);
                    }
                    outcome.applied.push(tx.clone());
                }
                Err(e) => {
                    debug!(tx = %tx.hash(), error = %e, "transaction skipped");
                    outcome.failed.push((tx.hash(), e));
                }
            }
        }

        // Miner pool settles against the submissions recorded above.
        crate::economics::rewards::distribute_miner_rewards(
            self,
            miner_pool,
            &outcome.compute_results,
        );

        // 4. Performance bookkeeping, with jailing at the miss threshold.
        crate::slashing::update_performance(self, ctx, params);

        // 5. Epoch transition
        if params.is_epoch_boundary(ctx.height) {
            crate::slashing::epoch_transition(self, ctx.height, params);
            self.epoch_index = params.epoch_at(ctx.height);
        }

        outcome
    }

    // ── State root ────────────────────────────────────────────────────────

    /// Canonical hash of the committed state: validators and accounts in
    /// address order, then the economic counters. Pure function of the state.
    pub fn state_root(&self) -> Hash32 {
        fn leaf(tag: &[u8], key: &str, body: &[u8]) -> Hash32 {
            let mut buf = Vec::with_capacity(tag.len() + 2 + key.len() + body.len());
            buf.extend_from_slice(tag);
            buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(body);
            hash_bytes(&buf)
        }

        let mut leaves = Vec::with_capacity(self.validators.len() + self.accounts.len() + 1);
        for (addr, v) in &self.validators {
            leaves.push(leaf(b"val", addr, &bincode::serialize(v).unwrap_or_default()));
        }
        for (addr, a) in &self.accounts {
            leaves.push(leaf(b"acc", addr, &bincode::serialize(a).unwrap_or_default()));
        }

        let mut counters = Vec::with_capacity(3 + 64 + 8);
        counters.extend_from_slice(b"eco");
        counters.extend_from_slice(&self.total_minted.to_be_bytes::<32>());
        counters.extend_from_slice(&self.total_burned.to_be_bytes::<32>());
        counters.extend_from_slice(&self.epoch_index.to_le_bytes());
        leaves.push(hash_bytes(&counters));

        crate::merkle::merkle_root(&leaves)
    }

    /// Stateless admission checks shared by RPC and P2P ingress: structure,
    /// signature, address derivation, gas bounds. Nonce and balance are
    /// checked against state at application time.
    pub fn precheck(tx: &Tx, params: &ChainParams) -> Result<(), StateError> {
        precheck_tx(tx, params)
    }

    /// Supply identity left-hand side: balances + staked power + unbonding.
    /// Equals `total_minted - total_burned + genesis_supply` at every block
    /// boundary.
    pub fn circulating_and_locked(&self) -> Amount {
        let accounts = self.accounts.values().fold(Amount::ZERO, |acc, a| {
            acc + a.balance + a.unbonding_total()
        });
        self.validators
            .values()
            .fold(accounts, |acc, v| acc + v.power())
    }
}

/// Stateless transaction checks used at mempool admission: structure,
/// signature, sender address derivation, and gas bounds.
pub fn precheck_tx(tx: &Tx, params: &ChainParams) -> Result<(), StateError> {
    if tx.pubkey.0.is_empty() || tx.signature.0.is_empty() {
        return Err(StateError::Malformed("missing signature or pubkey".into()));
    }
    let derived = account_address(&tx.pubkey).map_err(|_| StateError::InvalidSignature)?;
    if derived != tx.from {
        return Err(StateError::InvalidSignature);
    }
    Ed25519Verifier::verify(&tx.pubkey, &tx.sign_bytes(), &tx.signature)
        .map_err(|_| StateError::InvalidSignature)?;
    if tx.gas_limit < tx.tx_type.base_gas() {
        return Err(StateError::GasLimitTooLow);
    }
    if tx.gas_price < params.min_gas_price {
        return Err(StateError::GasPriceTooLow);
    }
    if tx.tx_type == TxType::Transfer && tx.to.is_none() {
        return Err(StateError::Malformed("transfer requires recipient".into()));
    }
    Ok(())
}
