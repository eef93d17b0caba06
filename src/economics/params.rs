use crate::types::{cpc, Amount};
use serde::{Deserialize, Serialize};

/// Basis-point denominator for all rate parameters.
pub const BPS_DENOM: u64 = 10_000;

/// Fixed-point scale for uptime and performance scores.
pub const SCORE_SCALE: u64 = 1_000_000;

/// Community-pool account. Receives the configured fraction of fees;
/// governance-controlled spending is out of scope.
pub const TREASURY_ADDRESS: &str = "cpc1treasury0000000000000000000000000000000";

/// Commission assigned to a validator created by its first STAKE.
pub const DEFAULT_COMMISSION_BPS: u32 = 1_000;

/// Fraction of the amount forfeited when unstaking while jailed.
pub const JAIL_UNSTAKE_PENALTY_BPS: u32 = 1_000;

/// Sanity bound on a compute-result weight.
pub const MAX_RESULT_WEIGHT: u64 = 1_000_000;

/// Consensus parameters shared by every node of a network. Serialized inside
/// the genesis document; the genesis hash therefore pins them network-wide.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainParams {
    pub block_time_seconds: u64,
    pub epoch_length_blocks: u64,
    pub max_validators: usize,
    pub min_validator_stake: Amount,
    pub min_delegation: Amount,
    pub max_commission_bps: u32,
    pub unjail_fee: Amount,
    pub jail_duration_blocks: u64,
    pub slashing_base_rate_bps: u32,
    pub ejection_threshold_jails: u32,
    pub max_missed_blocks_sequential: u64,
    /// Minimum uptime score (millionths) to stay in the active set.
    pub min_uptime_score_millionths: u64,
    pub unbonding_blocks: u64,
    pub block_reward: Amount,
    pub halving_period_blocks: u64,
    /// Fraction of the block reward routed to the miner pool.
    pub miner_reward_bps: u32,
    /// Fraction of each fee credited to the treasury; the remainder burns.
    pub fee_treasury_bps: u32,
    pub max_tx_per_block: usize,
    pub block_gas_limit: u64,
    pub min_gas_price: u64,
    pub mempool_tx_ttl_seconds: u64,
    pub snapshot_interval_blocks: u64,
    pub snapshot_keep: usize,
    pub max_validators_per_delegator: usize,
    pub max_validator_power_share_bps: u32,
    pub max_timestamp_skew_seconds: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::devnet()
    }
}

impl ChainParams {
    pub fn devnet() -> Self {
        Self {
            block_time_seconds: 5,
            epoch_length_blocks: 10,
            max_validators: 5,
            min_validator_stake: cpc(1_000),
            min_delegation: cpc(100),
            max_commission_bps: 2_000,
            unjail_fee: cpc(1_000),
            jail_duration_blocks: 100,
            slashing_base_rate_bps: 500,
            ejection_threshold_jails: 3,
            max_missed_blocks_sequential: 20,
            min_uptime_score_millionths: 750_000,
            unbonding_blocks: 100,
            block_reward: cpc(10),
            halving_period_blocks: 1_000_000,
            miner_reward_bps: 3_000,
            fee_treasury_bps: 0,
            max_tx_per_block: 500,
            block_gas_limit: 50_000_000,
            min_gas_price: 1_000,
            mempool_tx_ttl_seconds: 3_600,
            snapshot_interval_blocks: 500,
            snapshot_keep: 10,
            max_validators_per_delegator: 10,
            max_validator_power_share_bps: 2_000,
            max_timestamp_skew_seconds: 15,
        }
    }

    pub fn testnet() -> Self {
        Self {
            block_time_seconds: 30,
            epoch_length_blocks: 100,
            max_validators: 21,
            min_validator_stake: cpc(100_000),
            min_gas_price: 5_000,
            block_gas_limit: 15_000_000,
            max_tx_per_block: 1_000,
            ..Self::devnet()
        }
    }

    /// Block reward with halving every `halving_period_blocks`.
    pub fn block_reward_at(&self, height: u64) -> Amount {
        let halvings = height / self.halving_period_blocks.max(1);
        if halvings >= 256 {
            return Amount::ZERO;
        }
        self.block_reward >> usize::try_from(halvings).unwrap_or(255)
    }

    /// Split the minted block reward into (validator_pool, miner_pool).
    pub fn split_block_reward(&self, total: Amount) -> (Amount, Amount) {
        let miner = total * Amount::from(self.miner_reward_bps) / Amount::from(BPS_DENOM);
        (total - miner, miner)
    }

    /// Split a fee into (treasury_share, burned).
    pub fn split_fee(&self, fee: Amount) -> (Amount, Amount) {
        let treasury = fee * Amount::from(self.fee_treasury_bps) / Amount::from(BPS_DENOM);
        (treasury, fee - treasury)
    }

    pub fn is_epoch_boundary(&self, height: u64) -> bool {
        height > 0 && height % self.epoch_length_blocks.max(1) == 0
    }

    pub fn epoch_at(&self, height: u64) -> u64 {
        height / self.epoch_length_blocks.max(1)
    }
}
