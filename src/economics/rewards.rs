//! Block reward minting and distribution.
//!
//! Each block mints `block_reward_at(height)` and splits it between the
//! validator pool and the miner pool (`miner_reward_bps`). The validator
//! pool is shared by every active validator proportionally to power; inside
//! a validator's share the operator keeps the commission plus the self-stake
//! fraction, and delegators receive the rest pro-rata. The miner pool is
//! divided over the compute-result weights recorded in the block.
//!
//! All division floors; residuals burn.

use crate::economics::{ChainParams, RewardEntry, BPS_DENOM};
use crate::execution::ChainState;
use crate::types::{Amount, ComputeResult, Height};
use tracing::debug;

/// Mint the block reward and distribute the validator pool. Returns the
/// total minted amount and the miner pool, which the caller settles once the
/// block's SUBMIT_RESULT transactions are known.
pub fn distribute_validator_rewards(
    state: &mut ChainState,
    height: Height,
    params: &ChainParams,
) -> (Amount, Amount) {
    let reward = params.block_reward_at(height);
    if reward == Amount::ZERO {
        return (Amount::ZERO, Amount::ZERO);
    }
    state.total_minted += reward;
    let (validator_pool, miner_pool) = params.split_block_reward(reward);
    let epoch = params.epoch_at(height);

    let recipients: Vec<(String, String, Amount, Amount, u32, Vec<(String, Amount)>)> = state
        .validators
        .values()
        .filter(|v| v.is_active && v.power() > Amount::ZERO)
        .map(|v| {
            (
                v.address.clone(),
                v.operator.clone(),
                v.power(),
                v.self_stake,
                v.commission_bps,
                v.delegations
                    .iter()
                    .map(|d| (d.delegator.clone(), d.amount))
                    .collect(),
            )
        })
        .collect();

    let total_power: Amount = recipients
        .iter()
        .fold(Amount::ZERO, |acc, (_, _, power, _, _, _)| acc + *power);

    if total_power == Amount::ZERO {
        state.total_burned += validator_pool;
        return (reward, miner_pool);
    }

    let mut distributed = Amount::ZERO;
    for (addr, operator, power, self_stake, commission_bps, delegations) in &recipients {
        let share = validator_pool * *power / total_power;
        if share == Amount::ZERO {
            continue;
        }
        let commission = share * Amount::from(*commission_bps) / Amount::from(BPS_DENOM);
        let remainder = share - commission;

        let operator_reward = commission + remainder * *self_stake / *power;
        credit(state, operator, epoch, operator_reward);
        distributed += operator_reward;

        for (delegator, amount) in delegations {
            let r = remainder * *amount / *power;
            if r > Amount::ZERO {
                credit(state, delegator, epoch, r);
                distributed += r;
            }
        }
        debug!(validator = %addr, share = %share, "validator reward distributed");
    }

    // Flooring residue and shares of sub-unit validators.
    state.total_burned += validator_pool - distributed;
    (reward, miner_pool)
}

/// Distribute the miner pool over the compute-result weights recorded in
/// this block. With no submissions (or zero total weight) the pool burns.
pub fn distribute_miner_rewards(
    state: &mut ChainState,
    miner_pool: Amount,
    results: &[ComputeResult],
) {
    if miner_pool == Amount::ZERO {
        return;
    }
    let total_weight: u64 = results.iter().map(|r| r.weight).sum();
    if total_weight == 0 {
        state.total_burned += miner_pool;
        return;
    }

    let mut distributed = Amount::ZERO;
    for res in results {
        let r = miner_pool * Amount::from(res.weight) / Amount::from(total_weight);
        if r > Amount::ZERO {
            state.accounts.entry(res.worker.clone()).or_default().balance += r;
            distributed += r;
        }
    }
    state.total_burned += miner_pool - distributed;
}

fn credit(state: &mut ChainState, addr: &str, epoch: u64, amount: Amount) {
    if amount == Amount::ZERO {
        return;
    }
    let acc = state.accounts.entry(addr.to_string()).or_default();
    acc.balance += amount;
    match acc.reward_history.last_mut() {
        Some(last) if last.epoch == epoch => last.amount += amount,
        _ => acc.reward_history.push(RewardEntry { epoch, amount }),
    }
}
