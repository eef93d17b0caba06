//! Validator performance tracking, graduated slashing, jailing, and the
//! epoch-boundary active-set selection.
//!
//! Penalty schedule by jail count: 5% of power, then 10%, then 100% with
//! permanent ejection. Penalties burn. On ejection, remaining delegations
//! are returned to their delegators as immediately-maturing unbonding
//! entries; the validator's remaining self-stake burns in full.

use crate::economics::{ChainParams, UnbondingEntry, Validator, BPS_DENOM, SCORE_SCALE};
use crate::execution::{BlockContext, ChainState};
use crate::types::{Amount, Height};
use tracing::{info, warn};

/// Uptime score in millionths, clamped to [0, SCORE_SCALE].
pub fn uptime_score(v: &Validator) -> u64 {
    if v.blocks_expected == 0 {
        return SCORE_SCALE;
    }
    let score = v.blocks_proposed.saturating_mul(SCORE_SCALE) / v.blocks_expected;
    score.min(SCORE_SCALE)
}

/// Combined performance score in millionths:
/// 60% uptime + 20% stake ratio + 20% penalty headroom.
pub fn performance_score(v: &Validator, total_staked: Amount) -> u64 {
    let uptime = uptime_score(v);

    let power = v.power();
    let stake_ratio: u64 = if total_staked == Amount::ZERO {
        0
    } else {
        (power * Amount::from(SCORE_SCALE) / total_staked)
            .try_into()
            .unwrap_or(SCORE_SCALE)
    };

    let penalty_ratio: u64 = if power == Amount::ZERO {
        SCORE_SCALE / 2
    } else {
        let ratio: u64 = (v.total_penalties * Amount::from(SCORE_SCALE) / power)
            .try_into()
            .unwrap_or(u64::MAX);
        ratio.min(SCORE_SCALE / 2)
    };

    let score = (600_000u64 * uptime + 200_000 * stake_ratio + 200_000 * (SCORE_SCALE - penalty_ratio))
        / SCORE_SCALE;
    score.min(SCORE_SCALE)
}

/// Per-block performance bookkeeping: credit the proposer, charge every
/// designated proposer of a skipped slot, and jail at the miss threshold.
pub fn update_performance(state: &mut ChainState, ctx: &BlockContext, params: &ChainParams) {
    // Proposer of this block.
    if let Some(v) = state.validators.get_mut(&ctx.proposer) {
        v.blocks_proposed += 1;
        v.blocks_expected += 1;
        v.missed_blocks = 0;
        v.last_seen_height = ctx.height;
    }

    // Absentees: the designated proposer of every slot skipped between the
    // parent block and this one.
    let first_missed = ctx.prev_slot.map(|s| s + 1).unwrap_or(0);
    if first_missed >= ctx.slot {
        return;
    }

    let active: Vec<String> = state
        .active_set()
        .iter()
        .map(|v| v.address.clone())
        .collect();
    if active.is_empty() {
        return;
    }

    let mut to_jail = Vec::new();
    for slot in first_missed..ctx.slot {
        let addr = &active[(slot % active.len() as u64) as usize];
        if let Some(v) = state.validators.get_mut(addr) {
            if !v.is_active {
                continue;
            }
            v.blocks_expected += 1;
            v.missed_blocks += 1;
            warn!(validator = %addr, slot, missed = v.missed_blocks, "missed proposal slot");
            if v.missed_blocks >= params.max_missed_blocks_sequential && !to_jail.contains(addr) {
                to_jail.push(addr.clone());
            }
        }
    }
    for addr in to_jail {
        jail_validator(state, &addr, ctx.height, params);
    }
}

/// Jail a validator, applying the graduated penalty for its jail count.
pub fn jail_validator(state: &mut ChainState, addr: &str, height: Height, params: &ChainParams) {
    let Some(v) = state.validators.get_mut(addr) else { return };

    let ejecting = v.jail_count + 1 >= params.ejection_threshold_jails;
    if ejecting {
        let (burned, released) = eject(v, height);
        for (delegator, entry) in released {
            state.accounts.entry(delegator).or_default().unbonding.push(entry);
        }
        state.total_burned += burned;
        warn!(validator = %addr, burned = %burned, "validator permanently ejected");
        return;
    }

    let rate_bps: u64 = match v.jail_count {
        0 => params.slashing_base_rate_bps as u64,
        _ => 2 * params.slashing_base_rate_bps as u64,
    };
    let penalty = v.power() * Amount::from(rate_bps) / Amount::from(BPS_DENOM);

    // Self-stake absorbs the penalty first; the shortfall prorates across
    // delegations, largest first.
    let from_self = penalty.min(v.self_stake);
    v.self_stake -= from_self;
    let shortfall = penalty - from_self;
    if shortfall > Amount::ZERO {
        deduct_from_delegations(v, shortfall);
    }

    v.total_penalties += penalty;
    v.jail_count += 1;
    v.jailed_until_height = height + params.jail_duration_blocks;
    v.missed_blocks = 0;
    v.is_active = false;
    let jail_count = v.jail_count;
    let until = v.jailed_until_height;
    state.total_burned += penalty;

    warn!(
        validator = %addr,
        penalty = %penalty,
        jail_count,
        until,
        "validator jailed"
    );
}

/// Third-strike ejection: delegations are returned to their delegators as
/// immediately-maturing unbonding entries; the remaining self-stake burns.
/// Returns the burned amount and the released entries keyed by delegator.
fn eject(v: &mut Validator, height: Height) -> (Amount, Vec<(String, UnbondingEntry)>) {
    let burned = v.self_stake;
    v.total_penalties += burned;
    v.self_stake = Amount::ZERO;

    let address = v.address.clone();
    let released: Vec<(String, UnbondingEntry)> = v
        .delegations
        .drain(..)
        .map(|d| {
            let entry = UnbondingEntry {
                validator: address.clone(),
                amount: d.amount,
                completion_height: height,
            };
            (d.delegator, entry)
        })
        .collect();

    v.total_delegated = Amount::ZERO;
    v.jail_count += 1;
    v.jailed_until_height = u64::MAX;
    v.missed_blocks = 0;
    v.is_active = false;
    (burned, released)
}

/// Proportional deduction across delegations in descending amount order,
/// with the flooring remainder taken greedily from the largest positions.
fn deduct_from_delegations(v: &mut Validator, shortfall: Amount) {
    let total = v.total_delegated;
    if total == Amount::ZERO {
        return;
    }
    let shortfall = shortfall.min(total);

    let mut order: Vec<usize> = (0..v.delegations.len()).collect();
    order.sort_by(|&a, &b| {
        v.delegations[b]
            .amount
            .cmp(&v.delegations[a].amount)
            .then_with(|| v.delegations[a].delegator.cmp(&v.delegations[b].delegator))
    });

    let mut taken = Amount::ZERO;
    for &i in &order {
        let cut = shortfall * v.delegations[i].amount / total;
        v.delegations[i].amount -= cut;
        taken += cut;
    }
    let mut remainder = shortfall - taken;
    for &i in &order {
        if remainder == Amount::ZERO {
            break;
        }
        let cut = remainder.min(v.delegations[i].amount);
        v.delegations[i].amount -= cut;
        remainder -= cut;
    }

    v.delegations.retain(|d| d.amount > Amount::ZERO);
    v.total_delegated -= shortfall;
}

/// Epoch boundary: refresh scores and select the next active set.
pub fn epoch_transition(state: &mut ChainState, height: Height, params: &ChainParams) {
    let total_staked = state.total_staked_power();

    for v in state.validators.values_mut() {
        v.uptime_score = uptime_score(v);
    }
    let scores: Vec<(String, u64)> = state
        .validators
        .values()
        .map(|v| (v.address.clone(), performance_score(v, total_staked)))
        .collect();
    for (addr, score) in scores {
        if let Some(v) = state.validators.get_mut(&addr) {
            v.performance_score = score;
        }
    }

    let mut candidates: Vec<(u64, Amount, String)> = state
        .validators
        .values()
        .filter(|v| {
            v.power() >= params.min_validator_stake
                && !v.is_jailed(height)
                && v.jail_count < params.ejection_threshold_jails
                // Inclusive lower bound: exactly the minimum uptime stays in.
                && !(v.blocks_expected > 0 && v.uptime_score < params.min_uptime_score_millionths)
        })
        .map(|v| (v.performance_score, v.power(), v.address.clone()))
        .collect();

    candidates.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    candidates.truncate(params.max_validators);

    let selected: std::collections::BTreeSet<String> =
        candidates.into_iter().map(|(_, _, addr)| addr).collect();
    for v in state.validators.values_mut() {
        v.is_active = selected.contains(&v.address);
    }

    info!(
        height,
        active = selected.len(),
        "epoch transition: active set recomputed"
    );
}
