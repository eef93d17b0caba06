use crate::crypto::PublicKeyBytes;
use crate::types::{Amount, Height};
use serde::{Deserialize, Serialize};

/// An individual delegation position inside a validator record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: String,
    pub amount: Amount,
    pub created_height: Height,
}

/// Tokens released from a delegation or an ejected validator, locked until
/// `completion_height`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnbondingEntry {
    pub validator: String,
    pub amount: Amount,
    pub completion_height: Height,
}

/// Reward credited to an account at an epoch. Query-only history; the
/// balances themselves are consensus-relevant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub epoch: u64,
    pub amount: Amount,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: Amount,
    pub nonce: u64,
    pub reward_history: Vec<RewardEntry>,
    pub unbonding: Vec<UnbondingEntry>,
}

impl Account {
    pub fn with_balance(balance: Amount) -> Self {
        Self { balance, ..Default::default() }
    }

    pub fn unbonding_total(&self) -> Amount {
        self.unbonding.iter().fold(Amount::ZERO, |acc, e| acc + e.amount)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    /// Consensus address (cpcvalcons…), derived from `pubkey`.
    pub address: String,
    /// Operator account address (cpc…) that created the validator.
    pub operator: String,
    pub pubkey: PublicKeyBytes,
    pub self_stake: Amount,
    pub total_delegated: Amount,
    pub commission_bps: u32,

    pub name: String,
    pub website: String,
    pub description: String,

    pub delegations: Vec<Delegation>,

    // Performance tracking
    pub blocks_proposed: u64,
    pub blocks_expected: u64,
    /// Consecutive missed proposal slots.
    pub missed_blocks: u64,
    pub last_seen_height: Height,
    /// Millionths, clamped to [0, 1_000_000].
    pub uptime_score: u64,
    pub performance_score: u64,

    // Penalties & status
    pub total_penalties: Amount,
    pub jail_count: u32,
    /// 0 = not jailed.
    pub jailed_until_height: Height,
    pub is_active: bool,
    pub joined_height: Height,
}

impl Validator {
    pub fn new(
        address: String,
        operator: String,
        pubkey: PublicKeyBytes,
        self_stake: Amount,
        commission_bps: u32,
        joined_height: Height,
    ) -> Self {
        Self {
            address,
            operator,
            pubkey,
            self_stake,
            total_delegated: Amount::ZERO,
            commission_bps,
            name: String::new(),
            website: String::new(),
            description: String::new(),
            delegations: Vec::new(),
            blocks_proposed: 0,
            blocks_expected: 0,
            missed_blocks: 0,
            last_seen_height: 0,
            uptime_score: crate::economics::SCORE_SCALE,
            performance_score: crate::economics::SCORE_SCALE,
            total_penalties: Amount::ZERO,
            jail_count: 0,
            jailed_until_height: 0,
            is_active: false,
            joined_height,
        }
    }

    pub fn power(&self) -> Amount {
        self.self_stake + self.total_delegated
    }

    pub fn is_jailed(&self, current_height: Height) -> bool {
        self.jailed_until_height > current_height
    }

    pub fn delegation_of(&self, delegator: &str) -> Option<&Delegation> {
        self.delegations.iter().find(|d| d.delegator == delegator)
    }

    pub fn delegation_of_mut(&mut self, delegator: &str) -> Option<&mut Delegation> {
        self.delegations.iter_mut().find(|d| d.delegator == delegator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::cpc;

    fn validator() -> Validator {
        Validator::new(
            "cpcvalcons1x".into(),
            "cpc1x".into(),
            PublicKeyBytes(vec![1; 32]),
            cpc(1_000),
            1_000,
            0,
        )
    }

    #[test]
    fn power_is_self_stake_plus_delegations() {
        let mut v = validator();
        assert_eq!(v.power(), cpc(1_000));
        v.delegations.push(Delegation { delegator: "cpc1d".into(), amount: cpc(50), created_height: 1 });
        v.total_delegated = cpc(50);
        assert_eq!(v.power(), cpc(1_050));
    }

    #[test]
    fn jail_window_is_exclusive_of_release_height() {
        let mut v = validator();
        v.jailed_until_height = 10;
        assert!(v.is_jailed(9));
        assert!(!v.is_jailed(10));
    }
}
