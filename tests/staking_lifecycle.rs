//! Stake, delegate, reward, undelegate: the full delegator lifecycle with
//! exact reward arithmetic.

mod common;

use common::*;
use computechain::types::{cpc, Amount, TxPayload, TxType};

/// One validator (10_000 self-stake, 10% commission), Bob delegates 1_000.
/// Block reward 10 CPC, 30% to the miner pool, so the validator pool is
/// 7 CPC: 0.7 commission, the remaining 6.3 pro-rata 10:1.
#[test]
fn reward_split_with_delegator() {
    let bob = keypair(2);
    let mut net = TestNet::new(&[cpc(10_000)], &[(&bob, cpc(2_000))]);
    let val_addr = cons(&net.validators[0]);
    let operator = acct(&net.validators[0]);

    let delegate = signed_tx(
        &bob,
        TxType::Delegate,
        None,
        cpc(1_000),
        0,
        1_000,
        TxPayload::ValidatorTarget { validator: val_addr.clone() },
    );
    net.produce_block(0, vec![delegate]);

    let operator_before = net.state.balance_of(&operator);
    let bob_before = net.state.balance_of(&acct(&bob));
    let burned_before = net.state.total_burned;
    let minted_before = net.state.total_minted;

    // An empty block: only the reward flow moves balances.
    net.produce_block(1, vec![]);

    let pool = cpc(7);
    let commission = pool / Amount::from(10u64); // 0.7 CPC
    let remainder = pool - commission;           // 6.3 CPC
    let operator_share = commission + remainder * cpc(10_000) / cpc(11_000);
    let bob_share = remainder * cpc(1_000) / cpc(11_000);

    assert_eq!(net.state.total_minted - minted_before, cpc(10));
    assert_eq!(net.state.balance_of(&operator) - operator_before, operator_share);
    assert_eq!(net.state.balance_of(&acct(&bob)) - bob_before, bob_share);

    // Miner pool (3 CPC) burned — no SUBMIT_RESULT in the block — plus the
    // flooring residue of the validator pool.
    let residue = pool - operator_share - bob_share;
    assert_eq!(net.state.total_burned - burned_before, cpc(3) + residue);

    // Both recipients got reward history entries.
    assert!(!net.state.accounts[&operator].reward_history.is_empty());
    assert!(!net.state.accounts[&acct(&bob)].reward_history.is_empty());
    net.assert_supply_identity();
}

/// Undelegating locks tokens until `unbonding_blocks` elapse, then the
/// balance is credited automatically at a block boundary.
#[test]
fn undelegate_unbonds_then_matures() {
    let bob = keypair(2);
    let mut net = TestNet::new(&[cpc(10_000)], &[(&bob, cpc(2_000))]);
    let val_addr = cons(&net.validators[0]);

    let delegate = signed_tx(
        &bob,
        TxType::Delegate,
        None,
        cpc(1_000),
        0,
        1_000,
        TxPayload::ValidatorTarget { validator: val_addr.clone() },
    );
    net.produce_block(0, vec![delegate]);

    let undelegate = signed_tx(
        &bob,
        TxType::Undelegate,
        None,
        cpc(500),
        1,
        1_000,
        TxPayload::ValidatorTarget { validator: val_addr.clone() },
    );
    let (block, _) = net.produce_block(1, vec![undelegate]);
    let undelegate_height = block.header.height;
    let completion = undelegate_height + net.params().unbonding_blocks;

    let bob_acct = acct(&bob);
    assert_eq!(net.state.accounts[&bob_acct].unbonding.len(), 1);
    assert_eq!(net.state.accounts[&bob_acct].unbonding[0].completion_height, completion);
    assert_eq!(net.state.validators[&val_addr].total_delegated, cpc(500));

    // Produce until just before maturation: still locked.
    while net.tip.height < completion - 1 {
        net.produce_empty_blocks(1);
    }
    assert_eq!(net.state.accounts[&bob_acct].unbonding.len(), 1);
    let before = net.state.balance_of(&bob_acct);

    // The maturation block credits the 500 CPC (plus Bob's reward share
    // for that block).
    net.produce_empty_blocks(1);
    assert!(net.state.accounts[&bob_acct].unbonding.is_empty());
    let credited = net.state.balance_of(&bob_acct) - before;
    assert!(credited >= cpc(500), "matured unbonding credits the full amount");
    net.assert_supply_identity();
}

/// Delegating to a validator twice aggregates into one record.
#[test]
fn repeated_delegation_aggregates() {
    let bob = keypair(2);
    let mut net = TestNet::new(&[cpc(10_000)], &[(&bob, cpc(2_000))]);
    let val_addr = cons(&net.validators[0]);

    for (nonce, slot) in [(0u64, 0u64), (1, 1)] {
        let delegate = signed_tx(
            &bob,
            TxType::Delegate,
            None,
            cpc(200),
            nonce,
            1_000,
            TxPayload::ValidatorTarget { validator: val_addr.clone() },
        );
        net.produce_block(slot, vec![delegate]);
    }

    let v = &net.state.validators[&val_addr];
    assert_eq!(v.delegations.len(), 1, "one record per (delegator, validator)");
    assert_eq!(v.delegation_of(&acct(&bob)).unwrap().amount, cpc(400));
    assert_eq!(v.total_delegated, cpc(400));
    assert_eq!(v.power(), cpc(10_400));
}

/// Validator power identity holds across arbitrary staking traffic.
#[test]
fn power_equals_self_stake_plus_delegations() {
    let bob = keypair(2);
    let carol = keypair(3);
    let mut net = TestNet::new(&[cpc(10_000)], &[(&bob, cpc(2_000)), (&carol, cpc(2_000))]);
    let val_addr = cons(&net.validators[0]);

    let d1 = signed_tx(
        &bob,
        TxType::Delegate,
        None,
        cpc(700),
        0,
        1_000,
        TxPayload::ValidatorTarget { validator: val_addr.clone() },
    );
    let d2 = signed_tx(
        &carol,
        TxType::Delegate,
        None,
        cpc(300),
        0,
        1_000,
        TxPayload::ValidatorTarget { validator: val_addr.clone() },
    );
    net.produce_block(0, vec![d1, d2]);

    let u1 = signed_tx(
        &bob,
        TxType::Undelegate,
        None,
        cpc(250),
        1,
        1_000,
        TxPayload::ValidatorTarget { validator: val_addr.clone() },
    );
    net.produce_block(1, vec![u1]);

    for v in net.state.validators.values() {
        let from_records: Amount = v
            .delegations
            .iter()
            .fold(Amount::ZERO, |acc, d| acc + d.amount);
        assert_eq!(v.total_delegated, from_records);
        assert_eq!(v.power(), v.self_stake + from_records);
    }
    net.assert_supply_identity();
}
