//! Missed blocks → jail → graduated slashing → permanent ejection, driven
//! through real block production with skipped slots.

mod common;

use common::*;
use computechain::types::{cpc, Amount, TxPayload, TxType};

/// Walk the chain forward, producing empty blocks only in slots whose
/// designated proposer is NOT `offline`. Stops as soon as `stop` returns
/// true. Panics if it runs out of slots.
fn run_while_offline(net: &mut TestNet, offline: &str, stop: impl Fn(&TestNet) -> bool) {
    let mut slot = net.tip.slot.map(|s| s + 1).unwrap_or(0);
    for _ in 0..2_000 {
        if stop(net) {
            return;
        }
        let active: Vec<String> = net
            .state
            .active_set()
            .iter()
            .map(|v| v.address.clone())
            .collect();
        let designated = &active[(slot % active.len() as u64) as usize];
        if designated == offline {
            slot += 1;
            continue;
        }
        net.produce_block(slot, vec![]);
        slot += 1;
    }
    panic!("stop condition never reached");
}

fn setup() -> (TestNet, String) {
    let faucet = keypair(9);
    let mut net = TestNet::new(
        &[cpc(10_000), cpc(10_000), cpc(10_000)],
        &[(&faucet, cpc(100_000))],
    );
    // Keep epoch transitions out of the way: this suite exercises the
    // in-block jail path, not the epoch uptime filter.
    net.genesis.params.epoch_length_blocks = 100_000;
    let offline = cons(&net.validators[2]);
    (net, offline)
}

#[test]
fn twenty_missed_slots_jail_and_slash_five_percent() {
    let (mut net, offline) = setup();

    run_while_offline(&mut net, &offline, |net| {
        net.state.validators[&offline].jail_count > 0
    });

    let v = &net.state.validators[&offline];
    assert_eq!(v.jail_count, 1);
    assert_eq!(v.power(), cpc(9_500), "first jail slashes 5% of 10_000");
    assert_eq!(v.total_penalties, cpc(500), "penalty burned, not redistributed");
    assert!(!v.is_active);
    assert_eq!(v.missed_blocks, 0, "miss counter resets on jail");
    // Jailed during the block that recorded the 20th miss, i.e. the tip.
    assert_eq!(v.jailed_until_height, net.tip.height + net.params().jail_duration_blocks);
    net.assert_supply_identity();
}

#[test]
fn graduated_slashing_ends_in_permanent_ejection() {
    let (mut net, offline) = setup();
    let faucet = keypair(9);
    let offline_kp = net.validators[2].clone();
    let operator = acct(&offline_kp);

    // Fund the operator for two unjail fees.
    let fund = transfer(&faucet, &operator, cpc(3_000), 0);
    let slot = net.tip.slot.map(|s| s + 1).unwrap_or(0);
    net.produce_block(slot, vec![fund]);

    // Round 1: miss until jailed, 5% slash.
    run_while_offline(&mut net, &offline, |net| {
        net.state.validators[&offline].jail_count == 1
    });
    assert_eq!(net.state.validators[&offline].power(), cpc(9_500));

    // Unjail (1_000 CPC burned on top of gas) and go offline again.
    let nonce = net.state.nonce_of(&operator);
    let unjail = signed_tx(
        &offline_kp,
        TxType::Unjail,
        None,
        Amount::ZERO,
        nonce,
        1_000,
        TxPayload::ValidatorKey { pubkey: computechain::crypto::Signer::public_key(&offline_kp) },
    );
    let slot = net.tip.slot.unwrap() + 1;
    let (_, outcome) = net.produce_block(slot, vec![unjail]);
    assert!(outcome.failed.is_empty(), "unjail applies: {:?}", outcome.failed);
    assert!(net.state.validators[&offline].is_active);

    // Round 2: 10% of 9_500 = 950.
    run_while_offline(&mut net, &offline, |net| {
        net.state.validators[&offline].jail_count == 2
    });
    assert_eq!(net.state.validators[&offline].power(), cpc(9_500) - cpc(950));

    // Unjail again, then the third strike ejects permanently.
    let nonce = net.state.nonce_of(&operator);
    let unjail = signed_tx(
        &offline_kp,
        TxType::Unjail,
        None,
        Amount::ZERO,
        nonce,
        1_000,
        TxPayload::ValidatorKey { pubkey: computechain::crypto::Signer::public_key(&offline_kp) },
    );
    let slot = net.tip.slot.unwrap() + 1;
    let (_, outcome) = net.produce_block(slot, vec![unjail]);
    assert!(outcome.failed.is_empty(), "second unjail applies: {:?}", outcome.failed);

    run_while_offline(&mut net, &offline, |net| {
        net.state.validators[&offline].jail_count >= 3
    });

    let v = &net.state.validators[&offline];
    assert_eq!(v.jail_count, 3);
    assert_eq!(v.power(), Amount::ZERO, "full slash on the third strike");
    assert!(!v.is_active);

    // Ejection is permanent: epoch transitions never bring it back.
    net.genesis.params.epoch_length_blocks = 1;
    let slot = net.tip.slot.unwrap() + 1;
    net.produce_block(slot, vec![]);
    assert!(!net.state.validators[&offline].is_active);
    net.assert_supply_identity();
}

/// An ejected validator's delegators get their remaining delegations back
/// through immediately-maturing unbonding entries; only self-stake burns.
#[test]
fn ejection_releases_delegations_to_delegators() {
    let bob = keypair(8);
    let faucet = keypair(9);
    let mut net = TestNet::new(
        &[cpc(10_000), cpc(10_000), cpc(10_000)],
        &[(&faucet, cpc(100_000)), (&bob, cpc(5_000))],
    );
    net.genesis.params.epoch_length_blocks = 100_000;
    let offline = cons(&net.validators[2]);

    let delegate = signed_tx(
        &bob,
        TxType::Delegate,
        None,
        cpc(1_000),
        0,
        1_000,
        TxPayload::ValidatorTarget { validator: offline.clone() },
    );
    let slot = net.tip.slot.map(|s| s + 1).unwrap_or(0);
    net.produce_block(slot, vec![delegate]);
    assert_eq!(net.state.validators[&offline].power(), cpc(11_000));

    // Push the validator straight to the ejection strike.
    {
        let v = net.state.validators.get_mut(&offline).unwrap();
        v.jail_count = 2;
        v.jailed_until_height = 0;
        v.is_active = true;
    }
    run_while_offline(&mut net, &offline, |net| {
        net.state.validators[&offline].jail_count >= 3
    });

    let v = &net.state.validators[&offline];
    assert_eq!(v.power(), Amount::ZERO);
    assert!(v.delegations.is_empty());

    // Bob's delegation survived as an unbonding entry and matured at the
    // next block boundary (completion height == ejection height).
    let bob_acct = acct(&bob);
    let balance = net.state.balance_of(&bob_acct);
    let pending: Amount = net.state.accounts[&bob_acct]
        .unbonding
        .iter()
        .fold(Amount::ZERO, |acc, e| acc + e.amount);
    // Some portion of the slashed validator's earlier penalties may have
    // come out of the delegation; at ejection the rest is returned.
    assert!(balance + pending >= cpc(5_000) - cpc(1_000));
    net.assert_supply_identity();
}
