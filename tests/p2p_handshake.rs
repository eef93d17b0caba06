//! Peer session gating on the genesis hash, and gossip over real TCP
//! sessions on loopback.

mod common;

use common::*;
use computechain::net::{NetEvent, P2pConfig, P2pService};
use computechain::types::{cpc, Hash32};
use std::time::Duration;

fn cfg(genesis_hash: Hash32, peers: Vec<String>) -> P2pConfig {
    P2pConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        node_id: "test-node".into(),
        genesis_hash,
        validator_addr: None,
        peers,
        max_peers: 8,
        peer_io_timeout: Duration::from_secs(5),
        blacklist_secs: 60,
        reconnect_secs: 1,
    }
}

/// A node dialing a peer on a different network gets no session: the Hello
/// exchange ends with disconnection and a temporary blacklist.
#[tokio::test]
async fn genesis_mismatch_rejects_the_session() {
    let (_h1, mut ev1, addr1) = P2pService::spawn(cfg(Hash32([1; 32]), vec![])).await.unwrap();
    let (_h2, mut ev2, _addr2) =
        P2pService::spawn(cfg(Hash32([2; 32]), vec![addr1.to_string()])).await.unwrap();

    let saw_peer = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ev1.recv().await {
                Some(NetEvent::PeerConnected { .. }) => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    })
    .await;
    assert!(saw_peer.is_err(), "mismatched peer must never connect");

    // The dialer side equally refuses the session.
    while let Ok(ev) = ev2.try_recv() {
        assert!(
            !matches!(ev, NetEvent::PeerConnected { .. }),
            "dialer must not register a mismatched peer"
        );
    }
}

/// Matching genesis hashes connect, exchange Hellos, and relay gossip.
#[tokio::test]
async fn matching_genesis_connects_and_gossips() {
    let genesis_hash = Hash32([7; 32]);
    let (h1, mut ev1, addr1) = P2pService::spawn(cfg(genesis_hash, vec![])).await.unwrap();
    let (h2, mut ev2, _addr2) =
        P2pService::spawn(cfg(genesis_hash, vec![addr1.to_string()])).await.unwrap();

    // Both sides see the session.
    let conn1 = tokio::time::timeout(Duration::from_secs(5), ev1.recv()).await.unwrap().unwrap();
    assert!(matches!(conn1, NetEvent::PeerConnected { .. }));
    let conn2 = tokio::time::timeout(Duration::from_secs(5), ev2.recv()).await.unwrap().unwrap();
    assert!(matches!(conn2, NetEvent::PeerConnected { .. }));

    // Gossip a transaction from node 2; node 1 receives it once.
    let alice = keypair(1);
    let tx = transfer(&alice, "cpc1sink", cpc(1), 0);
    h2.broadcast_tx(tx.clone(), None).await;

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ev1.recv().await {
                Some(NetEvent::TxReceived { tx, .. }) => return *tx,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("gossiped tx arrives");
    assert_eq!(received.hash(), tx.hash());

    // The dedup cache swallows a second broadcast of the same payload.
    h2.broadcast_tx(tx.clone(), None).await;
    h1.broadcast_tx(tx.clone(), None).await; // already seen locally too
    let dup = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match ev1.recv().await {
                Some(NetEvent::TxReceived { .. }) => return (),
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await;
    assert!(dup.is_err(), "duplicate gossip must be dropped");
}

/// GetBlocks requests surface to the node loop with the requested range.
#[tokio::test]
async fn get_blocks_round_trips() {
    let genesis_hash = Hash32([9; 32]);
    let (h1, mut ev1, addr1) = P2pService::spawn(cfg(genesis_hash, vec![])).await.unwrap();
    let (_h2, mut ev2, _) =
        P2pService::spawn(cfg(genesis_hash, vec![addr1.to_string()])).await.unwrap();

    // Wait for the session on node 1 and grab the peer id.
    let peer = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(NetEvent::PeerConnected { peer, .. }) = ev1.recv().await {
                return peer;
            }
        }
    })
    .await
    .unwrap();

    h1.request_blocks(peer, 3, 9).await;
    let (from, to) = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ev2.recv().await {
                Some(NetEvent::GetBlocks { from, to, .. }) => return (from, to),
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!((from, to), (3, 9));
}
