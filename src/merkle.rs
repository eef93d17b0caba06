//! Binary SHA-256 Merkle root used for transaction, compute and state roots.
//!
//! Convention (fixed for the network):
//! - Leaves are hashed level by level; an odd level duplicates its last leaf.
//! - Internal node: SHA-256(left || right).
//! - Empty input: the zero hash.
//!
//! Leaves are expected to already be 32-byte hashes; callers decide how each
//! leaf is derived from its object.

use crate::types::{hash_bytes, Hash32};

pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return Hash32::zero();
    }
    let mut level: Vec<Hash32> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("non-empty level"));
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&pair[0].0);
            buf[32..].copy_from_slice(&pair[1].0);
            next.push(hash_bytes(&buf));
        }
        level = next;
    }
    level[0]
}
