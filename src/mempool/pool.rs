//! Transaction pool.
//!
//! - Per-sender nonce-ordered queues; a gap in the nonce sequence parks the
//!   tail until the gap fills.
//! - Replace-by-fee: re-submitting a (sender, nonce) needs a >=10% gas-price
//!   bump, otherwise the duplicate is rejected.
//! - TTL: entries expire `ttl_seconds` after insertion (inclusive bound).
//! - Capacity: when full, a new transaction must out-price the lowest-priority
//!   resident, which is evicted.
//! - Drain: ready transactions by gas price, FIFO on ties; consuming a nonce
//!   unparks the sender's next one within the same block.

use crate::types::{Gas, Hash32, Tx};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use thiserror::Error;

const MAX_PENDING_PER_SENDER: usize = 64;
const RBF_BUMP_PERCENT: u64 = 10;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum MempoolError {
    #[error("duplicate nonce: gas price bump below replacement minimum")]
    DuplicateNonce,
    #[error("mempool full")]
    MempoolFull,
    #[error("nonce below account state: expected >= {expected}, got {got}")]
    StaleNonce { expected: u64, got: u64 },
    #[error("sender queue full")]
    SenderLimit,
}

#[derive(Clone, Debug)]
pub enum InsertOutcome {
    Accepted,
    /// Accepted by evicting the lowest-priority resident.
    AcceptedEvicting(Tx),
    /// Replaced a same-nonce transaction (returns the replaced id).
    Replaced(Hash32),
}

#[derive(Clone, Debug)]
struct PendingTx {
    tx: Tx,
    inserted_unix: u64,
    seq: u64,
}

#[derive(Clone)]
struct HeapEntry {
    gas_price: u64,
    seq: u64,
    sender: String,
    nonce: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, o: &Self) -> bool {
        self.gas_price == o.gas_price && self.seq == o.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, o: &Self) -> Option<Ordering> {
        Some(self.cmp(o))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, o: &Self) -> Ordering {
        // Max-heap: highest gas price first, oldest insertion on ties.
        self.gas_price
            .cmp(&o.gas_price)
            .then_with(|| o.seq.cmp(&self.seq))
    }
}

#[derive(Clone, Debug, Default)]
pub struct MempoolMetrics {
    pub admitted: u64,
    pub rejected: u64,
    pub replaced: u64,
    pub evicted: u64,
    pub expired: u64,
}

pub struct Mempool {
    cap: usize,
    ttl_seconds: u64,
    seq: u64,
    queues: HashMap<String, BTreeMap<u64, PendingTx>>,
    pub metrics: MempoolMetrics,
}

impl Mempool {
    pub fn new(cap: usize, ttl_seconds: u64) -> Self {
        Self {
            cap,
            ttl_seconds,
            seq: 0,
            queues: HashMap::new(),
            metrics: MempoolMetrics::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Admit a structurally validated, signature-checked transaction.
    /// `state_nonce` is the sender's committed nonce.
    pub fn insert(
        &mut self,
        tx: Tx,
        state_nonce: u64,
        now_unix: u64,
    ) -> Result<InsertOutcome, MempoolError> {
        if tx.nonce < state_nonce {
            self.metrics.rejected += 1;
            return Err(MempoolError::StaleNonce { expected: state_nonce, got: tx.nonce });
        }

        let sender = tx.from.clone();
        let queue = self.queues.entry(sender.clone()).or_default();

        if let Some(existing) = queue.get(&tx.nonce) {
            let required = existing
                .tx
                .gas_price
                .saturating_add((existing.tx.gas_price.saturating_mul(RBF_BUMP_PERCENT) / 100).max(1));
            if tx.gas_price < required {
                self.metrics.rejected += 1;
                return Err(MempoolError::DuplicateNonce);
            }
            let old_id = existing.tx.hash();
            self.seq += 1;
            let seq = self.seq;
            queue.insert(tx.nonce, PendingTx { tx, inserted_unix: now_unix, seq });
            self.metrics.replaced += 1;
            return Ok(InsertOutcome::Replaced(old_id));
        }

        if queue.len() >= MAX_PENDING_PER_SENDER {
            self.metrics.rejected += 1;
            return Err(MempoolError::SenderLimit);
        }

        let mut evicted = None;
        if self.len() >= self.cap {
            match self.evict_below(tx.gas_price, &sender) {
                Some(victim) => evicted = Some(victim),
                None => {
                    if self.queues.get(&sender).map(|q| q.is_empty()).unwrap_or(false) {
                        self.queues.remove(&sender);
                    }
                    self.metrics.rejected += 1;
                    return Err(MempoolError::MempoolFull);
                }
            }
        }

        self.seq += 1;
        let seq = self.seq;
        self.queues
            .entry(sender)
            .or_default()
            .insert(tx.nonce, PendingTx { tx, inserted_unix: now_unix, seq });
        self.metrics.admitted += 1;

        Ok(match evicted {
            Some(v) => InsertOutcome::AcceptedEvicting(v),
            None => InsertOutcome::Accepted,
        })
    }

    /// Evict the lowest-priority entry if it prices below `gas_price`.
    fn evict_below(&mut self, gas_price: u64, protect_sender: &str) -> Option<Tx> {
        let worst = self
            .queues
            .iter()
            .filter(|(s, _)| s.as_str() != protect_sender)
            .flat_map(|(s, q)| q.iter().map(move |(n, p)| (p.tx.gas_price, p.seq, s.clone(), *n)))
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))?;
        let (worst_price, _, sender, nonce) = worst;
        if worst_price >= gas_price {
            return None;
        }
        let q = self.queues.get_mut(&sender)?;
        let victim = q.remove(&nonce)?;
        if q.is_empty() {
            self.queues.remove(&sender);
        }
        self.metrics.evicted += 1;
        Some(victim.tx)
    }

    /// TTL sweep. Returns the expired transactions for failure notification.
    pub fn tick(&mut self, now_unix: u64) -> Vec<Tx> {
        let ttl = self.ttl_seconds;
        let mut expired = Vec::new();
        self.queues.retain(|_, queue| {
            queue.retain(|_, p| {
                if now_unix.saturating_sub(p.inserted_unix) >= ttl {
                    expired.push(p.tx.clone());
                    false
                } else {
                    true
                }
            });
            !queue.is_empty()
        });
        self.metrics.expired += expired.len() as u64;
        expired
    }

    /// Draw ready transactions in decreasing gas price (FIFO on ties),
    /// chaining per-sender nonces within the same block, bounded by the
    /// block gas limit and transaction count.
    pub fn drain_for_block(
        &mut self,
        state_nonce: impl Fn(&str) -> u64,
        gas_limit: Gas,
        tx_limit: usize,
    ) -> Vec<Tx> {
        let mut heap: BinaryHeap<HeapEntry> = self
            .queues
            .iter()
            .filter_map(|(sender, queue)| {
                let next = state_nonce(sender);
                queue.get(&next).map(|p| HeapEntry {
                    gas_price: p.tx.gas_price,
                    seq: p.seq,
                    sender: sender.clone(),
                    nonce: next,
                })
            })
            .collect();

        let mut out = Vec::new();
        let mut gas_used: Gas = 0;
        while out.len() < tx_limit {
            let Some(entry) = heap.pop() else { break };
            let Some(queue) = self.queues.get_mut(&entry.sender) else { continue };
            let Some(p) = queue.get(&entry.nonce) else { continue };

            let tx_gas = p.tx.tx_type.base_gas();
            if gas_used.saturating_add(tx_gas) > gas_limit {
                // Over budget: leave the transaction for a later block.
                continue;
            }

            let p = queue.remove(&entry.nonce).expect("entry checked above");
            gas_used += tx_gas;
            out.push(p.tx);

            // Consuming nonce n unparks n+1 for this sender.
            if let Some(next) = queue.get(&(entry.nonce + 1)) {
                heap.push(HeapEntry {
                    gas_price: next.tx.gas_price,
                    seq: next.seq,
                    sender: entry.sender.clone(),
                    nonce: entry.nonce + 1,
                });
            } else if queue.is_empty() {
                self.queues.remove(&entry.sender);
            }
        }
        out
    }

    /// Drop entries superseded by a committed block (at-most-once inclusion).
    pub fn on_block_applied(&mut self, applied: &[Tx]) {
        for tx in applied {
            if let Some(queue) = self.queues.get_mut(&tx.from) {
                queue.retain(|&nonce, _| nonce > tx.nonce);
                if queue.is_empty() {
                    self.queues.remove(&tx.from);
                }
            }
        }
    }
}
