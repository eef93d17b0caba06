//! In-process event bus.
//!
//! Delivery is at-least-once to live subscribers and best-effort overall:
//! a broadcast channel with a bounded backlog, no buffering for absent
//! consumers. For a given transaction, `TxAccepted` precedes exactly one of
//! `TxConfirmed` / `TxFailed` — this ordering is the contract client-side
//! pending-nonce tracking relies on.

use crate::types::{Hash32, Height};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_BACKLOG: usize = 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChainEvent {
    TxAccepted { tx_id: Hash32 },
    TxConfirmed { tx_id: Hash32, block_height: Height, block_hash: Hash32 },
    TxFailed { tx_id: Hash32, reason: String },
    BlockCreated { block_hash: Hash32, height: Height },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BACKLOG);
        Self { tx }
    }

    pub fn publish(&self, event: ChainEvent) {
        // No subscribers is fine; events are fire-and-forget.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let id = Hash32([1; 32]);
        bus.publish(ChainEvent::TxAccepted { tx_id: id });
        bus.publish(ChainEvent::TxConfirmed {
            tx_id: id,
            block_height: 3,
            block_hash: Hash32([2; 32]),
        });

        assert_eq!(rx.recv().await.unwrap(), ChainEvent::TxAccepted { tx_id: id });
        match rx.recv().await.unwrap() {
            ChainEvent::TxConfirmed { block_height, .. } => assert_eq!(block_height, 3),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.publish(ChainEvent::BlockCreated { block_hash: Hash32::zero(), height: 1 });
    }
}
