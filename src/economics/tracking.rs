//! Node-local throughput bookkeeping: per-block aggregates and a rolling
//! TPS window. The consensus-relevant counters (`total_minted`,
//! `total_burned`) live on `ChainState`; everything here is observability.

use std::collections::VecDeque;

const TPS_WINDOW_SECS: u64 = 60;

#[derive(Debug, Default)]
pub struct EconomicTracker {
    pub blocks: u64,
    pub txs_total: u64,
    pub gas_total: u64,
    window: VecDeque<(u64, u64)>, // (unix seconds, tx count)
}

impl EconomicTracker {
    pub fn record_block(&mut self, now_unix: u64, tx_count: u64, gas_used: u64) {
        self.blocks += 1;
        self.txs_total += tx_count;
        self.gas_total += gas_used;
        self.window.push_back((now_unix, tx_count));
        while let Some((ts, _)) = self.window.front() {
            if now_unix.saturating_sub(*ts) > TPS_WINDOW_SECS {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Transactions per second over the rolling window.
    pub fn tps(&self) -> f64 {
        let (Some((first, _)), Some((last, _))) = (self.window.front(), self.window.back()) else {
            return 0.0;
        };
        let txs: u64 = self.window.iter().map(|(_, n)| n).sum();
        let span = last.saturating_sub(*first).max(1);
        txs as f64 / span as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_drops_old_entries() {
        let mut t = EconomicTracker::default();
        t.record_block(100, 10, 210_000);
        t.record_block(200, 10, 210_000);
        assert_eq!(t.blocks, 2);
        assert_eq!(t.txs_total, 20);
        // First entry fell out of the 60s window.
        assert_eq!(t.window.len(), 1);
    }

    #[test]
    fn tps_over_window() {
        let mut t = EconomicTracker::default();
        t.record_block(100, 5, 0);
        t.record_block(110, 15, 0);
        assert!((t.tps() - 2.0).abs() < f64::EPSILON);
    }
}
