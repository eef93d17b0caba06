pub mod pool;

pub use pool::{InsertOutcome, Mempool, MempoolError, MempoolMetrics};
