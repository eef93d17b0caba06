//! Prometheus metrics, exposed at GET /metrics in text format.
//! All metrics use the "cpc_" prefix.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

pub struct Metrics {
    // Chain
    pub blocks_committed: IntCounter,
    pub chain_height: IntGauge,
    pub txs_per_block: Histogram,
    pub gas_per_block: Histogram,
    pub tps: Gauge,

    // Economics
    pub total_minted: Gauge,
    pub total_burned: Gauge,

    // Mempool
    pub mempool_size: IntGauge,
    pub mempool_admitted: IntCounter,
    pub mempool_rejected: IntCounter,
    pub mempool_evicted: IntCounter,
    pub mempool_expired: IntCounter,
    pub mempool_replaced: IntCounter,

    // Network
    pub p2p_peers: IntGauge,
    pub blocks_broadcast: IntCounter,
    pub blocks_received: IntCounter,
    pub txs_relayed: IntCounter,
    pub blocks_rejected: IntCounter,
    pub range_syncs: IntCounter,

    // RPC
    pub rpc_requests: IntCounter,
    pub rpc_tx_submitted: IntCounter,
    pub rpc_errors: IntCounter,

    // Snapshots
    pub snapshots_created: IntCounter,
    pub snapshots_loaded: IntCounter,

    // Validators
    pub validators_active: IntGauge,
    pub validators_jailed: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let r = registry();
        macro_rules! int_counter {
            ($name:expr, $help:expr) => {{
                let c = IntCounter::with_opts(Opts::new($name, $help))?;
                r.register(Box::new(c.clone()))?;
                c
            }};
        }
        macro_rules! int_gauge {
            ($name:expr, $help:expr) => {{
                let g = IntGauge::with_opts(Opts::new($name, $help))?;
                r.register(Box::new(g.clone()))?;
                g
            }};
        }
        macro_rules! gauge {
            ($name:expr, $help:expr) => {{
                let g = Gauge::with_opts(Opts::new($name, $help))?;
                r.register(Box::new(g.clone()))?;
                g
            }};
        }
        macro_rules! histogram {
            ($name:expr, $help:expr, $buckets:expr) => {{
                let h = Histogram::with_opts(HistogramOpts::new($name, $help).buckets($buckets))?;
                r.register(Box::new(h.clone()))?;
                h
            }};
        }

        Ok(Self {
            blocks_committed: int_counter!("cpc_blocks_committed_total", "Blocks committed"),
            chain_height: int_gauge!("cpc_chain_height", "Current chain height"),
            txs_per_block: histogram!("cpc_txs_per_block", "Transactions per committed block",
                vec![0.0, 1.0, 10.0, 50.0, 100.0, 250.0, 500.0]),
            gas_per_block: histogram!("cpc_gas_per_block", "Gas used per committed block",
                vec![0.0, 100_000.0, 1_000_000.0, 10_000_000.0, 50_000_000.0]),
            tps: gauge!("cpc_tps", "Rolling transactions per second"),

            total_minted: gauge!("cpc_total_minted", "Cumulative minted supply (base units)"),
            total_burned: gauge!("cpc_total_burned", "Cumulative burned supply (base units)"),

            mempool_size: int_gauge!("cpc_mempool_size", "Current mempool transaction count"),
            mempool_admitted: int_counter!("cpc_mempool_admitted_total", "Transactions admitted"),
            mempool_rejected: int_counter!("cpc_mempool_rejected_total", "Transactions rejected"),
            mempool_evicted: int_counter!("cpc_mempool_evicted_total", "Transactions evicted"),
            mempool_expired: int_counter!("cpc_mempool_expired_total", "Transactions expired by TTL"),
            mempool_replaced: int_counter!("cpc_mempool_replaced_total", "Replace-by-fee replacements"),

            p2p_peers: int_gauge!("cpc_p2p_peers", "Connected peers"),
            blocks_broadcast: int_counter!("cpc_blocks_broadcast_total", "Blocks broadcast to peers"),
            blocks_received: int_counter!("cpc_blocks_received_total", "Blocks received from peers"),
            txs_relayed: int_counter!("cpc_txs_relayed_total", "Transactions relayed to peers"),
            blocks_rejected: int_counter!("cpc_blocks_rejected_total", "Received blocks rejected"),
            range_syncs: int_counter!("cpc_range_syncs_total", "Block range sync operations"),

            rpc_requests: int_counter!("cpc_rpc_requests_total", "RPC requests served"),
            rpc_tx_submitted: int_counter!("cpc_rpc_tx_submitted_total", "Transactions submitted via RPC"),
            rpc_errors: int_counter!("cpc_rpc_errors_total", "RPC errors returned"),

            snapshots_created: int_counter!("cpc_snapshots_created_total", "State snapshots created"),
            snapshots_loaded: int_counter!("cpc_snapshots_loaded_total", "State snapshots loaded"),

            validators_active: int_gauge!("cpc_validators_active", "Validators in the active set"),
            validators_jailed: int_counter!("cpc_validators_jailed_total", "Jailing events"),
        })
    }
}

/// Render all registered metrics as Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut out = Vec::new();
    encoder.encode(&metric_families, &mut out).unwrap_or_default();
    String::from_utf8(out).unwrap_or_default()
}
