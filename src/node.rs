//! Node wiring.
//!
//! One task owns all state mutation (the writer loop); everything else —
//! P2P ingress, RPC, the proposer timer, the TTL sweeper — talks to it over
//! a command channel or goes through the shared read views. Readers see the
//! state behind an `RwLock` that only the writer task writes.

use crate::config::NodeConfig;
use crate::consensus::{apply_block, validate_block, BlockError, BlockProposer, ChainTip};
use crate::economics::tracking::EconomicTracker;
use crate::events::{ChainEvent, EventBus};
use crate::execution::ChainState;
use crate::genesis::Genesis;
use crate::mempool::{InsertOutcome, Mempool};
use crate::metrics::Metrics;
use crate::net::{NetEvent, P2pConfig, P2pHandle, P2pService, PeerId};
use crate::storage::block_store::BlockStore;
use crate::storage::{snapshots, DataDir, StateDocument};
use crate::types::{Block, Hash32, Tx};
use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Blocks requested per sync round.
const SYNC_BATCH: u64 = 128;
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const SLOT_POLL: Duration = Duration::from_millis(500);

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Read views and service handles shared across tasks.
#[derive(Clone)]
pub struct NodeShared {
    pub genesis: Arc<Genesis>,
    pub genesis_hash: Hash32,
    pub state: Arc<RwLock<ChainState>>,
    pub tip: Arc<RwLock<ChainTip>>,
    pub mempool: Arc<Mutex<Mempool>>,
    pub events: EventBus,
    pub store: Arc<BlockStore>,
    pub metrics: Arc<Metrics>,
    pub tracker: Arc<Mutex<EconomicTracker>>,
    pub p2p: P2pHandle,
    pub snapshots_dir: String,
}

pub enum NodeCommand {
    ProduceBlock { slot: u64, now_unix: u64 },
    ApplyForeignBlock { block: Box<Block>, from: Option<PeerId> },
    Snapshot,
    Shutdown { done: oneshot::Sender<()> },
}

/// Admission shared by RPC and P2P transaction ingress: stateless checks,
/// then the mempool, then events. Returns the insert outcome so callers can
/// decide whether to gossip.
pub fn admit_tx(shared: &NodeShared, tx: Tx) -> Result<InsertOutcome, String> {
    crate::execution::precheck_tx(&tx, &shared.genesis.params).map_err(|e| e.to_string())?;

    let state_nonce = shared.state.read().nonce_of(&tx.from);
    let tx_id = tx.hash();
    let outcome = {
        let mut pool = shared.mempool.lock();
        pool.insert(tx, state_nonce, now_unix())
    };
    match &outcome {
        Ok(result) => {
            shared.metrics.mempool_admitted.inc();
            shared.events.publish(ChainEvent::TxAccepted { tx_id });
            if let InsertOutcome::AcceptedEvicting(victim) = result {
                shared.metrics.mempool_evicted.inc();
                shared.events.publish(ChainEvent::TxFailed {
                    tx_id: victim.hash(),
                    reason: "transaction evicted".into(),
                });
            }
        }
        Err(e) => {
            shared.metrics.mempool_rejected.inc();
            return Err(e.to_string());
        }
    }
    shared.metrics.mempool_size.set(shared.mempool.lock().len() as i64);
    outcome.map_err(|e| e.to_string())
}

pub async fn run(cfg: NodeConfig) -> anyhow::Result<()> {
    let data = DataDir::new(cfg.node.data_dir.clone());
    data.ensure()?;

    let genesis = Genesis::load(data.genesis_path())
        .with_context(|| format!("loading {}", data.genesis_path()))?;
    let genesis_hash = genesis.hash();
    info!(network = %genesis.network_id, genesis = %genesis_hash, "starting node");

    // State: prefer the committed state.db, then the newest snapshot,
    // then genesis.
    let (state, tip) = match data.load_state()? {
        Some(doc) => (doc.state, doc.tip),
        None => match snapshots::latest_snapshot_height(&data.snapshots_dir())? {
            Some(h) => {
                let payload = snapshots::load_snapshot(&data.snapshots_dir(), h)?;
                info!(height = h, "bootstrapped from snapshot");
                (payload.state, payload.tip)
            }
            None => (ChainState::from_genesis(&genesis), ChainTip::genesis(&genesis)),
        },
    };

    let store = Arc::new(BlockStore::open(data.blocks_dir())?);
    let metrics = Arc::new(Metrics::new()?);
    metrics.chain_height.set(tip.height as i64);

    let keypair = data.load_or_create_validator_key()?;
    let proposer = BlockProposer::new(keypair);
    info!(consensus_addr = %proposer.consensus_addr(), "validator identity loaded");

    let p2p_cfg = P2pConfig {
        listen: cfg.network.listen.parse().context("network.listen")?,
        node_id: format!("cpc-{}", &proposer.consensus_addr()[..20.min(proposer.consensus_addr().len())]),
        genesis_hash,
        validator_addr: Some(proposer.consensus_addr().to_string()),
        peers: {
            let mut peers = cfg.network.peers.clone();
            if let Ok(saved) = crate::storage::peer_store::PeerStore::open(data.peers_path()) {
                for addr in saved.addrs() {
                    if !peers.contains(&addr) {
                        peers.push(addr);
                    }
                }
            }
            peers
        },
        max_peers: cfg.network.max_peers,
        peer_io_timeout: Duration::from_secs(cfg.network.peer_io_timeout_s),
        blacklist_secs: cfg.network.blacklist_s,
        reconnect_secs: cfg.network.reconnect_s,
    };
    let (p2p, mut net_events, _p2p_addr) = P2pService::spawn(p2p_cfg).await?;
    p2p.tip_update(tip.height).await;

    let mempool = Mempool::new(cfg.mempool.capacity, genesis.params.mempool_tx_ttl_seconds);
    let shared = NodeShared {
        genesis: Arc::new(genesis),
        genesis_hash,
        state: Arc::new(RwLock::new(state)),
        tip: Arc::new(RwLock::new(tip)),
        mempool: Arc::new(Mutex::new(mempool)),
        events: EventBus::new(),
        store,
        metrics,
        tracker: Arc::new(Mutex::new(EconomicTracker::default())),
        p2p: p2p.clone(),
        snapshots_dir: data.snapshots_dir(),
    };

    let (cmd_tx, cmd_rx) = mpsc::channel::<NodeCommand>(64);

    // RPC surface.
    let rpc_listen: std::net::SocketAddr = cfg.rpc.listen.parse().context("rpc.listen")?;
    tokio::spawn(crate::rpc::serve(rpc_listen, shared.clone()));

    // State-writer task: the only place state, tip and the block store
    // are mutated.
    let writer = Writer {
        shared: shared.clone(),
        data: data.clone(),
        proposer,
        propose: cfg.node.propose,
    };
    let writer_task = tokio::spawn(writer.run(cmd_rx));

    // Proposer timer: wakes up each slot and asks the writer to build when
    // our key is designated.
    {
        let shared = shared.clone();
        let cmd_tx = cmd_tx.clone();
        tokio::spawn(async move {
            let mut last_slot: Option<u64> = None;
            let mut ticker = tokio::time::interval(SLOT_POLL);
            loop {
                ticker.tick().await;
                let now = now_unix();
                let Some(slot) = crate::consensus::slot_at(
                    now,
                    shared.genesis.genesis_time,
                    shared.genesis.params.block_time_seconds,
                ) else {
                    continue;
                };
                if last_slot == Some(slot) {
                    continue;
                }
                last_slot = Some(slot);
                let _ = cmd_tx.send(NodeCommand::ProduceBlock { slot, now_unix: now }).await;
            }
        });
    }

    // Mempool TTL sweeper.
    {
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let expired = shared.mempool.lock().tick(now_unix());
                for tx in expired {
                    shared.metrics.mempool_expired.inc();
                    shared.events.publish(ChainEvent::TxFailed {
                        tx_id: tx.hash(),
                        reason: "transaction expired".into(),
                    });
                }
                shared.metrics.mempool_size.set(shared.mempool.lock().len() as i64);
            }
        });
    }

    // Network ingress.
    let net_task = {
        let shared = shared.clone();
        let cmd_tx = cmd_tx.clone();
        let snapshot_threshold = cfg.network.snapshot_sync_threshold;
        let peers_path = data.peers_path();
        tokio::spawn(async move {
            let mut peer_count: i64 = 0;
            while let Some(event) = net_events.recv().await {
                match event {
                    NetEvent::PeerConnected { peer, addr, hello } => {
                        peer_count += 1;
                        shared.metrics.p2p_peers.set(peer_count);
                        if let Ok(mut store) =
                            crate::storage::peer_store::PeerStore::open(&peers_path)
                        {
                            let _ = store.add(format!("{}:{}", addr.ip(), hello.listen_port));
                        }
                        let our_tip = shared.tip.read().height;
                        if hello.tip_height > our_tip {
                            let behind = hello.tip_height - our_tip;
                            if behind > snapshot_threshold {
                                warn!(
                                    behind,
                                    "far behind peer tip; snapshot bootstrap recommended"
                                );
                            }
                            shared.metrics.range_syncs.inc();
                            shared
                                .p2p
                                .request_blocks(
                                    peer,
                                    our_tip + 1,
                                    (our_tip + SYNC_BATCH).min(hello.tip_height),
                                )
                                .await;
                        }
                    }
                    NetEvent::PeerDisconnected { .. } => {
                        peer_count = (peer_count - 1).max(0);
                        shared.metrics.p2p_peers.set(peer_count);
                    }
                    NetEvent::BlockReceived { peer, block } => {
                        shared.metrics.blocks_received.inc();
                        let _ = cmd_tx
                            .send(NodeCommand::ApplyForeignBlock { block, from: Some(peer) })
                            .await;
                    }
                    NetEvent::TxReceived { peer, tx } => {
                        // Relay only on successful admission.
                        if admit_tx(&shared, (*tx).clone()).is_ok() {
                            shared.metrics.txs_relayed.inc();
                            shared.p2p.broadcast_tx(*tx, Some(peer)).await;
                        }
                    }
                    NetEvent::GetBlocks { peer, from, to } => {
                        let to = to.min(from + SYNC_BATCH - 1);
                        let blocks = shared.store.range(from, to);
                        if !blocks.is_empty() {
                            shared.p2p.send_blocks(peer, blocks).await;
                        }
                    }
                    NetEvent::BlocksRange { peer, blocks } => {
                        for block in blocks {
                            let _ = cmd_tx
                                .send(NodeCommand::ApplyForeignBlock {
                                    block: Box::new(block),
                                    from: Some(peer),
                                })
                                .await;
                        }
                    }
                }
            }
        })
    };

    // Cooperative shutdown on ctrl-c: final snapshot, state flush, then
    // peer teardown.
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    let (done_tx, done_rx) = oneshot::channel();
    let _ = cmd_tx.send(NodeCommand::Shutdown { done: done_tx }).await;
    let _ = done_rx.await;
    p2p.shutdown().await;
    net_task.abort();
    writer_task.abort();
    info!("node stopped");
    Ok(())
}

/// The single state-writer.
struct Writer {
    shared: NodeShared,
    data: DataDir,
    proposer: BlockProposer,
    propose: bool,
}

impl Writer {
    async fn run(self, mut cmd_rx: mpsc::Receiver<NodeCommand>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                NodeCommand::ProduceBlock { slot, now_unix } => {
                    self.produce(slot, now_unix).await;
                }
                NodeCommand::ApplyForeignBlock { block, from } => {
                    self.apply_foreign(*block, from).await;
                }
                NodeCommand::Snapshot => {
                    self.write_snapshot();
                }
                NodeCommand::Shutdown { done } => {
                    self.write_snapshot();
                    self.persist_state();
                    let _ = done.send(());
                    break;
                }
            }
        }
    }

    async fn produce(&self, slot: u64, now_unix: u64) {
        if !self.propose {
            return;
        }
        let params = &self.shared.genesis.params;
        let (pre_state, tip) = {
            (self.shared.state.read().clone(), self.shared.tip.read().clone())
        };
        if let Some(tip_slot) = tip.slot {
            if slot <= tip_slot {
                return;
            }
        }
        if !self.proposer.is_our_slot(&pre_state, slot) {
            return;
        }

        let txs = {
            let mut pool = self.shared.mempool.lock();
            pool.drain_for_block(
                |sender| pre_state.nonce_of(sender),
                params.block_gas_limit,
                params.max_tx_per_block,
            )
        };

        let (block, new_state, outcome) =
            self.proposer.build_block(&pre_state, &tip, slot, now_unix, txs, params);

        if let Err(e) = self.shared.store.put(&block) {
            error!("failed to persist own block: {e}");
            return;
        }
        self.commit(block.clone(), new_state, &outcome).await;
        self.shared.p2p.broadcast_block(block, None).await;
        self.shared.metrics.blocks_broadcast.inc();
    }

    async fn apply_foreign(&self, block: Block, from: Option<PeerId>) {
        let params = &self.shared.genesis.params;
        let tip = self.shared.tip.read().clone();

        // Ahead of us: try to catch up instead of rejecting outright.
        if block.header.height > tip.height + 1 {
            if let Some(peer) = from {
                self.shared
                    .p2p
                    .request_blocks(peer, tip.height + 1, block.header.height)
                    .await;
            }
            return;
        }
        if block.header.height <= tip.height {
            return; // Already have it.
        }

        let mut state = self.shared.state.read().clone();
        if let Err(e) = validate_block(&block, &tip, &state, &self.shared.genesis, now_unix()) {
            self.shared.metrics.blocks_rejected.inc();
            warn!(height = block.header.height, error = %e, "rejecting block");
            return;
        }
        let outcome = match apply_block(&mut state, &block, tip.slot, params) {
            Ok(outcome) => outcome,
            Err(e @ (BlockError::StateRootMismatch | BlockError::ComputeRootMismatch)) => {
                self.shared.metrics.blocks_rejected.inc();
                warn!(height = block.header.height, error = %e, "block re-execution diverged");
                return;
            }
            Err(e) => {
                self.shared.metrics.blocks_rejected.inc();
                warn!(height = block.header.height, error = %e, "rejecting block");
                return;
            }
        };

        if let Err(e) = self.shared.store.put(&block) {
            error!("failed to persist block: {e}");
            return;
        }
        self.commit(block.clone(), state, &outcome).await;
        // Gossip once, to everyone except the sender.
        self.shared.p2p.broadcast_block(block, from).await;
    }

    /// Install a committed block: state, tip, persistence, mempool pruning,
    /// events, metrics, snapshot cadence.
    async fn commit(
        &self,
        block: Block,
        new_state: ChainState,
        outcome: &crate::execution::BlockOutcome,
    ) {
        let params = &self.shared.genesis.params;
        let height = block.header.height;
        let block_hash = block.id();
        let new_tip = ChainTip {
            height,
            hash: block_hash,
            timestamp: block.header.timestamp,
            slot: Some(block.header.slot),
        };

        *self.shared.state.write() = new_state;
        *self.shared.tip.write() = new_tip;
        self.persist_state();

        {
            let mut pool = self.shared.mempool.lock();
            pool.on_block_applied(&block.txs);
        }

        self.shared.events.publish(ChainEvent::BlockCreated { block_hash, height });
        for tx in &block.txs {
            self.shared.events.publish(ChainEvent::TxConfirmed {
                tx_id: tx.hash(),
                block_height: height,
                block_hash,
            });
        }
        for (tx_id, err) in &outcome.failed {
            self.shared.events.publish(ChainEvent::TxFailed {
                tx_id: *tx_id,
                reason: err.to_string(),
            });
        }

        let m = &self.shared.metrics;
        m.blocks_committed.inc();
        m.chain_height.set(height as i64);
        m.txs_per_block.observe(block.txs.len() as f64);
        m.gas_per_block.observe(outcome.gas_used as f64);
        {
            let state = self.shared.state.read();
            m.validators_active.set(state.active_set().len() as i64);
            m.total_minted.set(amount_f64(state.total_minted));
            m.total_burned.set(amount_f64(state.total_burned));
        }
        {
            let mut tracker = self.shared.tracker.lock();
            tracker.record_block(now_unix(), block.txs.len() as u64, outcome.gas_used);
            m.tps.set(tracker.tps());
        }
        m.mempool_size.set(self.shared.mempool.lock().len() as i64);

        self.shared.p2p.tip_update(height).await;

        if height % params.snapshot_interval_blocks.max(1) == 0 || params.is_epoch_boundary(height)
        {
            self.write_snapshot();
        }
    }

    fn persist_state(&self) {
        let doc = StateDocument {
            state: self.shared.state.read().clone(),
            tip: self.shared.tip.read().clone(),
        };
        if let Err(e) = self.data.save_state(&doc) {
            error!("state persist failed: {e}");
        }
    }

    fn write_snapshot(&self) {
        let payload = snapshots::SnapshotPayload {
            height: self.shared.tip.read().height,
            tip: self.shared.tip.read().clone(),
            state: self.shared.state.read().clone(),
        };
        let dir = self.data.snapshots_dir();
        let keep = self.shared.genesis.params.snapshot_keep;
        let metrics = self.shared.metrics.clone();
        tokio::task::spawn_blocking(move || {
            match snapshots::write_snapshot(&dir, &payload) {
                Ok(()) => {
                    metrics.snapshots_created.inc();
                    let _ = snapshots::prune_snapshots(&dir, keep);
                }
                Err(e) => error!("snapshot failed: {e}"),
            }
        });
    }
}

fn amount_f64(a: crate::types::Amount) -> f64 {
    // Observability only; precision loss above 2^53 base units is fine.
    u128::try_from(a).map(|v| v as f64).unwrap_or(f64::MAX)
}
