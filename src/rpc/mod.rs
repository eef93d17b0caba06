//! Read path, transaction submission, and the event stream.
//!
//! JSON over HTTP (axum), with amounts projected as decimal strings. The
//! event stream is SSE with keep-alive pings; delivery is at-least-once to
//! connected subscribers.

use crate::events::ChainEvent;
use crate::node::{admit_tx, NodeShared};
use crate::types::{Amount, Hash32, Tx};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

pub fn build_router(shared: NodeShared) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/block/height/:height", get(block_by_height))
        .route("/block/hash/:hash", get(block_by_hash))
        .route("/account/:addr", get(account))
        .route("/validator/:addr", get(validator))
        .route("/validators", get(validators))
        .route("/validators/leaderboard", get(leaderboard))
        .route("/validators/jailed", get(jailed))
        .route("/delegations/:addr", get(delegations))
        .route("/unbonding/:addr", get(unbonding))
        .route("/rewards/:addr", get(rewards))
        .route("/mempool", get(mempool_info))
        .route("/snapshots", get(snapshots_list))
        .route("/tx", post(submit_tx))
        .route("/events", get(events))
        .route("/metrics", get(|| async { crate::metrics::render() }))
        .route("/health", get(|| async { "ok" }))
        .with_state(shared)
}

pub async fn serve(listen: SocketAddr, shared: NodeShared) {
    let app = build_router(shared);
    info!(%listen, "rpc listening");
    match tokio::net::TcpListener::bind(listen).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                error!("rpc server: {e}");
            }
        }
        Err(e) => error!("rpc bind {listen}: {e}"),
    }
}

fn amt(a: Amount) -> String {
    a.to_string()
}

#[derive(Serialize)]
struct ValidatorView {
    address: String,
    operator: String,
    self_stake: String,
    total_delegated: String,
    power: String,
    commission_bps: u32,
    name: String,
    website: String,
    description: String,
    blocks_proposed: u64,
    blocks_expected: u64,
    missed_blocks: u64,
    uptime_score: u64,
    performance_score: u64,
    total_penalties: String,
    jail_count: u32,
    jailed_until_height: u64,
    is_active: bool,
    joined_height: u64,
    delegators: usize,
}

impl From<&crate::economics::Validator> for ValidatorView {
    fn from(v: &crate::economics::Validator) -> Self {
        Self {
            address: v.address.clone(),
            operator: v.operator.clone(),
            self_stake: amt(v.self_stake),
            total_delegated: amt(v.total_delegated),
            power: amt(v.power()),
            commission_bps: v.commission_bps,
            name: v.name.clone(),
            website: v.website.clone(),
            description: v.description.clone(),
            blocks_proposed: v.blocks_proposed,
            blocks_expected: v.blocks_expected,
            missed_blocks: v.missed_blocks,
            uptime_score: v.uptime_score,
            performance_score: v.performance_score,
            total_penalties: amt(v.total_penalties),
            jail_count: v.jail_count,
            jailed_until_height: v.jailed_until_height,
            is_active: v.is_active,
            joined_height: v.joined_height,
            delegators: v.delegations.len(),
        }
    }
}

async fn status(State(s): State<NodeShared>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let tip = s.tip.read().clone();
    let state = s.state.read();
    let tracker = s.tracker.lock();
    Json(json!({
        "network_id": s.genesis.network_id,
        "genesis_hash": s.genesis_hash.to_hex(),
        "height": tip.height,
        "tip_hash": tip.hash.to_hex(),
        "epoch": state.epoch_index,
        "active_validators": state.active_set().len(),
        "total_minted": amt(state.total_minted),
        "total_burned": amt(state.total_burned),
        "mempool_size": s.mempool.lock().len(),
        "tps": tracker.tps(),
    }))
}

async fn block_by_height(
    State(s): State<NodeShared>,
    Path(height): Path<u64>,
) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    match s.store.get(height) {
        Some(block) => Json(block).into_response(),
        None => (StatusCode::NOT_FOUND, "block not found").into_response(),
    }
}

async fn block_by_hash(State(s): State<NodeShared>, Path(hash): Path<String>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let Some(hash) = Hash32::from_hex(&hash) else {
        return (StatusCode::BAD_REQUEST, "bad block hash").into_response();
    };
    match s.store.get_by_hash(&hash) {
        Some(block) => Json(block).into_response(),
        None => (StatusCode::NOT_FOUND, "block not found").into_response(),
    }
}

async fn account(State(s): State<NodeShared>, Path(addr): Path<String>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let state = s.state.read();
    let acc = state.accounts.get(&addr).cloned().unwrap_or_default();
    Json(json!({
        "address": addr,
        "balance": amt(acc.balance),
        "nonce": acc.nonce,
        "unbonding_total": amt(acc.unbonding_total()),
    }))
}

async fn validator(State(s): State<NodeShared>, Path(addr): Path<String>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let state = s.state.read();
    match state.validators.get(&addr) {
        Some(v) => Json(ValidatorView::from(v)).into_response(),
        None => (StatusCode::NOT_FOUND, "validator not found").into_response(),
    }
}

async fn validators(State(s): State<NodeShared>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let state = s.state.read();
    let all: Vec<ValidatorView> = state.validators.values().map(ValidatorView::from).collect();
    Json(all)
}

async fn leaderboard(State(s): State<NodeShared>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let state = s.state.read();
    let mut all: Vec<ValidatorView> = state.validators.values().map(ValidatorView::from).collect();
    all.sort_by(|a, b| {
        b.performance_score
            .cmp(&a.performance_score)
            .then_with(|| a.address.cmp(&b.address))
    });
    Json(all)
}

async fn jailed(State(s): State<NodeShared>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let tip_height = s.tip.read().height;
    let state = s.state.read();
    let jailed: Vec<ValidatorView> = state
        .validators
        .values()
        .filter(|v| v.is_jailed(tip_height))
        .map(ValidatorView::from)
        .collect();
    Json(jailed)
}

async fn delegations(State(s): State<NodeShared>, Path(addr): Path<String>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let state = s.state.read();
    let out: Vec<_> = state
        .validators
        .values()
        .filter_map(|v| {
            v.delegation_of(&addr).map(|d| {
                json!({
                    "validator": v.address,
                    "amount": amt(d.amount),
                    "created_height": d.created_height,
                })
            })
        })
        .collect();
    Json(out)
}

async fn unbonding(State(s): State<NodeShared>, Path(addr): Path<String>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let state = s.state.read();
    let out: Vec<_> = state
        .accounts
        .get(&addr)
        .map(|a| {
            a.unbonding
                .iter()
                .map(|e| {
                    json!({
                        "validator": e.validator,
                        "amount": amt(e.amount),
                        "completion_height": e.completion_height,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Json(out)
}

async fn rewards(State(s): State<NodeShared>, Path(addr): Path<String>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let state = s.state.read();
    let out: Vec<_> = state
        .accounts
        .get(&addr)
        .map(|a| {
            a.reward_history
                .iter()
                .map(|r| json!({ "epoch": r.epoch, "amount": amt(r.amount) }))
                .collect()
        })
        .unwrap_or_default();
    Json(out)
}

async fn mempool_info(State(s): State<NodeShared>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    Json(json!({ "size": s.mempool.lock().len() }))
}

async fn snapshots_list(State(s): State<NodeShared>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let heights =
        crate::storage::snapshots::list_snapshot_heights(&s.snapshots_dir).unwrap_or_default();
    Json(json!({ "heights": heights }))
}

async fn submit_tx(State(s): State<NodeShared>, Json(tx): Json<Tx>) -> impl IntoResponse {
    s.metrics.rpc_requests.inc();
    let tx_id = tx.hash();
    match admit_tx(&s, tx.clone()) {
        Ok(_) => {
            s.metrics.rpc_tx_submitted.inc();
            s.p2p.broadcast_tx(tx, None).await;
            Json(json!({ "status": "Accepted", "tx_id": tx_id.to_hex() })).into_response()
        }
        Err(reason) => {
            s.metrics.rpc_errors.inc();
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "Rejected", "tx_id": tx_id.to_hex(), "reason": reason })),
            )
                .into_response()
        }
    }
}

async fn events(
    State(s): State<NodeShared>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = s.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        let ev: ChainEvent = item.ok()?;
        Event::default().json_data(&ev).ok().map(Ok)
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
