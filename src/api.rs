//! Query API
//! Mission: Read-only window onto the ledger for any downstream consumer
//!
//! No mutation surface: every route reads the append-only store or
//! point-in-time pipeline state.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::ledger::{LedgerStore, RejectionRecord};
use crate::models::Signal;
use crate::risk::{RiskGate, RiskStateSnapshot};
use crate::scheduler::PipelineCounters;

const MAX_PAGE_SIZE: usize = 500;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<LedgerStore>,
    pub risk: Arc<RwLock<RiskGate>>,
    pub counters: Arc<PipelineCounters>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/signals/latest", get(latest_signals))
        .route("/rejections/recent", get(recent_rejections))
        .route("/status", get(status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Optional instrument filter
    #[serde(default)]
    pub instrument: Option<String>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct SignalsResponse {
    pub signals: Vec<Signal>,
    pub total: usize,
}

/// GET /signals/latest?limit=&instrument=
/// Most recent ledgered signals in descending sequence order
pub async fn latest_signals(
    State(state): State<ApiState>,
    Query(params): Query<LatestQuery>,
) -> Result<Json<SignalsResponse>, StatusCode> {
    let limit = params.limit.min(MAX_PAGE_SIZE);
    let signals = state
        .store
        .latest(limit, params.instrument.as_deref())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let total = signals.len();
    Ok(Json(SignalsResponse { signals, total }))
}

#[derive(Debug, Deserialize)]
pub struct RejectionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct RejectionsResponse {
    pub rejections: Vec<RejectionRecord>,
    pub total: usize,
}

/// GET /rejections/recent?limit=
pub async fn recent_rejections(
    State(state): State<ApiState>,
    Query(params): Query<RejectionsQuery>,
) -> Result<Json<RejectionsResponse>, StatusCode> {
    let rejections = state
        .store
        .recent_rejections(params.limit.min(MAX_PAGE_SIZE))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let total = rejections.len();
    Ok(Json(RejectionsResponse { rejections, total }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ledger_entries: usize,
    pub chain_head_sequence: Option<i64>,
    pub chain_head_hash: Option<String>,
    pub cycles_completed: u64,
    pub signals_emitted: u64,
    pub rejections_recorded: u64,
    pub risk: RiskStateSnapshot,
}

/// GET /status
pub async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, StatusCode> {
    let head = state
        .store
        .chain_head()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let (chain_head_sequence, chain_head_hash) = match head {
        Some((sequence, hash)) => (Some(sequence), Some(hash)),
        None => (None, None),
    };

    Ok(Json(StatusResponse {
        ledger_entries: state.store.len(),
        chain_head_sequence,
        chain_head_hash,
        cycles_completed: state.counters.cycles.load(Ordering::Relaxed),
        signals_emitted: state.counters.signals.load(Ordering::Relaxed),
        rejections_recorded: state.counters.rejections.load(Ordering::Relaxed),
        risk: state.risk.read().snapshot(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
