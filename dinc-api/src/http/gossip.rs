//! Gossip (A_M_R) control endpoints
//!
//! Peers read `/a_m_r/botlist` during their sync rounds. The remaining
//! routes let an operator inspect, seed, start and stop the fallback
//! membership by hand.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dinc_cluster::wire::{SyncRequest, SyncResponse};
use serde::Serialize;

use crate::http::{AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub peers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeactivationResponse {
    pub status: &'static str,
    pub message: &'static str,
}

pub fn create_gossip_router() -> Router<AppState> {
    Router::new()
        .route("/a_m_r/status", get(status))
        .route("/a_m_r/botlist", get(botlist))
        .route("/a_m_r/sync", post(sync))
        .route("/a_m_r/activate", post(activate))
        .route("/a_m_r/deactivate", post(deactivate))
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gossip.stats())
}

pub async fn botlist(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gossip.botlist())
}

/// Merge a pushed peer list. `added` counts only addresses not known before.
pub async fn sync(
    State(state): State<AppState>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> AppResult<Json<SyncResponse>> {
    let Json(request) = payload?;
    let added = state.gossip.add_peers(request.peers);
    tracing::info!(added, "Peers synced over HTTP");

    Ok(Json(SyncResponse {
        status: "synced".to_string(),
        added,
        total_peers: state.gossip.peer_count(),
    }))
}

pub async fn activate(State(state): State<AppState>) -> impl IntoResponse {
    let message = if state.gossip.start(state.gossip_interval) {
        "A_M_R mode is now active (P2P)"
    } else {
        "A_M_R mode was already active"
    };
    Json(ActivationResponse {
        status: "activated",
        message,
        peers: state.gossip.active_peers(),
    })
}

pub async fn deactivate(State(state): State<AppState>) -> impl IntoResponse {
    state.gossip.stop().await;
    Json(DeactivationResponse {
        status: "deactivated",
        message: "A_M_R mode is now inactive",
    })
}
