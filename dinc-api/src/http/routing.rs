//! Front-door endpoints
//!
//! `GET /` either serves this node's status or sends the client to a
//! healthier peer with a 307. `/load` is what peers poll to score this node.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use dinc_cluster::routing::{parse_hop_count, redirect_url};
use dinc_cluster::wire::{LoadReport, HOP_COUNT_HEADER};
use dinc_cluster::{BestPeerLookup, ClusterSnapshot, LocalReason, RouteDecision};
use serde::Serialize;

use crate::http::AppState;

/// Lowercase form of [`HOP_COUNT_HEADER`] for response headers
const HOP_COUNT: HeaderName = HeaderName::from_static("x-redirect-count");

/// Status served when a request is handled locally
#[derive(Debug, Serialize)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub cluster: ClusterSnapshot,
    pub hop_count: u32,
    pub served_locally_reason: LocalReason,
}

/// `/redirect` answer when no redirect happens
#[derive(Debug, Serialize)]
pub struct RedirectInfo {
    pub redirected_to: String,
    pub message: &'static str,
}

pub fn create_routing_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/load", get(load))
        .route("/redirect", get(redirect_to_best))
}

/// Routing entry point
pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let hop_count = parse_hop_count(
        headers
            .get(HOP_COUNT_HEADER)
            .and_then(|value| value.to_str().ok()),
    );

    match state.router.decide(hop_count).await {
        RouteDecision::Redirect { target, hop_count } => {
            let mut response = Redirect::temporary(&target).into_response();
            response
                .headers_mut()
                .insert(HOP_COUNT, HeaderValue::from(hop_count));
            response
        }
        RouteDecision::ServeLocally(reason) => Json(NodeStatus {
            cluster: state.health.snapshot(),
            hop_count,
            served_locally_reason: reason,
        })
        .into_response(),
    }
}

/// Current CPU load of this node
pub async fn load(State(state): State<AppState>) -> impl IntoResponse {
    let load = state.router.refresh_my_load().await;
    Json(LoadReport {
        address: Some(state.health.my_address().to_string()),
        cpu_load: (load * 100.0).round() / 100.0,
    })
}

/// Unconditional lookup of the best peer, ignoring this node's own load
pub async fn redirect_to_best(State(state): State<AppState>) -> Response {
    let my_address = state.health.my_address().to_string();
    match state.router.lookup_best_peer() {
        BestPeerLookup::Redirect(peer) => {
            tracing::debug!(target = %peer.address, "Redirecting to best peer");
            Redirect::temporary(&redirect_url(&peer.address)).into_response()
        }
        BestPeerLookup::SelfIsBest => Json(RedirectInfo {
            redirected_to: my_address,
            message: "This node is the best candidate",
        })
        .into_response(),
        BestPeerLookup::NoPeersKnown => Json(RedirectInfo {
            redirected_to: my_address,
            message: "No other nodes known",
        })
        .into_response(),
    }
}
