//! Liveness endpoints
//!
//! `/health` is what peers check during gossip; `/ping` lets load generators
//! see which node actually served a request.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use dinc_cluster::wire::{HealthStatus, Pong};

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ping", get(ping))
}

/// Always healthy while the server is up
pub async fn health_check() -> impl IntoResponse {
    Json(HealthStatus::healthy())
}

pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    Json(Pong {
        status: "pong".to_string(),
        address: state.health.my_address().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use crate::http::test_support::{get, json_body, TestNode, SELF_ADDRESS};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let node = TestNode::new(0.0);
        let response = node.app().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn test_ping_reports_serving_node() {
        let node = TestNode::new(0.0);
        let json = json_body(node.app().oneshot(get("/ping")).await.unwrap()).await;
        assert_eq!(json, serde_json::json!({"status": "pong", "address": SELF_ADDRESS}));
    }
}
