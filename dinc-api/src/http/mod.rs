// Module: http
// JSON/HTTP surface of a node

pub mod error;
pub mod gossip;
pub mod health;
pub mod routing;

use axum::Router;
use dinc_cluster::{GossipMembership, HealthRegistry, RequestRouter};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
///
/// Built once at startup; every handler reaches node state through it.
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthRegistry>,
    pub router: Arc<RequestRouter>,
    pub gossip: Arc<GossipMembership>,
    /// Interval used when gossip is activated over HTTP
    pub gossip_interval: Duration,
}

/// Create the HTTP router with every endpoint mounted
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routing::create_routing_router())
        .merge(health::create_health_router())
        .merge(gossip::create_gossip_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, Response};
    use dinc_cluster::routing::DEFAULT_MAX_HOPS;
    use dinc_cluster::GossipSettings;
    use dinc_core::FixedLoadSensor;

    pub const SELF_ADDRESS: &str = "http://a:8081";

    pub struct TestNode {
        pub state: AppState,
    }

    impl TestNode {
        pub fn new(load: f64) -> Self {
            let health = Arc::new(HealthRegistry::new(SELF_ADDRESS, 70.0));
            let sensor = Arc::new(FixedLoadSensor::new(load));
            let router = Arc::new(RequestRouter::new(
                health.clone(),
                sensor,
                DEFAULT_MAX_HOPS,
            ));
            let gossip = Arc::new(GossipMembership::new(
                SELF_ADDRESS,
                Vec::<String>::new(),
                GossipSettings::default(),
            ));
            Self {
                state: AppState {
                    health,
                    router,
                    gossip,
                    gossip_interval: Duration::from_secs(60),
                },
            }
        }

        pub fn app(&self) -> Router {
            create_router(self.state.clone())
        }
    }

    pub async fn json_body(response: Response<Body>) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    pub fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}
