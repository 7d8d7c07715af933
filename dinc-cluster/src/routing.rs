//! Front-door routing decision
//!
//! Decides per request whether this node serves it or hands it to the
//! best-scoring peer with a 307. A hop counter carried in
//! [`HOP_COUNT_HEADER`](crate::wire::HOP_COUNT_HEADER) breaks redirect loops.

use dinc_core::LoadSensor;
use serde::Serialize;
use std::sync::Arc;

use crate::discovery::{HealthRegistry, Peer};

/// Redirects allowed before a node serves the request itself
pub const DEFAULT_MAX_HOPS: u32 = 3;

/// Why a request was served locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalReason {
    HopLimitReached,
    NotOverloaded,
    NoBetterPeer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// 307 to `target` carrying `hop_count` in the hop header
    Redirect { target: String, hop_count: u32 },
    ServeLocally(LocalReason),
}

/// Outcome of the unconditional `/redirect` lookup
#[derive(Debug, Clone, PartialEq)]
pub enum BestPeerLookup {
    Redirect(Peer),
    /// Peers are known but none is measured better than this node
    SelfIsBest,
    NoPeersKnown,
}

pub struct RequestRouter {
    health: Arc<HealthRegistry>,
    sensor: Arc<dyn LoadSensor>,
    max_hops: u32,
}

impl RequestRouter {
    #[must_use]
    pub fn new(health: Arc<HealthRegistry>, sensor: Arc<dyn LoadSensor>, max_hops: u32) -> Self {
        Self {
            health,
            sensor,
            max_hops,
        }
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    #[must_use]
    pub const fn max_hops(&self) -> u32 {
        self.max_hops
    }

    /// Sample the local CPU and record it as this node's load.
    ///
    /// A failed sample leaves the previous value in place.
    pub async fn refresh_my_load(&self) -> f64 {
        match self.sensor.cpu_load().await {
            Ok(load) => {
                self.health.set_my_load(load);
                load
            }
            Err(e) => {
                tracing::warn!(error = %e, "CPU sample failed, keeping last load");
                self.health.my_load()
            }
        }
    }

    /// Decide how to handle a request that has already been redirected
    /// `hop_count` times
    pub async fn decide(&self, hop_count: u32) -> RouteDecision {
        if hop_count >= self.max_hops {
            tracing::warn!(hop_count, "Redirect loop limit reached, serving locally");
            return RouteDecision::ServeLocally(LocalReason::HopLimitReached);
        }

        let load = self.refresh_my_load().await;
        if !self.health.is_overloaded() {
            return RouteDecision::ServeLocally(LocalReason::NotOverloaded);
        }

        match self.health.best_peer() {
            Some(best) if best.address != self.health.my_address() => {
                tracing::info!(
                    load,
                    target = %best.address,
                    hop_count,
                    "Overloaded, redirecting"
                );
                RouteDecision::Redirect {
                    target: redirect_url(&best.address),
                    hop_count: hop_count + 1,
                }
            }
            _ => RouteDecision::ServeLocally(LocalReason::NoBetterPeer),
        }
    }

    #[must_use]
    pub fn lookup_best_peer(&self) -> BestPeerLookup {
        if self.health.peer_count() == 0 {
            return BestPeerLookup::NoPeersKnown;
        }
        match self.health.best_peer() {
            Some(best) if best.address != self.health.my_address() => BestPeerLookup::Redirect(best),
            _ => BestPeerLookup::SelfIsBest,
        }
    }
}

/// Parse the inbound hop header. Missing or malformed values count as zero.
#[must_use]
pub fn parse_hop_count(value: Option<&str>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Location a redirect to `address` points at
#[must_use]
pub fn redirect_url(address: &str) -> String {
    format!("{}/", address.trim_end_matches('/'))
}
