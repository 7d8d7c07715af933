//! Peer discovery and load polling
//!
//! Two independent loops feed the [`HealthRegistry`]:
//! 1. Discovery: pull the authoritative node list from the registry and
//!    replace the peer set
//! 2. Load polling: fetch `/load` from every known peer concurrently and
//!    record load plus round-trip latency
//!
//! A registry outage therefore leaves the last known peers and their recent
//! metrics in place, and one slow peer never holds up the others.

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::health_registry::{HealthRegistry, PeerSetChange};
use crate::error::Result;
use crate::gossip::FailoverMonitor;
use crate::wire::{get_json, LoadReport, NodeEntry};

/// Timing of both discovery loops
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub discovery_interval: Duration,
    pub discovery_timeout: Duration,
    pub poll_interval: Duration,
    pub load_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(7),
            load_timeout: Duration::from_secs(3),
        }
    }
}

/// Keeps the health registry's peer set and metrics current
pub struct PeerDiscovery {
    health: Arc<HealthRegistry>,
    client: reqwest::Client,
    registry_url: String,
    settings: DiscoverySettings,
    failover: Option<Arc<FailoverMonitor>>,
    cancel_token: CancellationToken,
}

impl PeerDiscovery {
    #[must_use]
    pub fn new(
        health: Arc<HealthRegistry>,
        registry_url: impl Into<String>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            health,
            client: reqwest::Client::new(),
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            settings,
            failover: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Report every registry fetch outcome to the failover monitor
    #[must_use]
    pub fn with_failover(mut self, monitor: Arc<FailoverMonitor>) -> Self {
        self.failover = Some(monitor);
        self
    }

    /// Fetch `GET {registry}/nodes` and replace the peer set.
    ///
    /// On error the peer set is left untouched.
    pub async fn refresh_peers(&self) -> Result<PeerSetChange> {
        let url = format!("{}/nodes", self.registry_url);
        let nodes: Vec<NodeEntry> =
            get_json(&self.client, &url, self.settings.discovery_timeout).await?;

        let my_address = self.health.my_address();
        let addresses = nodes
            .into_iter()
            .map(|n| n.address)
            .filter(|addr| addr != my_address);

        Ok(self.health.set_peers(addresses))
    }

    /// Poll every known peer once, concurrently. Returns how many peers got
    /// fresh metrics; failed peers keep whatever they had.
    pub async fn poll_loads(&self) -> usize {
        let peers = self.health.peer_addresses();
        let timeout = self.settings.load_timeout;

        let results = join_all(peers.iter().map(|address| {
            let client = self.client.clone();
            async move { fetch_peer_load(&client, address, timeout).await }
        }))
        .await;

        let mut updated = 0;
        for (address, result) in peers.iter().zip(results) {
            match result {
                Ok((load, latency_ms)) => {
                    if self.health.update_peer_metrics(address, load, latency_ms) {
                        updated += 1;
                    }
                    tracing::trace!(peer = %address, load, latency_ms, "Peer load updated");
                }
                Err(e) => {
                    tracing::debug!(peer = %address, error = %e, "Peer load fetch failed");
                }
            }
        }
        updated
    }

    async fn discover_once(&self) {
        match self.refresh_peers().await {
            Ok(change) => {
                if change.is_empty() {
                    tracing::debug!(peers = self.health.peer_count(), "Peer set unchanged");
                } else {
                    tracing::info!(
                        added = ?change.added,
                        removed = ?change.removed,
                        peers = self.health.peer_count(),
                        "Peer set updated from registry"
                    );
                }
                if let Some(ref monitor) = self.failover {
                    monitor.record_success("discovery").await;
                }
            }
            Err(e) => {
                tracing::warn!(registry = %self.registry_url, error = %e, "Peer discovery failed");
                if let Some(ref monitor) = self.failover {
                    monitor.record_failure("discovery").await;
                }
            }
        }
    }

    /// Start the registry discovery loop
    pub fn start_discovery(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let cancel_token = self.cancel_token.clone();
        let mut timer = interval(self.settings.discovery_interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        tracing::info!("Peer discovery loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        this.discover_once().await;
                    }
                }
            }
        })
    }

    /// Start the peer load polling loop
    pub fn start_load_polling(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let cancel_token = self.cancel_token.clone();
        let mut timer = interval(self.settings.poll_interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        tracing::info!("Peer load polling loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        let updated = this.poll_loads().await;
                        tracing::debug!(updated, "Peer load poll round finished");
                    }
                }
            }
        })
    }

    /// Stop both loops
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

/// `GET {peer}/load`, returning `(cpu_load, latency_ms)`
pub async fn fetch_peer_load(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<(f64, f64)> {
    let url = format!("{}/load", address.trim_end_matches('/'));
    let started = Instant::now();
    let report: LoadReport = get_json(client, &url, timeout).await?;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    Ok((report.cpu_load, latency_ms))
}
