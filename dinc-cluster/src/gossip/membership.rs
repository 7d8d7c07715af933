//! Decentralized fallback membership (A_M_R)
//!
//! An address-only peer set that keeps working without the central registry.
//! While running, two loops maintain it:
//! - botlist sync: ask every known peer for its peer list and merge unknown
//!   addresses, so membership spreads transitively
//! - liveness: check every known peer's `/health` and drop any that fail
//!
//! The set has its own lock and never shares state with the
//! [`HealthRegistry`](crate::discovery::HealthRegistry).

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::wire::{get_json, get_ok, Botlist};

/// Mode name reported in stats
pub const GOSSIP_MODE: &str = "A_M_R";

/// Network timeouts of the gossip loops
#[derive(Debug, Clone)]
pub struct GossipSettings {
    pub botlist_timeout: Duration,
    pub health_timeout: Duration,
    /// Upper bound on waiting for the loops to exit in `stop()`
    pub stop_timeout: Duration,
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            botlist_timeout: Duration::from_secs(3),
            health_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// Point-in-time view of the gossip membership
#[derive(Debug, Clone, Serialize)]
pub struct GossipStats {
    pub mode: &'static str,
    pub status: &'static str,
    pub running: bool,
    pub my_address: String,
    pub active_peers_count: usize,
    pub active_peers: Vec<String>,
    pub timestamp: String,
}

struct RunningLoops {
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Gossip-maintained peer set
pub struct GossipMembership {
    self_address: String,
    active_peers: Mutex<HashSet<String>>,
    loops: Mutex<Option<RunningLoops>>,
    client: reqwest::Client,
    settings: GossipSettings,
}

impl GossipMembership {
    /// Create a stopped membership seeded with `seed_peers`
    #[must_use]
    pub fn new<I, S>(self_address: impl Into<String>, seed_peers: I, settings: GossipSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let membership = Self {
            self_address: self_address.into(),
            active_peers: Mutex::new(HashSet::new()),
            loops: Mutex::new(None),
            client: reqwest::Client::new(),
            settings,
        };
        membership.add_peers(seed_peers);
        tracing::info!(address = %membership.self_address, "Gossip membership initialized");
        membership
    }

    #[must_use]
    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.loops.lock().is_some()
    }

    /// Insert one address. Returns `true` if it was not known before.
    /// This node's own address and blank strings are ignored.
    pub fn add_peer(&self, address: &str) -> bool {
        if address == self.self_address || address.trim().is_empty() {
            return false;
        }
        let inserted = self.active_peers.lock().insert(address.to_string());
        if inserted {
            tracing::info!(peer = %address, "Gossip peer added");
        }
        inserted
    }

    /// Insert many addresses, returning how many were new
    pub fn add_peers<I, S>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        addresses
            .into_iter()
            .map(Into::into)
            .filter(|address: &String| self.add_peer(address))
            .count()
    }

    /// Known addresses, sorted
    #[must_use]
    pub fn active_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.active_peers.lock().iter().cloned().collect();
        peers.sort();
        peers
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.active_peers.lock().len()
    }

    /// Start both loops. A second call while running only logs a warning and
    /// returns `false`.
    pub fn start(self: &Arc<Self>, sync_interval: Duration) -> bool {
        // Check, spawn and store under one lock so a racing stop() always
        // sees either no loops or all of them
        let mut loops = self.loops.lock();
        if loops.is_some() {
            tracing::warn!("Gossip membership already running");
            return false;
        }

        let cancel_token = CancellationToken::new();
        let handles = vec![
            tokio::spawn(
                self.clone()
                    .botlist_sync_loop(sync_interval, cancel_token.clone()),
            ),
            tokio::spawn(
                self.clone()
                    .health_loop(sync_interval * 2, cancel_token.clone()),
            ),
        ];
        *loops = Some(RunningLoops {
            cancel_token,
            handles,
        });
        drop(loops);

        tracing::info!(
            interval_secs = sync_interval.as_secs_f64(),
            peers = self.peer_count(),
            "Gossip mode activated"
        );
        true
    }

    /// Stop both loops and wait for them up to the configured bound.
    ///
    /// Returns whether gossip was running. Calling it again is harmless.
    pub async fn stop(&self) -> bool {
        let Some(loops) = self.loops.lock().take() else {
            return false;
        };

        loops.cancel_token.cancel();
        if tokio::time::timeout(self.settings.stop_timeout, join_all(loops.handles))
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = self.settings.stop_timeout.as_secs_f64(),
                "Gossip loops did not exit in time, continuing"
            );
        }

        tracing::info!("Gossip mode deactivated");
        true
    }

    /// One botlist exchange round. Returns how many new addresses were
    /// learned; unreachable peers are skipped until the next round.
    pub async fn sync_botlists(&self) -> usize {
        let peers = self.active_peers();
        let timeout = self.settings.botlist_timeout;

        let results = join_all(peers.iter().map(|peer| {
            let client = self.client.clone();
            async move {
                let url = format!("{}/a_m_r/botlist", peer.trim_end_matches('/'));
                get_json::<Botlist>(&client, &url, timeout).await
            }
        }))
        .await;

        let mut learned = 0;
        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(botlist) => {
                    tracing::debug!(peer = %peer, count = botlist.peers.len(), "Botlist received");
                    learned += self.add_peers(botlist.peers);
                }
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "Botlist fetch failed");
                }
            }
        }
        learned
    }

    /// One liveness round. Every peer failing its `/health` check is removed
    /// at once; the evicted addresses are returned.
    pub async fn check_health(&self) -> Vec<String> {
        let peers = self.active_peers();
        let timeout = self.settings.health_timeout;

        let results = join_all(peers.iter().map(|peer| {
            let client = self.client.clone();
            async move {
                let url = format!("{}/health", peer.trim_end_matches('/'));
                get_ok(&client, &url, timeout).await
            }
        }))
        .await;

        let dead: Vec<String> = peers
            .into_iter()
            .zip(results)
            .filter_map(|(peer, result)| result.err().map(|_| peer))
            .collect();

        if !dead.is_empty() {
            let mut active = self.active_peers.lock();
            for peer in &dead {
                if active.remove(peer) {
                    tracing::warn!(peer = %peer, "Dead gossip peer removed");
                }
            }
        }
        dead
    }

    async fn botlist_sync_loop(self: Arc<Self>, period: Duration, cancel_token: CancellationToken) {
        tracing::info!("Botlist sync loop started");
        let mut timer = interval(period);
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = timer.tick() => {}
            }
            tokio::select! {
                () = cancel_token.cancelled() => break,
                learned = self.sync_botlists() => {
                    if learned > 0 {
                        tracing::info!(learned, total = self.peer_count(), "Gossip learned new peers");
                    }
                }
            }
        }
        tracing::info!("Botlist sync loop stopped");
    }

    async fn health_loop(self: Arc<Self>, period: Duration, cancel_token: CancellationToken) {
        tracing::info!("Gossip health loop started");
        let mut timer = interval(period);
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = timer.tick() => {}
            }
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = self.check_health() => {}
            }
        }
        tracing::info!("Gossip health loop stopped");
    }

    #[must_use]
    pub fn stats(&self) -> GossipStats {
        let peers = self.active_peers();
        let running = self.is_running();
        GossipStats {
            mode: GOSSIP_MODE,
            status: if running { "active" } else { "inactive" },
            running,
            my_address: self.self_address.clone(),
            active_peers_count: peers.len(),
            active_peers: peers,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Payload served on `/a_m_r/botlist`
    #[must_use]
    pub fn botlist(&self) -> Botlist {
        let peers = self.active_peers();
        Botlist {
            address: Some(self.self_address.clone()),
            count: peers.len(),
            peers,
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }
}
