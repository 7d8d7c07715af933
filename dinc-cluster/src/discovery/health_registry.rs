//! Health registry for registry-discovered peers
//!
//! Holds this node's own load, the configured overload threshold and the
//! measured load/latency of every peer the central registry lists. One mutex
//! guards the whole view so a reader never sees a half-replaced peer set.

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Score of a peer that has never been measured
pub const UNMEASURED_SCORE: f64 = 9999.0;

const LOAD_WEIGHT: f64 = 0.7;
const LATENCY_WEIGHT: f64 = 0.3;

/// Another node as seen through the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peer {
    pub address: String,
    /// CPU utilisation percentage, 0 until measured
    #[serde(serialize_with = "round2")]
    pub load: f64,
    /// Round trip of the last `/load` fetch in milliseconds, 0 until measured
    #[serde(serialize_with = "round2")]
    pub latency: f64,
    /// Lower is healthier
    #[serde(serialize_with = "round2")]
    pub score: f64,
}

impl Peer {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            load: 0.0,
            latency: 0.0,
            score: UNMEASURED_SCORE,
        }
    }

    /// Replace both metrics and recompute the score
    pub fn update_metrics(&mut self, load: f64, latency: f64) {
        self.load = load;
        self.latency = latency;
        self.score = score(load, latency);
    }

    /// A peer with neither metric set is not eligible for routing
    #[must_use]
    pub fn is_measured(&self) -> bool {
        self.load > 0.0 || self.latency > 0.0
    }
}

/// Weighted health score, lower is better
#[must_use]
pub fn score(load: f64, latency: f64) -> f64 {
    LOAD_WEIGHT * load + LATENCY_WEIGHT * latency
}

fn round2<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 100.0).round() / 100.0)
}

/// Outcome of a full peer-set replacement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSetChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl PeerSetChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Consistent point-in-time copy of the whole view
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSnapshot {
    pub my_address: String,
    #[serde(serialize_with = "round2")]
    pub my_load: f64,
    pub threshold: f64,
    pub is_overloaded: bool,
    pub peers: Vec<Peer>,
    pub best_peer: Option<Peer>,
}

#[derive(Debug, Default)]
struct ClusterView {
    my_load: f64,
    peers: HashMap<String, Peer>,
}

impl ClusterView {
    fn best_peer(&self) -> Option<Peer> {
        let mut best: Option<&Peer> = None;
        for peer in self.peers.values().filter(|p| p.is_measured()) {
            // Strict comparison keeps the first peer encountered on ties
            if best.is_none_or(|b| peer.score < b.score) {
                best = Some(peer);
            }
        }
        best.cloned()
    }
}

/// Thread-safe store of this node's load and its peers' health
pub struct HealthRegistry {
    my_address: String,
    cpu_threshold: f64,
    view: Mutex<ClusterView>,
}

impl HealthRegistry {
    #[must_use]
    pub fn new(my_address: impl Into<String>, cpu_threshold: f64) -> Self {
        Self {
            my_address: my_address.into(),
            cpu_threshold,
            view: Mutex::new(ClusterView::default()),
        }
    }

    #[must_use]
    pub fn my_address(&self) -> &str {
        &self.my_address
    }

    #[must_use]
    pub const fn cpu_threshold(&self) -> f64 {
        self.cpu_threshold
    }

    #[must_use]
    pub fn my_load(&self) -> f64 {
        self.view.lock().my_load
    }

    pub fn set_my_load(&self, load: f64) {
        self.view.lock().my_load = load;
    }

    /// Strictly above the threshold; equal is not overloaded
    #[must_use]
    pub fn is_overloaded(&self) -> bool {
        self.view.lock().my_load > self.cpu_threshold
    }

    /// Replace the peer set with exactly `addresses` (minus this node).
    ///
    /// Newly seen peers start unmeasured. Peers missing from `addresses` are
    /// dropped together with their metrics.
    pub fn set_peers<I, S>(&self, addresses: I) -> PeerSetChange
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next: HashMap<String, Peer> = HashMap::new();
        let mut change = PeerSetChange::default();

        let mut view = self.view.lock();
        for address in addresses {
            let address = address.into();
            if address == self.my_address || next.contains_key(&address) {
                continue;
            }
            let peer = match view.peers.remove(&address) {
                Some(existing) => existing,
                None => {
                    change.added.push(address.clone());
                    Peer::new(address.clone())
                }
            };
            next.insert(address, peer);
        }
        change.removed = view.peers.drain().map(|(address, _)| address).collect();
        view.peers = next;

        change
    }

    /// Record fresh metrics for a known peer. Unknown addresses are ignored
    /// and `false` is returned.
    pub fn update_peer_metrics(&self, address: &str, load: f64, latency: f64) -> bool {
        let mut view = self.view.lock();
        match view.peers.get_mut(address) {
            Some(peer) => {
                peer.update_metrics(load, latency);
                true
            }
            None => false,
        }
    }

    /// Measured peer with the lowest score
    #[must_use]
    pub fn best_peer(&self) -> Option<Peer> {
        self.view.lock().best_peer()
    }

    #[must_use]
    pub fn all_peers(&self) -> Vec<Peer> {
        self.view.lock().peers.values().cloned().collect()
    }

    #[must_use]
    pub fn peer_addresses(&self) -> Vec<String> {
        self.view.lock().peers.keys().cloned().collect()
    }

    #[must_use]
    pub fn get_peer(&self, address: &str) -> Option<Peer> {
        self.view.lock().peers.get(address).cloned()
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.view.lock().peers.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> ClusterSnapshot {
        let view = self.view.lock();
        let mut peers: Vec<Peer> = view.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.address.cmp(&b.address));
        ClusterSnapshot {
            my_address: self.my_address.clone(),
            my_load: view.my_load,
            threshold: self.cpu_threshold,
            is_overloaded: view.my_load > self.cpu_threshold,
            best_peer: view.best_peer(),
            peers,
        }
    }
}
