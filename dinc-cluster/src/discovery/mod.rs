//! Registry-driven peer discovery and health scoring

pub mod health_registry;
pub mod heartbeat;
pub mod peer_discovery;

pub use health_registry::{ClusterSnapshot, HealthRegistry, Peer, PeerSetChange, UNMEASURED_SCORE};
pub use heartbeat::Heartbeat;
pub use peer_discovery::{fetch_peer_load, DiscoverySettings, PeerDiscovery};
