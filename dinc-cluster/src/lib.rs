pub mod discovery;
pub mod error;
pub mod gossip;
pub mod routing;
pub mod wire;

pub use discovery::{
    ClusterSnapshot, DiscoverySettings, HealthRegistry, Heartbeat, Peer, PeerDiscovery,
    PeerSetChange,
};
pub use error::{Error, Result};
pub use gossip::{FailoverMonitor, FailoverPolicy, GossipMembership, GossipSettings, GossipStats};
pub use routing::{BestPeerLookup, LocalReason, RequestRouter, RouteDecision};
