//! Registry-independent fallback membership
pub mod failover;
pub mod membership;

pub use failover::{FailoverMonitor, FailoverPolicy};
pub use membership::{GossipMembership, GossipSettings, GossipStats, GOSSIP_MODE};
