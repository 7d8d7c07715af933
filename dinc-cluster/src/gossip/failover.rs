//! Automatic switch between registry discovery and gossip
//!
//! Heartbeat and discovery report each registry round trip here. After
//! `failure_threshold` consecutive failures the gossip membership is seeded
//! with every address the health registry last knew and started. The first
//! successful round trip afterwards stops gossip again, but only if it was
//! started by this monitor.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::GossipMembership;
use crate::discovery::HealthRegistry;

#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub auto_deactivate: bool,
    pub gossip_interval: Duration,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            auto_deactivate: true,
            gossip_interval: Duration::from_secs(5),
        }
    }
}

pub struct FailoverMonitor {
    policy: FailoverPolicy,
    gossip: Arc<GossipMembership>,
    health: Arc<HealthRegistry>,
    consecutive_failures: AtomicU32,
    auto_activated: AtomicBool,
}

impl FailoverMonitor {
    #[must_use]
    pub fn new(
        policy: FailoverPolicy,
        gossip: Arc<GossipMembership>,
        health: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            policy,
            gossip,
            health,
            consecutive_failures: AtomicU32::new(0),
            auto_activated: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Whether the running gossip was started by this monitor
    #[must_use]
    pub fn is_auto_activated(&self) -> bool {
        self.auto_activated.load(Ordering::Acquire)
    }

    /// A registry round trip failed
    pub async fn record_failure(&self, source: &'static str) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(source, failures, "Registry failure recorded");

        // Fire once per outage so a manual deactivation during the outage sticks
        if !self.policy.enabled || failures != self.policy.failure_threshold {
            return;
        }

        let seeded = self.gossip.add_peers(self.health.peer_addresses());
        if self.gossip.start(self.policy.gossip_interval) {
            self.auto_activated.store(true, Ordering::Release);
            tracing::warn!(
                source,
                failures,
                seeded,
                "Registry unreachable, switched to gossip membership"
            );
        }
    }

    /// A registry round trip succeeded
    pub async fn record_success(&self, source: &'static str) {
        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        if previous >= self.policy.failure_threshold {
            tracing::info!(source, previous, "Registry reachable again");
        }

        if self.policy.auto_deactivate && self.auto_activated.swap(false, Ordering::AcqRel) {
            self.gossip.stop().await;
            tracing::info!(source, "Gossip membership stopped after registry recovery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::GossipSettings;

    fn setup(policy: FailoverPolicy) -> (FailoverMonitor, Arc<GossipMembership>) {
        let health = Arc::new(HealthRegistry::new("http://a:1", 70.0));
        health.set_peers(["http://b:1", "http://c:1"]);
        let gossip = Arc::new(GossipMembership::new(
            "http://a:1",
            Vec::<String>::new(),
            GossipSettings::default(),
        ));
        let policy = FailoverPolicy {
            gossip_interval: Duration::from_secs(60),
            ..policy
        };
        (FailoverMonitor::new(policy, gossip.clone(), health), gossip)
    }

    #[tokio::test]
    async fn test_activates_at_threshold_with_registry_peers() {
        let (monitor, gossip) = setup(FailoverPolicy::default());

        monitor.record_failure("heartbeat").await;
        monitor.record_failure("discovery").await;
        assert!(!gossip.is_running());

        monitor.record_failure("heartbeat").await;
        assert!(gossip.is_running());
        assert!(monitor.is_auto_activated());
        assert_eq!(
            gossip.active_peers(),
            vec!["http://b:1".to_string(), "http://c:1".to_string()]
        );

        gossip.stop().await;
    }

    #[tokio::test]
    async fn test_success_resets_and_deactivates() {
        let (monitor, gossip) = setup(FailoverPolicy::default());
        for _ in 0..3 {
            monitor.record_failure("heartbeat").await;
        }
        assert!(gossip.is_running());

        monitor.record_success("heartbeat").await;
        assert_eq!(monitor.consecutive_failures(), 0);
        assert!(!gossip.is_running());
        assert!(!monitor.is_auto_activated());
    }

    #[tokio::test]
    async fn test_manual_activation_survives_recovery() {
        let (monitor, gossip) = setup(FailoverPolicy::default());
        assert!(gossip.start(Duration::from_secs(60)));

        for _ in 0..3 {
            monitor.record_failure("discovery").await;
        }
        assert!(!monitor.is_auto_activated());

        monitor.record_success("discovery").await;
        assert!(gossip.is_running());
        gossip.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_policy_only_counts() {
        let (monitor, gossip) = setup(FailoverPolicy {
            enabled: false,
            ..FailoverPolicy::default()
        });
        for _ in 0..5 {
            monitor.record_failure("heartbeat").await;
        }
        assert_eq!(monitor.consecutive_failures(), 5);
        assert!(!gossip.is_running());
    }

    #[tokio::test]
    async fn test_auto_deactivate_off_keeps_gossip() {
        let (monitor, gossip) = setup(FailoverPolicy {
            auto_deactivate: false,
            ..FailoverPolicy::default()
        });
        for _ in 0..3 {
            monitor.record_failure("heartbeat").await;
        }
        monitor.record_success("heartbeat").await;
        assert!(gossip.is_running());
        gossip.stop().await;
    }
}
