//! Node lifecycle management
//!
//! Builds the node context once and owns the startup and shutdown of:
//! - the HTTP server
//! - registry heartbeat
//! - peer discovery and load polling
//! - gossip membership (started on demand or by the failover monitor)

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use dinc_api::{create_router, AppState};
use dinc_cluster::{
    DiscoverySettings, FailoverMonitor, FailoverPolicy, GossipMembership, GossipSettings,
    HealthRegistry, Heartbeat, PeerDiscovery, RequestRouter,
};
use dinc_core::{Config, LoadSensor};

/// Every long-lived component of a node, constructed once at startup
pub struct NodeContext {
    pub health: Arc<HealthRegistry>,
    pub router: Arc<RequestRouter>,
    pub gossip: Arc<GossipMembership>,
    pub failover: Arc<FailoverMonitor>,
    pub heartbeat: Arc<Heartbeat>,
    pub discovery: Arc<PeerDiscovery>,
}

impl NodeContext {
    pub fn build(config: &Config, sensor: Arc<dyn LoadSensor>) -> Self {
        let my_address = config.advertise_address();
        let registry_url = config.registry_url().to_string();

        let health = Arc::new(HealthRegistry::new(
            my_address.clone(),
            config.routing.cpu_threshold,
        ));
        let router = Arc::new(RequestRouter::new(
            health.clone(),
            sensor,
            config.routing.max_redirect_hops,
        ));

        let gossip = Arc::new(GossipMembership::new(
            my_address.clone(),
            config.gossip.seed_peers.iter().cloned(),
            GossipSettings {
                botlist_timeout: Duration::from_secs(config.gossip.botlist_timeout_secs),
                health_timeout: Duration::from_secs(config.gossip.health_timeout_secs),
                stop_timeout: Duration::from_secs(config.gossip.stop_timeout_secs),
            },
        ));
        let failover = Arc::new(FailoverMonitor::new(
            FailoverPolicy {
                enabled: config.gossip.auto_failover,
                failure_threshold: config.gossip.failure_threshold,
                auto_deactivate: config.gossip.auto_deactivate,
                gossip_interval: config.gossip.interval(),
            },
            gossip.clone(),
            health.clone(),
        ));

        let heartbeat = Arc::new(
            Heartbeat::new(
                registry_url.clone(),
                my_address,
                config.registry.heartbeat_interval(),
                Duration::from_secs(config.registry.request_timeout_secs),
            )
            .with_failover(failover.clone()),
        );
        let discovery = Arc::new(
            PeerDiscovery::new(
                health.clone(),
                registry_url,
                DiscoverySettings {
                    discovery_interval: config.registry.discovery_interval(),
                    discovery_timeout: Duration::from_secs(config.registry.discovery_timeout_secs),
                    poll_interval: Duration::from_secs(config.peers.poll_interval_secs),
                    load_timeout: Duration::from_secs(config.peers.load_timeout_secs),
                },
            )
            .with_failover(failover.clone()),
        );

        Self {
            health,
            router,
            gossip,
            failover,
            heartbeat,
            discovery,
        }
    }

    pub fn app_state(&self, config: &Config) -> AppState {
        AppState {
            health: self.health.clone(),
            router: self.router.clone(),
            gossip: self.gossip.clone(),
            gossip_interval: config.gossip.interval(),
        }
    }
}

/// DiNC node - manages all node components
pub struct NodeServer {
    config: Config,
    context: NodeContext,
    background: Vec<JoinHandle<()>>,
}

impl NodeServer {
    pub fn new(config: Config, sensor: Arc<dyn LoadSensor>) -> Self {
        let context = NodeContext::build(&config, sensor);
        Self {
            config,
            context,
            background: Vec::new(),
        }
    }

    /// Start every component and wait for a shutdown signal
    pub async fn start(mut self) -> anyhow::Result<()> {
        info!(address = %self.context.health.my_address(), "Starting DiNC node...");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Bind before announcing so peers never poll a node that is not listening
        let listener = tokio::net::TcpListener::bind(self.config.http_address())
            .await
            .map_err(|e| {
                anyhow::anyhow!("Failed to bind HTTP address {}: {e}", self.config.http_address())
            })?;
        let http_handle = self.start_http_server(listener, shutdown_rx);

        // First registration is awaited so the registry knows us before discovery runs
        self.background.push(self.context.heartbeat.start().await);
        self.background.push(self.context.discovery.start_discovery());
        self.background.push(self.context.discovery.start_load_polling());
        info!(
            auto_failover = self.config.gossip.auto_failover,
            failure_threshold = self.config.gossip.failure_threshold,
            "Background tasks started"
        );

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Signal the HTTP server to drain
        let _ = shutdown_tx.send(true);

        self.shutdown().await;
        Ok(())
    }

    /// Stop every background task and gossip
    async fn shutdown(&mut self) {
        info!("Shutting down DiNC node...");

        self.context.heartbeat.shutdown();
        self.context.discovery.shutdown();

        let handles = std::mem::take(&mut self.background);
        let stop_timeout = Duration::from_secs(self.config.gossip.stop_timeout_secs);
        if tokio::time::timeout(stop_timeout, join_background(handles))
            .await
            .is_err()
        {
            warn!("Background tasks did not stop in time, continuing shutdown");
        }

        if self.context.failover.is_auto_activated() {
            info!("Stopping gossip activated by registry failover");
        }
        if self.context.gossip.stop().await {
            info!("Gossip membership stopped");
        }

        info!("DiNC node shut down complete");
    }

    fn start_http_server(
        &self,
        listener: tokio::net::TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let http_router = create_router(self.context.app_state(&self.config));

        tokio::spawn(async move {
            match listener.local_addr() {
                Ok(addr) => info!("HTTP server listening on {}", addr),
                Err(e) => warn!("HTTP server listening on unknown address: {}", e),
            }

            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, http_router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        })
    }
}

async fn join_background(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
