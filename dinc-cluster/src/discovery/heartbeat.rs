//! Heartbeat to the central registry
//!
//! Registers this node once at startup and then re-registers on a fixed
//! interval. Failures are logged and otherwise ignored; the registry expires
//! nodes that stop announcing themselves.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::gossip::FailoverMonitor;
use crate::wire::RegisterRequest;

/// Periodic `POST {registry}/register`
pub struct Heartbeat {
    client: reqwest::Client,
    registry_url: String,
    my_address: String,
    interval: Duration,
    timeout: Duration,
    failover: Option<Arc<FailoverMonitor>>,
    cancel_token: CancellationToken,
}

impl Heartbeat {
    #[must_use]
    pub fn new(
        registry_url: impl Into<String>,
        my_address: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            my_address: my_address.into(),
            interval,
            timeout,
            failover: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Report every registration outcome to the failover monitor
    #[must_use]
    pub fn with_failover(mut self, monitor: Arc<FailoverMonitor>) -> Self {
        self.failover = Some(monitor);
        self
    }

    /// Send one registration
    pub async fn send(&self) -> Result<()> {
        let url = format!("{}/register", self.registry_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&RegisterRequest {
                address: self.my_address.clone(),
            })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(Error::UnexpectedStatus {
                url,
                status: status.as_u16(),
            })
        }
    }

    /// Send one registration, log the outcome and tell the failover monitor
    async fn beat(&self) {
        match self.send().await {
            Ok(()) => {
                tracing::debug!(address = %self.my_address, "Heartbeat sent");
                if let Some(ref monitor) = self.failover {
                    monitor.record_success("heartbeat").await;
                }
            }
            Err(e) => {
                tracing::warn!(registry = %self.registry_url, error = %e, "Heartbeat failed");
                if let Some(ref monitor) = self.failover {
                    monitor.record_failure("heartbeat").await;
                }
            }
        }
    }

    /// Register immediately, then keep re-registering every interval
    ///
    /// The first registration is awaited before the loop is spawned. Use
    /// `shutdown()` to stop the loop.
    pub async fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.beat().await;

        let this = self.clone();
        let cancel_token = self.cancel_token.clone();
        let mut timer = interval_at(Instant::now() + self.interval, self.interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        tracing::info!("Heartbeat loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        this.beat().await;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_posts_address() {
        let registry = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .and(body_json(serde_json::json!({"address": "http://a:8081"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
            .expect(1)
            .mount(&registry)
            .await;

        let heartbeat = Heartbeat::new(
            registry.uri(),
            "http://a:8081",
            Duration::from_secs(5),
            Duration::from_secs(3),
        );
        heartbeat.send().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_non_200() {
        let registry = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&registry)
            .await;

        let heartbeat = Heartbeat::new(
            format!("{}/", registry.uri()),
            "http://a:8081",
            Duration::from_secs(5),
            Duration::from_secs(3),
        );
        let err = heartbeat.send().await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_loop_keeps_running_through_failures() {
        let registry = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&registry)
            .await;

        let heartbeat = Arc::new(Heartbeat::new(
            registry.uri(),
            "http://a:8081",
            Duration::from_millis(50),
            Duration::from_secs(1),
        ));
        let handle = heartbeat.start().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!handle.is_finished());
        let received = registry.received_requests().await.unwrap();
        // Initial registration plus several ticks
        assert!(received.len() >= 3, "only {} heartbeats", received.len());

        heartbeat.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_not_fatal() {
        let heartbeat = Arc::new(Heartbeat::new(
            "http://127.0.0.1:1",
            "http://a:8081",
            Duration::from_millis(20),
            Duration::from_millis(200),
        ));
        assert!(heartbeat.send().await.is_err());

        let handle = heartbeat.start().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_finished());
        heartbeat.shutdown();
    }
}
