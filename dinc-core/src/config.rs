use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub routing: RoutingConfig,
    pub peers: PeerPollConfig,
    pub gossip: GossipConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Address other nodes use to reach this one (`http://host:port`).
    /// Derived from the machine hostname when unset.
    pub advertise_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            advertise_address: None,
        }
    }
}

/// Central registry connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub url: String,
    pub heartbeat_interval_secs: u64,
    pub discovery_interval_secs: u64,
    /// Timeout for `POST /register`
    pub request_timeout_secs: u64,
    /// Timeout for `GET /nodes`
    pub discovery_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            heartbeat_interval_secs: 5,
            discovery_interval_secs: 10,
            request_timeout_secs: 3,
            discovery_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// CPU percentage above which this node redirects traffic
    pub cpu_threshold: f64,
    /// Requests carrying this many hops or more are always served locally
    pub max_redirect_hops: u32,
    /// Sampling window of the CPU load sensor
    pub load_sample_window_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 70.0,
            max_redirect_hops: 3,
            load_sample_window_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerPollConfig {
    pub poll_interval_secs: u64,
    pub load_timeout_secs: u64,
}

impl Default for PeerPollConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 7,
            load_timeout_secs: 3,
        }
    }
}

/// Decentralized fallback membership (A_M_R) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Botlist exchange interval; the liveness loop runs at twice this
    pub interval_secs: u64,
    pub botlist_timeout_secs: u64,
    pub health_timeout_secs: u64,
    /// Upper bound on waiting for the gossip loops to exit on stop
    pub stop_timeout_secs: u64,
    /// Addresses the gossip set starts with
    pub seed_peers: Vec<String>,
    /// Start gossip automatically once the registry looks unreachable
    pub auto_failover: bool,
    /// Consecutive registry failures before automatic activation
    pub failure_threshold: u32,
    /// Stop automatically started gossip once the registry answers again
    pub auto_deactivate: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            botlist_timeout_secs: 3,
            health_timeout_secs: 2,
            stop_timeout_secs: 2,
            seed_peers: Vec::new(),
            auto_failover: true,
            failure_threshold: 3,
            auto_deactivate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // DINC_REGISTRY__URL, DINC_ROUTING__CPU_THRESHOLD, ...
        builder = builder.add_source(
            Environment::with_prefix("DINC")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("gossip.seed_peers")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Check the whole configuration, reporting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(0.0..=100.0).contains(&self.routing.cpu_threshold) {
            errors.push(format!(
                "routing.cpu_threshold must be within 0..=100, got {}",
                self.routing.cpu_threshold
            ));
        }
        if self.routing.max_redirect_hops == 0 {
            errors.push("routing.max_redirect_hops must be at least 1".to_string());
        }

        match url::Url::parse(&self.registry.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(format!(
                "registry.url must use http or https, got scheme '{}'",
                url.scheme()
            )),
            Err(e) => errors.push(format!("registry.url is invalid: {e}")),
        }

        let intervals = [
            ("registry.heartbeat_interval_secs", self.registry.heartbeat_interval_secs),
            ("registry.discovery_interval_secs", self.registry.discovery_interval_secs),
            ("registry.request_timeout_secs", self.registry.request_timeout_secs),
            ("registry.discovery_timeout_secs", self.registry.discovery_timeout_secs),
            ("peers.poll_interval_secs", self.peers.poll_interval_secs),
            ("peers.load_timeout_secs", self.peers.load_timeout_secs),
            ("gossip.interval_secs", self.gossip.interval_secs),
            ("gossip.botlist_timeout_secs", self.gossip.botlist_timeout_secs),
            ("gossip.health_timeout_secs", self.gossip.health_timeout_secs),
            ("gossip.stop_timeout_secs", self.gossip.stop_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }

        if self.gossip.auto_failover && self.gossip.failure_threshold == 0 {
            errors.push("gossip.failure_threshold must be at least 1".to_string());
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Socket address the HTTP server binds to
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Address announced to the registry and to peers
    #[must_use]
    pub fn advertise_address(&self) -> String {
        if let Some(ref addr) = self.server.advertise_address {
            return addr.trim_end_matches('/').to_string();
        }
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        format!("http://{hostname}:{}", self.server.port)
    }

    /// Registry base URL without a trailing slash
    #[must_use]
    pub fn registry_url(&self) -> &str {
        self.registry.url.trim_end_matches('/')
    }
}

impl RegistryConfig {
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub const fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }
}

impl RoutingConfig {
    #[must_use]
    pub const fn load_sample_window(&self) -> Duration {
        Duration::from_millis(self.load_sample_window_ms)
    }
}

impl GossipConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.registry.url, "http://localhost:8000");
        assert_eq!(config.registry.heartbeat_interval_secs, 5);
        assert_eq!(config.registry.discovery_interval_secs, 10);
        assert_eq!(config.peers.poll_interval_secs, 7);
        assert_eq!(config.gossip.interval_secs, 5);
        assert!((config.routing.cpu_threshold - 70.0).abs() < f64::EPSILON);
        assert_eq!(config.routing.max_redirect_hops, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config::default();
        assert_eq!(config.http_address(), "0.0.0.0:8081");
    }

    #[test]
    fn test_advertise_address_override() {
        let mut config = Config::default();
        config.server.advertise_address = Some("http://node-a:9000/".to_string());
        assert_eq!(config.advertise_address(), "http://node-a:9000");
    }

    #[test]
    fn test_advertise_address_from_hostname() {
        let mut config = Config::default();
        config.server.port = 9123;
        let addr = config.advertise_address();
        assert!(addr.starts_with("http://"));
        assert!(addr.ends_with(":9123"));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.routing.cpu_threshold = 150.0;
        config.registry.url = "not a url".to_string();
        config.peers.poll_interval_secs = 0;
        config.logging.format = "xml".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("cpu_threshold")));
        assert!(errors.iter().any(|e| e.contains("registry.url")));
        assert!(errors.iter().any(|e| e.contains("peers.poll_interval_secs")));
        assert!(errors.iter().any(|e| e.contains("logging.format")));
    }

    #[test]
    fn test_validate_rejects_non_http_registry() {
        let mut config = Config::default();
        config.registry.url = "redis://localhost:6379".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("scheme"));
    }

    #[test]
    fn test_validate_rejects_zero_stop_timeout() {
        let mut config = Config::default();
        config.gossip.stop_timeout_secs = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors, vec!["gossip.stop_timeout_secs must be greater than zero".to_string()]);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "server:\n  port: 9001\nrouting:\n  cpu_threshold: 55.5\ngossip:\n  seed_peers:\n    - http://b:8082"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.server.port, 9001);
        assert!((config.routing.cpu_threshold - 55.5).abs() < f64::EPSILON);
        assert_eq!(config.gossip.seed_peers, vec!["http://b:8082".to_string()]);
        // Untouched sections keep their defaults
        assert_eq!(config.registry.heartbeat_interval_secs, 5);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/definitely/not/here.yaml")).unwrap();
        assert_eq!(config.server.port, 8081);
    }
}
