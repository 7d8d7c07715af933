mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use dinc_core::{logging, Config, FixedLoadSensor, LoadSensor, ProcStatSensor};

use server::NodeServer;

/// Default config file, used when `--config` and `DINC_CONFIG_PATH` are unset
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(name = "dinc")]
#[command(about = "DiNC self-organizing cluster node", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "DINC_CONFIG_PATH")]
    config: Option<String>,

    /// HTTP port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Central registry base URL
    #[arg(long = "main-server", alias = "registry")]
    main_server: Option<String>,

    /// CPU percentage above which requests are redirected
    #[arg(long)]
    cpu_threshold: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Command-line flags win over every other configuration source
    fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = self.main_server {
            config.registry.url = url;
        }
        if let Some(threshold) = self.cpu_threshold {
            config.routing.cpu_threshold = threshold;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

async fn select_load_sensor(config: &Config) -> Arc<dyn LoadSensor> {
    let sensor = ProcStatSensor::new(config.routing.load_sample_window());
    if sensor.is_available().await {
        Arc::new(sensor)
    } else {
        warn!("/proc/stat not readable, reporting a constant CPU load of 0");
        Arc::new(FixedLoadSensor::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let mut config = Config::load(Some(&config_path))?;
    cli.apply(&mut config);

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("DiNC node starting...");
    info!("HTTP address: {}", config.http_address());
    info!("Registry: {}", config.registry_url());
    info!("CPU threshold: {}%", config.routing.cpu_threshold);

    // 4. Build the node and run until a shutdown signal arrives
    let sensor = select_load_sensor(&config).await;
    let server = NodeServer::new(config, sensor);
    server.start().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "dinc",
            "--port",
            "9000",
            "--registry",
            "http://reg:8000",
            "--cpu-threshold",
            "55.5",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.registry.url, "http://reg:8000");
        assert!((config.routing.cpu_threshold - 55.5).abs() < f64::EPSILON);
        assert_eq!(config.logging.level, Config::default().logging.level);
    }

    #[test]
    fn test_main_server_flag() {
        let cli = Cli::parse_from(["dinc", "--main-server", "http://m:8000"]);
        assert_eq!(cli.main_server.as_deref(), Some("http://m:8000"));
        assert!(cli.port.is_none());
    }
}
