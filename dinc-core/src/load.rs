//! CPU load sensing
//!
//! The rest of the node treats the sensor as opaque: it only ever asks for
//! a utilisation percentage in `0.0..=100.0`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};

/// Source of this node's CPU utilisation
#[async_trait]
pub trait LoadSensor: Send + Sync {
    /// Current CPU utilisation as a percentage
    async fn cpu_load(&self) -> Result<f64>;
}

/// Samples the aggregate `cpu` line of `/proc/stat` twice and reports the
/// busy share of the jiffies elapsed in between.
#[derive(Debug, Clone)]
pub struct ProcStatSensor {
    path: String,
    window: Duration,
}

impl ProcStatSensor {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            path: "/proc/stat".to_string(),
            window,
        }
    }

    /// Read counters from a different file (tests, containers with a
    /// remapped procfs)
    #[must_use]
    pub fn with_path(path: impl Into<String>, window: Duration) -> Self {
        Self {
            path: path.into(),
            window,
        }
    }

    /// Whether the counters file can be read on this host
    pub async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.path).await.is_ok()
    }

    async fn read_times(&self) -> Result<CpuTimes> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        CpuTimes::parse(&content)
    }
}

#[async_trait]
impl LoadSensor for ProcStatSensor {
    async fn cpu_load(&self) -> Result<f64> {
        let before = self.read_times().await?;
        tokio::time::sleep(self.window).await;
        let after = self.read_times().await?;
        Ok(after.busy_percent_since(&before))
    }
}

/// Jiffy counters from one `/proc/stat` snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl CpuTimes {
    fn parse(content: &str) -> Result<Self> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| Error::LoadSensor("no aggregate cpu line".to_string()))?;

        let fields = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|e| Error::LoadSensor(format!("bad counter '{v}': {e}")))
            })
            .collect::<Result<Vec<u64>>>()?;

        if fields.len() < 4 {
            return Err(Error::LoadSensor(format!(
                "expected at least 4 counters, found {}",
                fields.len()
            )));
        }

        // idle + iowait
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total = fields.iter().sum();
        Ok(Self { idle, total })
    }

    fn busy_percent_since(&self, earlier: &Self) -> f64 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(earlier.idle).min(total);
        #[allow(clippy::cast_precision_loss)]
        let busy = (total - idle) as f64 / total as f64 * 100.0;
        busy.clamp(0.0, 100.0)
    }
}

/// Sensor reporting a value set by the caller
#[derive(Debug, Default)]
pub struct FixedLoadSensor {
    bits: AtomicU64,
}

impl FixedLoadSensor {
    #[must_use]
    pub fn new(load: f64) -> Self {
        Self {
            bits: AtomicU64::new(load.to_bits()),
        }
    }

    pub fn set(&self, load: f64) {
        self.bits.store(load.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl LoadSensor for FixedLoadSensor {
    async fn cpu_load(&self) -> Result<f64> {
        Ok(self.get())
    }
}
