use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

/// Resource and latency thresholds used by bottleneck detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu_high: f64,
    pub cpu_critical: f64,
    pub memory_high: f64,
    pub memory_critical: f64,
    pub latency_high_ms: f64,
    pub latency_critical_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_high: 80.0,
            cpu_critical: 95.0,
            memory_high: 85.0,
            memory_critical: 95.0,
            latency_high_ms: 1000.0,
            latency_critical_ms: 5000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler tick interval.
    pub monitor_interval_secs: u64,
    /// How long terminal tasks stay in memory before export and removal.
    pub task_retention_secs: u64,
    /// Resubmit failed tasks automatically while retries remain.
    pub auto_retry: bool,
    pub default_max_retries: u32,
    /// Concurrent tasks a single worker is expected to hold.
    pub worker_capacity: usize,
    /// Running time after which an adaptive task may take on one more worker.
    pub adaptive_expand_after_secs: u64,
    /// Cancel tasks flagged as critically stalled during the tick.
    pub auto_cancel_stalled: bool,
    /// Stall window used by the tick when `auto_cancel_stalled` is set.
    pub stall_window_secs: u64,
    pub launch_timeout_secs: u64,
    pub store_dir: Option<String>,
    pub thresholds: Thresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 5,
            task_retention_secs: 3600,
            auto_retry: false,
            default_max_retries: 3,
            worker_capacity: 8,
            adaptive_expand_after_secs: 30,
            auto_cancel_stalled: false,
            stall_window_secs: 300,
            launch_timeout_secs: 30,
            store_dir: None,
            thresholds: Thresholds::default(),
        }
    }
}

impl Config {
    pub fn hive_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".hive"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("hive.toml"))
    }

    /// Directory backing the JSON durable store.
    pub fn store_dir(&self) -> Result<PathBuf> {
        match &self.store_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::hive_dir()?.join("store")),
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    pub fn adaptive_expand_after(&self) -> Duration {
        Duration::from_secs(self.adaptive_expand_after_secs)
    }

    pub fn stall_window(&self) -> Duration {
        Duration::from_secs(self.stall_window_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        debug!("Config::load path={}", path.display());
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        debug!(
            "Config loaded: interval={}s, auto_retry={}, worker_capacity={}",
            config.monitor_interval_secs, config.auto_retry, config.worker_capacity
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let hive_dir = Self::hive_dir()?;
        if !hive_dir.exists() {
            debug!("Creating hive directory");
            fs::create_dir_all(&hive_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
