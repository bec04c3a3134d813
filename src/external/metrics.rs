//! Host and network metrics collaborator.
//!
//! Bottleneck detection treats a missing sample as "nothing to report".

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostSample {
    /// 0..=100
    pub cpu_utilization: f64,
    /// 0..=100
    pub memory_utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkSample {
    pub latency_ms: f64,
}

pub trait MetricsSource: Send + Sync {
    fn sample_host(&self) -> Option<HostSample>;
    fn sample_network(&self) -> Option<NetworkSample>;
}

/// Source that never has a sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl MetricsSource for NullMetrics {
    fn sample_host(&self) -> Option<HostSample> {
        None
    }

    fn sample_network(&self) -> Option<NetworkSample> {
        None
    }
}

/// Source returning whatever was last set.
#[derive(Debug, Default)]
pub struct FixedMetrics {
    host: Mutex<Option<HostSample>>,
    network: Mutex<Option<NetworkSample>>,
}

impl FixedMetrics {
    pub fn new(host: Option<HostSample>, network: Option<NetworkSample>) -> Self {
        Self {
            host: Mutex::new(host),
            network: Mutex::new(network),
        }
    }

    pub fn set_host(&self, sample: Option<HostSample>) {
        *self.host.lock().unwrap_or_else(|e| e.into_inner()) = sample;
    }

    pub fn set_network(&self, sample: Option<NetworkSample>) {
        *self.network.lock().unwrap_or_else(|e| e.into_inner()) = sample;
    }
}

impl MetricsSource for FixedMetrics {
    fn sample_host(&self) -> Option<HostSample> {
        *self.host.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sample_network(&self) -> Option<NetworkSample> {
        *self.network.lock().unwrap_or_else(|e| e.into_inner())
    }
}
