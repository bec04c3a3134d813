//! Performance monitor.
//!
//! A pure observer: it reads a [`WorkloadSnapshot`] taken by the
//! coordinator plus whatever host and network samples the metrics source
//! had, and turns them into a ranked [`BottleneckReport`]. It never
//! mutates state and never fails; a missing sample just means no entries
//! of that kind this cycle.

use chrono::{DateTime, Utc};
use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::elapsed_ms;
use crate::config::Thresholds;
use crate::core::bottleneck::{Bottleneck, BottleneckKind, BottleneckReport, Severity, Subject};
use crate::core::task::TaskId;
use crate::core::topology::TopologyId;
use crate::core::worker::WorkerId;
use crate::external::{HostSample, NetworkSample};

/// Direct dependents above which a task is a dependency bottleneck.
pub const DEPENDENTS_MEDIUM: usize = 5;
pub const DEPENDENTS_CRITICAL: usize = 10;

/// Share of worker capacity above which overload is critical.
const OVERLOAD_CRITICAL_SHARE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerLoad {
    pub worker_id: WorkerId,
    /// Tasks in `assigned` or `running` that include this worker.
    pub load: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningTask {
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanOut {
    pub task_id: TaskId,
    pub dependents: usize,
}

/// Point-in-time view of the workload, scoped to one topology or to all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadSnapshot {
    pub topology_id: Option<TopologyId>,
    pub workers: Vec<WorkerLoad>,
    pub running: Vec<RunningTask>,
    pub fan_out: Vec<FanOut>,
}

/// Parameters for one detection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Fraction of worker capacity above which a worker is overloaded.
    pub threshold: f64,
    /// Running time above which a task counts as stalled.
    pub time_window: Duration,
}

impl Default for Detection {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            time_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    thresholds: Thresholds,
    /// Concurrent tasks one worker is expected to hold.
    worker_capacity: usize,
}

impl PerformanceMonitor {
    pub fn new(thresholds: Thresholds, worker_capacity: usize) -> Self {
        Self {
            thresholds,
            worker_capacity: worker_capacity.max(1),
        }
    }

    pub fn worker_capacity(&self) -> usize {
        self.worker_capacity
    }

    pub fn analyze(
        &self,
        snapshot: &WorkloadSnapshot,
        detection: Detection,
        host: Option<HostSample>,
        network: Option<NetworkSample>,
        now: DateTime<Utc>,
    ) -> BottleneckReport {
        let mut entries = Vec::new();
        self.check_overload(snapshot, detection.threshold, &mut entries);
        self.check_stalled(snapshot, detection.time_window, now, &mut entries);
        self.check_fan_out(snapshot, &mut entries);
        if let Some(host) = host {
            self.check_host(host, &mut entries);
        }
        if let Some(network) = network {
            self.check_network(network, &mut entries);
        }

        // Most severe first; detection order breaks ties.
        entries.sort_by(|a, b| b.severity.cmp(&a.severity));
        debug!(
            "PerformanceMonitor::analyze {} workers, {} running: {} bottlenecks",
            snapshot.workers.len(),
            snapshot.running.len(),
            entries.len()
        );
        BottleneckReport::from_entries(snapshot.topology_id, entries, now)
    }

    fn check_overload(&self, snapshot: &WorkloadSnapshot, threshold: f64, out: &mut Vec<Bottleneck>) {
        let capacity = self.worker_capacity as f64;
        let limit = threshold.clamp(0.0, 1.0) * capacity;
        for w in &snapshot.workers {
            let load = w.load as f64;
            trace!("worker {} load {} limit {}", w.worker_id.short(), load, limit);
            if load <= limit {
                continue;
            }
            let severity = if load > OVERLOAD_CRITICAL_SHARE * capacity {
                Severity::Critical
            } else {
                Severity::High
            };
            out.push(Bottleneck {
                kind: BottleneckKind::AgentOverload,
                severity,
                subject: Subject::Worker(w.worker_id),
                metric: "concurrent_tasks".to_string(),
                current_value: load,
                threshold: limit,
                recommendation: "Spawn additional workers or rebalance tasks away from overloaded workers"
                    .to_string(),
            });
        }
    }

    fn check_stalled(
        &self,
        snapshot: &WorkloadSnapshot,
        window: Duration,
        now: DateTime<Utc>,
        out: &mut Vec<Bottleneck>,
    ) {
        let window_ms = window.as_millis() as u64;
        for task in &snapshot.running {
            let elapsed = elapsed_ms(task.started_at, now);
            if elapsed <= window_ms {
                continue;
            }
            let severity = if elapsed > window_ms.saturating_mul(2) {
                Severity::Critical
            } else {
                Severity::High
            };
            out.push(Bottleneck {
                kind: BottleneckKind::StalledTask,
                severity,
                subject: Subject::Task(task.task_id),
                metric: "elapsed_ms".to_string(),
                current_value: elapsed as f64,
                threshold: window_ms as f64,
                recommendation: "Cancel or retry stalled tasks and check worker health".to_string(),
            });
        }
    }

    fn check_fan_out(&self, snapshot: &WorkloadSnapshot, out: &mut Vec<Bottleneck>) {
        for f in &snapshot.fan_out {
            if f.dependents <= DEPENDENTS_MEDIUM {
                continue;
            }
            let severity = if f.dependents > DEPENDENTS_CRITICAL {
                Severity::Critical
            } else {
                Severity::Medium
            };
            out.push(Bottleneck {
                kind: BottleneckKind::DependencyChain,
                severity,
                subject: Subject::Task(f.task_id),
                metric: "direct_dependents".to_string(),
                current_value: f.dependents as f64,
                threshold: DEPENDENTS_MEDIUM as f64,
                recommendation: "Prioritise tasks with many dependents or split them into smaller tasks"
                    .to_string(),
            });
        }
    }

    fn check_host(&self, host: HostSample, out: &mut Vec<Bottleneck>) {
        let t = &self.thresholds;
        let checks = [
            ("cpu_utilization", host.cpu_utilization, t.cpu_high, t.cpu_critical, "Reduce concurrency or add CPU capacity"),
            (
                "memory_utilization",
                host.memory_utilization,
                t.memory_high,
                t.memory_critical,
                "Reduce memory pressure or add memory capacity",
            ),
        ];
        for (metric, value, high, critical, recommendation) in checks {
            let Some(severity) = graded(value, high, critical) else {
                continue;
            };
            out.push(Bottleneck {
                kind: BottleneckKind::ResourceConstraint,
                severity,
                subject: Subject::Host,
                metric: metric.to_string(),
                current_value: value,
                threshold: high,
                recommendation: recommendation.to_string(),
            });
        }
    }

    fn check_network(&self, network: NetworkSample, out: &mut Vec<Bottleneck>) {
        let t = &self.thresholds;
        if let Some(severity) = graded(network.latency_ms, t.latency_high_ms, t.latency_critical_ms) {
            out.push(Bottleneck {
                kind: BottleneckKind::NetworkLatency,
                severity,
                subject: Subject::Network,
                metric: "latency_ms".to_string(),
                current_value: network.latency_ms,
                threshold: t.latency_high_ms,
                recommendation: "Check network connectivity or co-locate workers".to_string(),
            });
        }
    }
}

fn graded(value: f64, high: f64, critical: f64) -> Option<Severity> {
    if value > critical {
        Some(Severity::Critical)
    } else if value > high {
        Some(Severity::High)
    } else {
        None
    }
}
