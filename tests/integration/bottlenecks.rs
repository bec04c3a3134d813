//! Bottleneck detection and optimization integration tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use hive::config::Config;
use hive::core::bottleneck::{BottleneckKind, Severity, Subject};
use hive::core::task::{DistributionStrategy, TaskSpec, TaskStatus};
use hive::core::topology::{TopologyKind, TopologyStrategy};
use hive::core::worker::{MetricsDelta, WorkerConfig, WorkerType};
use hive::external::{FixedMetrics, HostSample, NetworkSample};
use hive::orchestration::{Detection, WorkloadHint};
use hive::{Collaborators, ManualClock, Swarm};

use crate::fixtures::TestSwarm;

fn detection(threshold: f64, window_secs: u64) -> Detection {
    Detection {
        threshold,
        time_window: Duration::from_secs(window_secs),
    }
}

/// Test: Critical overload
/// Given one worker holding 9 of 10 running tasks
/// When bottlenecks are detected at threshold 0.5
/// Then that worker is reported as a critical overload
#[test]
fn test_nine_of_ten_running_tasks_is_critical() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Mesh, 3, TopologyStrategy::Balanced, false)
        .unwrap();
    for peer in &topology.members[1..] {
        t.swarm.terminate_worker(peer).unwrap();
    }
    let coder = t
        .swarm
        .spawn_worker(WorkerConfig::new(WorkerType::Coder, topology.id))
        .unwrap();
    let tester = t
        .swarm
        .spawn_worker(WorkerConfig::new(WorkerType::Tester, topology.id))
        .unwrap();

    for n in 0..9 {
        let spec = TaskSpec::new(format!("build-{}", n))
            .with_requirements(["programming"])
            .with_strategy(DistributionStrategy::Parallel);
        let progress = t.swarm.orchestrate_task(spec).unwrap();
        assert_eq!(progress.assigned_workers, vec![coder.id]);
    }
    t.swarm
        .orchestrate_task(TaskSpec::new("verify").with_requirements(["testing"]))
        .unwrap();
    assert_eq!(t.swarm.list_tasks(Some(TaskStatus::Running)).len(), 10);

    let report = t
        .swarm
        .detect_bottlenecks(Some(topology.id), detection(0.5, 300))
        .unwrap();

    assert_eq!(report.count_of(BottleneckKind::AgentOverload), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.subject, Subject::Worker(coder.id));
    assert_eq!(entry.severity, Severity::Critical);
    assert_eq!(entry.current_value, 9.0);
    assert!(report.urgent);
    assert!(!report
        .entries
        .iter()
        .any(|e| e.subject == Subject::Worker(tester.id)));
    assert_eq!(t.swarm.last_report(), Some(&report));
}

#[test]
fn test_stalled_task_reported_after_window() {
    let mut t = TestSwarm::new();
    t.swarm
        .init_topology(TopologyKind::Star, 3, TopologyStrategy::Balanced, false)
        .unwrap();
    let id = t.swarm.orchestrate_task(TaskSpec::new("slow")).unwrap().task_id;

    let early = t.swarm.detect_bottlenecks(None, detection(0.8, 300)).unwrap();
    assert_eq!(early.count_of(BottleneckKind::StalledTask), 0);

    t.clock.advance(Duration::from_secs(400));
    let late = t.swarm.detect_bottlenecks(None, detection(0.8, 300)).unwrap();

    assert_eq!(late.count_of(BottleneckKind::StalledTask), 1);
    let entry = late
        .entries
        .iter()
        .find(|e| e.kind == BottleneckKind::StalledTask)
        .unwrap();
    assert_eq!(entry.subject, Subject::Task(id));
    assert_eq!(entry.severity, Severity::High);
}

/// Test: Stalled work is cancelled by the tick
/// Given auto cancel with a 60s window
/// When a task runs past twice the window
/// Then the next tick cancels it
#[test]
fn test_tick_cancels_critically_stalled_tasks() {
    let config = Config {
        auto_cancel_stalled: true,
        stall_window_secs: 60,
        ..Config::default()
    };
    let mut t = TestSwarm::with_config(config);
    t.swarm
        .init_topology(TopologyKind::Mesh, 2, TopologyStrategy::Balanced, false)
        .unwrap();
    let id = t.swarm.orchestrate_task(TaskSpec::new("stuck")).unwrap().task_id;

    t.clock.advance(Duration::from_secs(90));
    assert!(t.swarm.tick().cancelled.is_empty());

    t.clock.advance(Duration::from_secs(40));
    let report = t.swarm.tick();

    assert_eq!(report.cancelled, vec![id]);
    assert_eq!(t.swarm.get_task(&id).unwrap().status, TaskStatus::Cancelled);
}

#[test]
fn test_wide_fan_out_is_a_dependency_chain_bottleneck() {
    let mut t = TestSwarm::new();
    t.swarm
        .init_topology(TopologyKind::Mesh, 2, TopologyStrategy::Balanced, false)
        .unwrap();
    let root = t.swarm.orchestrate_task(TaskSpec::new("root")).unwrap().task_id;
    for n in 0..6 {
        t.swarm
            .orchestrate_task(TaskSpec::new(format!("leaf-{}", n)).with_dependencies([root]))
            .unwrap();
    }

    let report = t.swarm.detect_bottlenecks(None, Detection::default()).unwrap();

    let entry = report
        .entries
        .iter()
        .find(|e| e.kind == BottleneckKind::DependencyChain)
        .unwrap();
    assert_eq!(entry.subject, Subject::Task(root));
    assert_eq!(entry.severity, Severity::Medium);
    assert_eq!(entry.current_value, 6.0);
}

#[test]
fn test_host_and_network_samples_feed_detection() {
    let metrics = Arc::new(FixedMetrics::new(
        Some(HostSample {
            cpu_utilization: 97.0,
            memory_utilization: 40.0,
        }),
        Some(NetworkSample { latency_ms: 1500.0 }),
    ));
    let collaborators = Collaborators::default()
        .with_metrics(metrics.clone())
        .with_clock(Arc::new(ManualClock::new(Utc::now())));
    let mut swarm = Swarm::new(Config::default(), collaborators);

    let report = swarm.detect_bottlenecks(None, Detection::default()).unwrap();

    assert_eq!(report.count_of(BottleneckKind::ResourceConstraint), 1);
    assert_eq!(report.count_of(BottleneckKind::NetworkLatency), 1);
    assert_eq!(report.entries[0].severity, Severity::Critical);
    assert_eq!(report.entries[0].subject, Subject::Host);
    assert!(report.health_score < 100);

    metrics.set_host(None);
    metrics.set_network(None);
    let quiet = swarm.detect_bottlenecks(None, Detection::default()).unwrap();
    assert!(quiet.entries.is_empty());
    assert_eq!(quiet.health_score, 100);
}

/// Test: Optimization without apply is read-only
/// Given a hierarchical topology with slow workers
/// When optimized twice without auto apply
/// Then both recommendations match and nothing changes
#[test]
fn test_optimize_without_apply_is_idempotent() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Hierarchical, 4, TopologyStrategy::Balanced, false)
        .unwrap();
    for id in &topology.members {
        t.swarm
            .update_worker_metrics(id, &MetricsDelta::completed(4500.0, 0))
            .unwrap();
    }

    let first = t.swarm.optimize_topology(&topology.id, None, None, false).unwrap();
    let second = t.swarm.optimize_topology(&topology.id, None, None, false).unwrap();

    assert_eq!(first.recommended_kind, TopologyKind::Mesh);
    assert!(!first.applied);
    assert_eq!(first.recommended_kind, second.recommended_kind);
    assert_eq!(first.performance_score, second.performance_score);
    assert_eq!(first.reasons, second.reasons);
    let unchanged = t.swarm.topologies().get(&topology.id).unwrap();
    assert_eq!(unchanged.kind, TopologyKind::Hierarchical);
    assert_eq!(unchanged.members, topology.members);
}

#[test]
fn test_optimize_with_apply_switches() {
    let mut t = TestSwarm::new();
    let topology = t
        .swarm
        .init_topology(TopologyKind::Star, 4, TopologyStrategy::Balanced, false)
        .unwrap();

    let recommendation = t
        .swarm
        .optimize_topology(&topology.id, None, Some(WorkloadHint::FaultTolerant), true)
        .unwrap();

    assert!(recommendation.applied);
    let after = t.swarm.topologies().get(&topology.id).unwrap();
    assert_eq!(after.kind, recommendation.recommended_kind);
    assert_ne!(after.kind, TopologyKind::Star);
    assert!(after.members.len() <= 4);
}

#[test]
fn test_performance_summary_after_run() {
    let mut t = TestSwarm::new();
    t.swarm
        .init_topology(TopologyKind::Mesh, 2, TopologyStrategy::Balanced, false)
        .unwrap();
    for n in 0..4 {
        t.swarm
            .orchestrate_task(TaskSpec::new(format!("job-{}", n)))
            .unwrap();
    }
    t.settle_all();

    let summary = t.swarm.performance_summary().unwrap();

    assert_eq!(summary.topologies, 1);
    assert_eq!(summary.tasks.get("completed"), Some(&4));
    assert_eq!(summary.workers.values().sum::<usize>(), 2);
    assert_eq!(summary.success_rate, 1.0);
    assert!(summary.bottlenecks.entries.is_empty());
    assert_eq!(summary.health_score, 100);
    assert!((0.0..=1.0).contains(&summary.distribution.efficiency));
}
