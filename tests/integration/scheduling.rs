//! Task scheduling integration tests.
//!
//! Dependency gating, failover across workers, retry, cancellation and
//! durable task records.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use hive::config::Config;
use hive::core::task::{DistributionStrategy, TaskId, TaskSpec, TaskStatus};
use hive::core::topology::{TopologyKind, TopologyStrategy};
use hive::core::worker::MetricsDelta;
use hive::external::{DurableStore, ExecutionOutcome, JsonFileStore, RecordFilter, RecordKind};
use hive::{Collaborators, Error, ManualClock, Swarm, SwarmEvent};

use crate::fixtures::{failure, success, TestSwarm};

fn mesh(t: &mut TestSwarm, workers: usize) -> Vec<hive::core::worker::WorkerId> {
    t.swarm
        .init_topology(TopologyKind::Mesh, workers, TopologyStrategy::Balanced, false)
        .unwrap()
        .members
}

/// Test: Dependency gate
/// Given task A still running
/// When task B depending on A is orchestrated
/// Then B is pending with no workers, and starts once A completes
#[test]
fn test_dependent_waits_for_dependency() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 3);
    let a = t.swarm.orchestrate_task(TaskSpec::new("A")).unwrap();
    assert_eq!(a.status, TaskStatus::Running);

    let b = t
        .swarm
        .orchestrate_task(TaskSpec::new("B").with_dependencies([a.task_id]))
        .unwrap();

    assert_eq!(b.status, TaskStatus::Pending);
    assert!(b.assigned_workers.is_empty());
    assert_eq!(b.unresolved, vec![a.task_id]);
    assert!(t.swarm.scheduler().pending_queue().contains(&b.task_id));
    assert!(t
        .take_events()
        .contains(&SwarmEvent::TaskQueued {
            task_id: b.task_id,
            unresolved: vec![a.task_id],
        }));

    // Complete A only
    let dispatches = t.swarm.drain_dispatches();
    assert!(dispatches.iter().all(|d| d.task_id == a.task_id));
    for d in dispatches {
        t.swarm
            .report_outcome(&d.task_id, &d.worker_id, success(json!("a")))
            .unwrap();
    }

    let b_now = t.swarm.get_task(&b.task_id).unwrap();
    assert_eq!(b_now.status, TaskStatus::Running);
    assert!(!b_now.assigned_workers.is_empty());
}

#[test]
fn test_chain_completes_in_order() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 2);
    let mut ids: Vec<TaskId> = Vec::new();
    for n in 0..4 {
        let mut spec = TaskSpec::new(format!("step-{}", n)).with_payload(json!(n));
        if let Some(prev) = ids.last() {
            spec = spec.with_dependencies([*prev]);
        }
        ids.push(t.swarm.orchestrate_task(spec).unwrap().task_id);
    }
    t.take_events();

    t.settle_all();

    assert_eq!(t.completed_events(), ids);
    for id in &ids {
        assert_eq!(t.swarm.get_task(id).unwrap().status, TaskStatus::Completed);
    }
}

#[test]
fn test_forward_reference_cycle_rejected() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 1);
    let a = TaskId::new();
    let b = TaskId::new();
    t.swarm
        .orchestrate_task(TaskSpec::new("A").with_id(a).with_dependencies([b]))
        .unwrap();

    let result = t
        .swarm
        .orchestrate_task(TaskSpec::new("B").with_id(b).with_dependencies([a]));

    assert!(matches!(result, Err(Error::DependencyCycle { .. })));
    assert!(matches!(t.swarm.get_task(&b), Err(Error::TaskNotFound { .. })));
}

/// Test: Failover
/// Given a sequential task with fallbacks
/// When the first worker fails
/// Then the next queued worker is tried and the task completes
#[test]
fn test_sequential_fails_over_to_next_worker() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 3);
    let progress = t
        .swarm
        .orchestrate_task(TaskSpec::new("flaky").with_strategy(DistributionStrategy::Sequential))
        .unwrap();
    assert_eq!(progress.in_flight.len(), 1);
    let first = progress.in_flight[0];

    let calls = Cell::new(0);
    t.settle_with(|d| {
        calls.set(calls.get() + 1);
        if d.worker_id == first {
            failure("boom")
        } else {
            success(json!("ok"))
        }
    });

    assert_eq!(calls.get(), 2);
    let task = t.swarm.get_task(&progress.task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.metrics.error_count, 1);
    assert_eq!(t.swarm.get_worker(&first).unwrap().performance.error_count, 1);
}

#[test]
fn test_exhausted_fallbacks_fail_then_retry() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 3);
    let id = t
        .swarm
        .orchestrate_task(TaskSpec::new("doomed").with_strategy(DistributionStrategy::Sequential))
        .unwrap()
        .task_id;

    assert_eq!(t.settle_with(|_| failure("nope")), 3);
    let task = t.swarm.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("nope"));
    assert!(task.can_retry());

    let progress = t.swarm.retry_task(&id).unwrap();
    assert_eq!(progress.status, TaskStatus::Running);
    t.settle_all();

    let task = t.swarm.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 1);
}

#[test]
fn test_retry_refused_when_not_failed() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 1);
    let id = t.swarm.orchestrate_task(TaskSpec::new("fine")).unwrap().task_id;
    let result = t.swarm.retry_task(&id);
    assert!(matches!(result, Err(Error::InvalidTransition { .. })));
}

/// Test: Automatic retry
/// Given auto retry with one retry allowed
/// When a task keeps failing
/// Then it is retried once and then stays failed
#[test]
fn test_auto_retry_until_exhausted() {
    let config = Config {
        auto_retry: true,
        default_max_retries: 1,
        ..Config::default()
    };
    let mut t = TestSwarm::with_config(config);
    mesh(&mut t, 1);
    let id = t.swarm.orchestrate_task(TaskSpec::new("stubborn")).unwrap().task_id;

    assert_eq!(t.settle_with(|_| failure("still broken")), 2);

    let task = t.swarm.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 1);
    let events = t.take_events();
    assert!(events.contains(&SwarmEvent::TaskRetrying { task_id: id, attempt: 1 }));
}

#[test]
fn test_cancel_then_late_outcome_is_ignored() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 2);
    let id = t.swarm.orchestrate_task(TaskSpec::new("abandoned")).unwrap().task_id;
    let dispatches = t.swarm.drain_dispatches();
    assert!(!dispatches.is_empty());

    assert!(t.swarm.cancel_task(&id).unwrap());
    assert!(!t.swarm.cancel_task(&id).unwrap());

    let d = &dispatches[0];
    let report = t
        .swarm
        .report_outcome(&d.task_id, &d.worker_id, success(json!("late")))
        .unwrap();
    assert!(report.finished.is_none());
    let task = t.swarm.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.results.is_empty());
}

#[test]
fn test_cancel_unknown_task_is_not_found() {
    let mut t = TestSwarm::new();
    let result = t.swarm.cancel_task(&TaskId::new());
    assert!(matches!(result, Err(Error::TaskNotFound { .. })));
}

#[test]
fn test_terminated_worker_work_moves_on() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 3);
    let progress = t
        .swarm
        .orchestrate_task(TaskSpec::new("moving").with_strategy(DistributionStrategy::Sequential))
        .unwrap();
    let first = progress.in_flight[0];
    t.swarm.drain_dispatches();

    t.swarm.terminate_worker(&first).unwrap();

    let dispatches = t.swarm.drain_dispatches();
    assert_eq!(dispatches.len(), 1);
    assert_ne!(dispatches[0].worker_id, first);
    assert_eq!(t.swarm.get_task(&progress.task_id).unwrap().status, TaskStatus::Running);
}

/// Test: Response-time average
/// Given three samples of 100, 200 and 300 ms
/// Then the average is 200 over three completed tasks
#[test]
fn test_metrics_average_of_samples() {
    let mut t = TestSwarm::new();
    let id = mesh(&mut t, 1)[0];

    for rt in [100.0, 200.0, 300.0] {
        t.swarm
            .update_worker_metrics(&id, &MetricsDelta::completed(rt, 5))
            .unwrap();
    }

    let worker = t.swarm.get_worker(&id).unwrap();
    assert_eq!(worker.performance.avg_response_time_ms, 200.0);
    assert_eq!(worker.performance.tasks_completed, 3);
    assert_eq!(worker.performance.token_usage, 15);
    assert_eq!(worker.performance.success_rate, 1.0);
}

#[test]
fn test_expired_tasks_are_exported_then_dropped() {
    let mut t = TestSwarm::new();
    mesh(&mut t, 1);
    let done = t.swarm.orchestrate_task(TaskSpec::new("old")).unwrap().task_id;
    t.settle_all();
    t.swarm.tick();

    t.clock.advance(t.swarm.config().task_retention() + Duration::from_secs(1));
    let report = t.swarm.tick();

    assert_eq!(report.collected, vec![done]);
    assert!(matches!(t.swarm.get_task(&done), Err(Error::TaskNotFound { .. })));
    let stored = t
        .store
        .get_all(RecordKind::Task, &RecordFilter::new().field("id", done.to_string()))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["status"], json!("completed"));

    // Completion outlives collection
    let next = t
        .swarm
        .orchestrate_task(TaskSpec::new("after").with_dependencies([done]))
        .unwrap();
    assert_eq!(next.status, TaskStatus::Running);
}

/// Test: Task records on disk
/// Given a finished and an in-flight task exported to a JSON store
/// When both are imported into a fresh coordinator
/// Then the finished one is unchanged and the other is rescheduled
#[test]
fn test_task_records_survive_json_store() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn DurableStore> = Arc::new(JsonFileStore::new(dir.path()));
    let clock = ManualClock::default();
    let collaborators = Collaborators::default()
        .with_store(store.clone())
        .with_clock(Arc::new(clock.clone()));

    let mut source = Swarm::new(Config::default(), collaborators.clone());
    source
        .init_topology(TopologyKind::Ring, 2, TopologyStrategy::Balanced, false)
        .unwrap();
    let finished = source
        .orchestrate_task(TaskSpec::new("finished").with_payload(json!({"k": "v"})))
        .unwrap()
        .task_id;
    for d in source.drain_dispatches() {
        source
            .report_outcome(
                &d.task_id,
                &d.worker_id,
                ExecutionOutcome::Success {
                    result: d.payload.clone(),
                    token_usage: 3,
                },
            )
            .unwrap();
    }
    let in_flight = source.orchestrate_task(TaskSpec::new("in-flight")).unwrap().task_id;

    let finished_record = source.export_task(&finished).unwrap();
    let in_flight_record = source.export_task(&in_flight).unwrap();
    assert!(dir.path().join("tasks").join(format!("{}.json", finished)).exists());

    let mut target = Swarm::new(Config::default(), collaborators);
    target
        .init_topology(TopologyKind::Mesh, 2, TopologyStrategy::Balanced, false)
        .unwrap();
    assert_eq!(target.import_task(finished_record).unwrap(), finished);
    assert_eq!(target.import_task(in_flight_record).unwrap(), in_flight);

    assert_eq!(target.get_task(&finished).unwrap(), source.get_task(&finished).unwrap());
    let rescheduled = target.get_task(&in_flight).unwrap();
    assert_eq!(rescheduled.status, TaskStatus::Running);
    assert!(target
        .drain_dispatches()
        .iter()
        .all(|d| d.task_id == in_flight));

    let duplicate = target.import_task(source.export_task(&finished).unwrap());
    assert!(matches!(duplicate, Err(Error::Validation(_))));
}
