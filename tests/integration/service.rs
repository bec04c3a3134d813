//! Service actor integration tests.
//!
//! These run a real `SwarmService` on the tokio runtime and talk to it
//! only through cloned handles.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use hive::config::Config;
use hive::core::task::{DistributionStrategy, TaskId, TaskSpec, TaskStatus};
use hive::core::topology::{TopologyKind, TopologyStrategy};
use hive::external::{Dispatch, EchoExecutor, ExecutionOutcome, WorkerExecutor};
use hive::orchestration::WorkerFilter;
use hive::{Collaborators, Swarm, SwarmEvent, SwarmHandle, SwarmService};

const WAIT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(5);

fn create_test_service(config: Config, executor: Arc<dyn WorkerExecutor>) -> SwarmHandle {
    let swarm = Swarm::new(config, Collaborators::default());
    SwarmService::new(swarm, executor)
        .with_interval(Duration::from_millis(25))
        .spawn()
}

async fn wait_all(handle: &SwarmHandle, ids: &[TaskId]) -> Vec<TaskStatus> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let task = tokio::time::timeout(WAIT, handle.wait_for_task(*id, POLL))
            .await
            .expect("task did not finish in time")
            .unwrap();
        out.push(task.status);
    }
    out
}

/// Fails the first attempt on every task, succeeds afterwards.
struct FirstAttemptFails {
    failures: AtomicUsize,
}

#[async_trait]
impl WorkerExecutor for FirstAttemptFails {
    async fn execute(&self, dispatch: &Dispatch) -> ExecutionOutcome {
        if dispatch.attempt == 0 {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return ExecutionOutcome::Failure {
                error: "cold start".to_string(),
            };
        }
        ExecutionOutcome::Success {
            result: json!({"attempt": dispatch.attempt}),
            token_usage: 1,
        }
    }
}

/// Test: Concurrent callers
/// Given several handles submitting at once
/// When all tasks run on echo workers
/// Then every task completes exactly once
#[tokio::test]
async fn test_concurrent_submissions_all_complete() {
    let handle = create_test_service(Config::default(), Arc::new(EchoExecutor::new()));
    handle
        .init_topology(TopologyKind::Mesh, 4, TopologyStrategy::Parallel, false)
        .await
        .unwrap();

    let mut joins = Vec::new();
    for n in 0..20 {
        let handle = handle.clone();
        joins.push(tokio::spawn(async move {
            handle
                .orchestrate_task(TaskSpec::new(format!("job-{}", n)).with_payload(json!(n)))
                .await
                .unwrap()
                .task_id
        }));
    }
    let mut ids = Vec::new();
    for join in joins {
        ids.push(join.await.unwrap());
    }
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 20);

    let statuses = wait_all(&handle, &ids).await;
    assert!(statuses.iter().all(|s| *s == TaskStatus::Completed));
    assert_eq!(
        handle.list_tasks(Some(TaskStatus::Completed)).await.unwrap().len(),
        20
    );
    handle.shutdown();
}

#[tokio::test]
async fn test_dependency_chain_runs_through_service() {
    let swarm = Swarm::new(Config::default(), Collaborators::default());
    let (tx, mut events) = mpsc::unbounded_channel();
    let handle = SwarmService::new(swarm.with_events(tx), Arc::new(EchoExecutor::new()))
        .with_interval(Duration::from_millis(25))
        .spawn();
    handle
        .init_topology(TopologyKind::Ring, 3, TopologyStrategy::Sequential, false)
        .await
        .unwrap();

    let mut ids: Vec<TaskId> = Vec::new();
    for n in 0..3 {
        let mut spec = TaskSpec::new(format!("stage-{}", n)).with_strategy(DistributionStrategy::Sequential);
        if let Some(prev) = ids.last() {
            spec = spec.with_dependencies([*prev]);
        }
        ids.push(handle.orchestrate_task(spec).await.unwrap().task_id);
    }
    wait_all(&handle, &ids).await;

    let mut completed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SwarmEvent::TaskCompleted { task_id } = event {
            completed.push(task_id);
        }
    }
    assert_eq!(completed, ids);
    handle.shutdown();
}

/// Test: Automatic retry through the service
/// Given an executor that fails every first attempt
/// When auto retry is on
/// Then tasks complete on their second attempt
#[tokio::test]
async fn test_auto_retry_recovers_cold_start() {
    let config = Config {
        auto_retry: true,
        ..Config::default()
    };
    let executor = Arc::new(FirstAttemptFails {
        failures: AtomicUsize::new(0),
    });
    let handle = create_test_service(config, executor.clone());
    handle
        .init_topology(TopologyKind::Mesh, 1, TopologyStrategy::Balanced, false)
        .await
        .unwrap();

    let id = handle
        .orchestrate_task(TaskSpec::new("warm-up"))
        .await
        .unwrap()
        .task_id;
    let status = wait_all(&handle, &[id]).await;

    assert_eq!(status, vec![TaskStatus::Completed]);
    let task = handle.get_task(id).await.unwrap();
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.results, vec![json!({"attempt": 1})]);
    assert_eq!(executor.failures.load(Ordering::SeqCst), 1);
    handle.shutdown();
}

#[tokio::test]
async fn test_summary_and_bottlenecks_through_handle() {
    let handle = create_test_service(Config::default(), Arc::new(EchoExecutor::new()));
    let topology = handle
        .init_topology(TopologyKind::Star, 3, TopologyStrategy::Balanced, false)
        .await
        .unwrap();
    let id = handle.orchestrate_task(TaskSpec::new("one")).await.unwrap().task_id;
    wait_all(&handle, &[id]).await;

    let report = handle.detect_bottlenecks(Some(topology.id), None).await.unwrap();
    assert!(report.entries.is_empty());

    let summary = handle.performance_summary().await.unwrap();
    assert_eq!(summary.topologies, 1);
    assert_eq!(summary.tasks.get("completed"), Some(&1));

    let tick = handle.tick().await.unwrap();
    assert!(tick.cancelled.is_empty());

    let record = handle.export_task(id).await.unwrap();
    assert_eq!(record["status"], json!("completed"));
    handle.shutdown();
}

#[tokio::test]
async fn test_switch_and_teardown_through_handle() {
    let handle = create_test_service(Config::default(), Arc::new(EchoExecutor::new()));
    let topology = handle
        .init_topology(TopologyKind::Hierarchical, 5, TopologyStrategy::Balanced, false)
        .await
        .unwrap();
    assert_eq!(topology.members.len(), 4);

    let outcome = handle.switch_topology(topology.id, TopologyKind::Ring).await.unwrap();
    assert_eq!(outcome.spawned.len(), 1);
    let members = handle
        .list_workers(WorkerFilter::new().in_swarm(topology.id))
        .await
        .unwrap();
    assert_eq!(members.len(), 5);

    let summary = handle.teardown_topology(topology.id, WAIT).await.unwrap();
    assert_eq!(summary.terminated.len(), 5);
    assert!(handle.list_workers(WorkerFilter::new()).await.unwrap().is_empty());
    handle.shutdown();
}
