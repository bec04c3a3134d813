//! Swarm service actor.
//!
//! [`SwarmService`] moves a [`crate::Swarm`] onto its own tokio task. All
//! access goes through the mailbox behind a cloneable [`SwarmHandle`], so
//! concurrent callers see every mutation in one total order. Launches,
//! shutdowns and executions run on spawned tasks and report back through
//! the same mailbox; the loop itself never blocks.

mod actor;
mod command;

pub use actor::SwarmService;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::bottleneck::BottleneckReport;
use crate::core::task::{Task, TaskId, TaskSpec, TaskStatus};
use crate::core::topology::{Topology, TopologyId, TopologyKind, TopologyStrategy};
use crate::core::worker::{MetricsDelta, Worker, WorkerConfig, WorkerId, WorkerStatus};
use crate::error::{Error, Result};
use crate::orchestration::{
    Detection, DistributionReport, OptimizationRecommendation, SwitchOutcome, TaskProgress,
    WorkerFilter, WorkloadHint,
};
use crate::swarm::{PerformanceSummary, TeardownSummary, TickReport};

use command::{Command, Reply};

/// Cloneable front door to a running [`SwarmService`].
#[derive(Clone)]
pub struct SwarmHandle {
    tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl SwarmHandle {
    fn new(tx: mpsc::UnboundedSender<Command>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Signal the service to stop. In-flight executions are cancelled.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(Error::ServiceClosed);
        }
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| Error::ServiceClosed)?;
        rx.await.map_err(|_| Error::ServiceClosed)?
    }

    pub async fn init_topology(
        &self,
        kind: TopologyKind,
        max_workers: usize,
        strategy: TopologyStrategy,
        memory_enabled: bool,
    ) -> Result<Topology> {
        self.request(|reply| Command::InitTopology {
            kind,
            max_workers,
            strategy,
            memory_enabled,
            reply,
        })
        .await
    }

    pub async fn switch_topology(&self, id: TopologyId, kind: TopologyKind) -> Result<SwitchOutcome> {
        self.request(|reply| Command::SwitchTopology { id, kind, reply }).await
    }

    pub async fn optimize_topology(
        &self,
        id: TopologyId,
        report: Option<BottleneckReport>,
        hint: Option<WorkloadHint>,
        auto_apply: bool,
    ) -> Result<OptimizationRecommendation> {
        self.request(|reply| Command::OptimizeTopology {
            id,
            report,
            hint,
            auto_apply,
            reply,
        })
        .await
    }

    pub async fn smart_scale(&self, id: TopologyId) -> Result<Option<Worker>> {
        self.request(|reply| Command::SmartScale { id, reply }).await
    }

    /// Terminate every member of a topology, each under `timeout`.
    ///
    /// Per-worker failures land in the summary; only an unknown or busy
    /// topology is an error.
    pub async fn teardown_topology(&self, id: TopologyId, timeout: Duration) -> Result<TeardownSummary> {
        self.request(|reply| Command::TeardownTopology { id, timeout, reply })
            .await
    }

    pub async fn spawn_worker(&self, config: WorkerConfig) -> Result<Worker> {
        self.request(|reply| Command::SpawnWorker { config, reply }).await
    }

    pub async fn terminate_worker(&self, id: WorkerId) -> Result<Worker> {
        self.request(|reply| Command::TerminateWorker { id, reply }).await
    }

    pub async fn list_workers(&self, filter: WorkerFilter) -> Result<Vec<Worker>> {
        self.request(|reply| Command::ListWorkers { filter, reply }).await
    }

    pub async fn update_worker_metrics(&self, id: WorkerId, delta: MetricsDelta) -> Result<Worker> {
        self.request(|reply| Command::UpdateWorkerMetrics { id, delta, reply })
            .await
    }

    pub async fn set_worker_status(&self, id: WorkerId, status: WorkerStatus) -> Result<Worker> {
        self.request(|reply| Command::SetWorkerStatus { id, status, reply })
            .await
    }

    pub async fn orchestrate_task(&self, spec: TaskSpec) -> Result<TaskProgress> {
        self.request(|reply| Command::OrchestrateTask { spec, reply }).await
    }

    pub async fn cancel_task(&self, id: TaskId) -> Result<bool> {
        self.request(|reply| Command::CancelTask { id, reply }).await
    }

    pub async fn monitor_task(&self, id: TaskId) -> Result<TaskProgress> {
        self.request(|reply| Command::MonitorTask { id, reply }).await
    }

    pub async fn retry_task(&self, id: TaskId) -> Result<TaskProgress> {
        self.request(|reply| Command::RetryTask { id, reply }).await
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.request(|reply| Command::GetTask { id, reply }).await
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.request(|reply| Command::ListTasks { status, reply }).await
    }

    pub async fn export_task(&self, id: TaskId) -> Result<serde_json::Value> {
        self.request(|reply| Command::ExportTask { id, reply }).await
    }

    /// `detection` defaults to the configured stall window and a 0.8
    /// overload threshold.
    pub async fn detect_bottlenecks(
        &self,
        topology: Option<TopologyId>,
        detection: Option<Detection>,
    ) -> Result<BottleneckReport> {
        self.request(|reply| Command::DetectBottlenecks {
            topology,
            detection,
            reply,
        })
        .await
    }

    pub async fn performance_summary(&self) -> Result<PerformanceSummary> {
        self.request(|reply| Command::PerformanceSummary { reply }).await
    }

    pub async fn optimize_distribution(&self) -> Result<DistributionReport> {
        self.request(|reply| Command::OptimizeDistribution { reply }).await
    }

    /// Run a scheduler tick now instead of waiting for the interval.
    pub async fn tick(&self) -> Result<TickReport> {
        self.request(|reply| Command::Tick { reply }).await
    }

    /// Poll until the task reaches a terminal status.
    pub async fn wait_for_task(&self, id: TaskId, poll: Duration) -> Result<Task> {
        loop {
            let task = self.get_task(id).await?;
            if task.status.is_finished() {
                return Ok(task);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl std::fmt::Debug for SwarmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
