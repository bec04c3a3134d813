//! Mailbox messages for the swarm service.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::core::bottleneck::BottleneckReport;
use crate::core::task::{Task, TaskId, TaskSpec, TaskStatus};
use crate::core::topology::{Topology, TopologyId, TopologyKind, TopologyStrategy};
use crate::core::worker::{MetricsDelta, Worker, WorkerConfig, WorkerId, WorkerStatus};
use crate::error::Result;
use crate::external::{Dispatch, ExecutionOutcome};
use crate::orchestration::{
    Detection, DistributionReport, InitPlan, OptimizationRecommendation, SwitchOutcome, SwitchPlan,
    TaskProgress, WorkerFilter, WorkloadHint,
};
use crate::swarm::{PerformanceSummary, TeardownSummary, TickReport};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Who is waiting on a worker launch.
pub(crate) enum SpawnReply {
    Spawn(Reply<Worker>),
    Scale(Reply<Option<Worker>>),
}

/// Who is waiting on a switch.
pub(crate) enum SwitchReply {
    Switch(Reply<SwitchOutcome>),
    Optimize(OptimizationRecommendation, Reply<OptimizationRecommendation>),
}

pub(crate) enum Command {
    InitTopology {
        kind: TopologyKind,
        max_workers: usize,
        strategy: TopologyStrategy,
        memory_enabled: bool,
        reply: Reply<Topology>,
    },
    SwitchTopology {
        id: TopologyId,
        kind: TopologyKind,
        reply: Reply<SwitchOutcome>,
    },
    OptimizeTopology {
        id: TopologyId,
        report: Option<BottleneckReport>,
        hint: Option<WorkloadHint>,
        auto_apply: bool,
        reply: Reply<OptimizationRecommendation>,
    },
    SmartScale {
        id: TopologyId,
        reply: Reply<Option<Worker>>,
    },
    TeardownTopology {
        id: TopologyId,
        timeout: Duration,
        reply: Reply<TeardownSummary>,
    },
    SpawnWorker {
        config: WorkerConfig,
        reply: Reply<Worker>,
    },
    TerminateWorker {
        id: WorkerId,
        reply: Reply<Worker>,
    },
    ListWorkers {
        filter: WorkerFilter,
        reply: Reply<Vec<Worker>>,
    },
    UpdateWorkerMetrics {
        id: WorkerId,
        delta: MetricsDelta,
        reply: Reply<Worker>,
    },
    SetWorkerStatus {
        id: WorkerId,
        status: WorkerStatus,
        reply: Reply<Worker>,
    },
    OrchestrateTask {
        spec: TaskSpec,
        reply: Reply<TaskProgress>,
    },
    CancelTask {
        id: TaskId,
        reply: Reply<bool>,
    },
    MonitorTask {
        id: TaskId,
        reply: Reply<TaskProgress>,
    },
    RetryTask {
        id: TaskId,
        reply: Reply<TaskProgress>,
    },
    GetTask {
        id: TaskId,
        reply: Reply<Task>,
    },
    ListTasks {
        status: Option<TaskStatus>,
        reply: Reply<Vec<Task>>,
    },
    ExportTask {
        id: TaskId,
        reply: Reply<serde_json::Value>,
    },
    DetectBottlenecks {
        topology: Option<TopologyId>,
        detection: Option<Detection>,
        reply: Reply<BottleneckReport>,
    },
    PerformanceSummary {
        reply: Reply<PerformanceSummary>,
    },
    OptimizeDistribution {
        reply: Reply<DistributionReport>,
    },
    Tick {
        reply: Reply<TickReport>,
    },

    // Results of work the service ran off its loop.
    InitLaunched {
        plan: InitPlan,
        launched: Result<Vec<Worker>>,
        reply: Reply<Topology>,
    },
    SpawnLaunched {
        worker: Worker,
        launched: Result<Vec<Worker>>,
        reply: SpawnReply,
    },
    SwitchLaunched {
        plan: SwitchPlan,
        launched: Result<Vec<Worker>>,
        reply: SwitchReply,
    },
    Executed {
        dispatch: Dispatch,
        outcome: ExecutionOutcome,
    },
}
