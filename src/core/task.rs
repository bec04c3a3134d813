//! Task data model for the scheduler.
//!
//! Tasks are the units of work distributed to workers. Each task tracks
//! its status, lineage, dependencies, assignments and metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::elapsed_ms;
use crate::core::topology::TopologyId;
use crate::core::worker::WorkerId;
use crate::error::{Error, Result};

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// `Completed` and `Cancelled` are terminal. `Failed` is terminal unless
/// the task is resubmitted through `Retrying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    /// Completed, failed or cancelled.
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Assigned or running; the statuses that count towards worker load.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Fan-out pattern used to hand a task to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
    Parallel,
    Sequential,
    #[default]
    Adaptive,
}

impl DistributionStrategy {
    /// Upper bound on workers selected for one task.
    pub fn max_concurrency(&self, priority: Priority) -> usize {
        match (self, priority) {
            (DistributionStrategy::Parallel, Priority::Critical) => 8,
            (DistributionStrategy::Parallel, Priority::High) => 6,
            (DistributionStrategy::Parallel, _) => 4,
            (DistributionStrategy::Sequential, _) => 1,
            (DistributionStrategy::Adaptive, Priority::Critical) => 4,
            (DistributionStrategy::Adaptive, _) => 2,
        }
    }
}

/// How candidate workers are ordered before selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    CapabilityBased,
    PerformanceBased,
    LoadBalanced,
    RoundRobin,
}

impl SelectionPolicy {
    /// Default policy for a task: capability-based when it has requirements,
    /// performance-based for urgent work, load-balanced otherwise.
    pub fn for_task(requirements: &[String], priority: Priority) -> Self {
        if !requirements.is_empty() {
            SelectionPolicy::CapabilityBased
        } else if matches!(priority, Priority::Critical | Priority::High) {
            SelectionPolicy::PerformanceBased
        } else {
            SelectionPolicy::LoadBalanced
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub parent_id: Option<TaskId>,
    pub child_ids: Vec<TaskId>,
    pub origin_id: TaskId,
    pub depth: u32,
    /// Task ids from the origin down to this task, inclusive.
    pub breadcrumb: Vec<TaskId>,
}

impl Lineage {
    pub fn root(id: TaskId) -> Self {
        Self {
            parent_id: None,
            child_ids: Vec::new(),
            origin_id: id,
            depth: 0,
            breadcrumb: vec![id],
        }
    }

    pub fn child_of(parent_id: TaskId, parent: &Lineage, id: TaskId) -> Self {
        let mut breadcrumb = parent.breadcrumb.clone();
        breadcrumb.push(id);
        Self {
            parent_id: Some(parent_id),
            child_ids: Vec::new(),
            origin_id: parent.origin_id,
            depth: parent.depth + 1,
            breadcrumb,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub processing_time_ms: u64,
    pub token_usage: u64,
    pub error_count: u32,
    pub resource_usage: ResourceUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    /// Selected but held back (sequential fallback or adaptive reserve).
    Queued,
    Dispatched,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub worker_id: WorkerId,
    pub state: AssignmentState,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn queued(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            state: AssignmentState::Queued,
            dispatched_at: None,
            finished_at: None,
        }
    }
}

/// Request to orchestrate a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    /// Caller-chosen id; generated when absent.
    pub id: Option<TaskId>,
    pub name: String,
    pub description: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub strategy: DistributionStrategy,
    /// Overrides the default selection policy.
    pub selection: Option<SelectionPolicy>,
    pub requirements: Vec<String>,
    pub dependencies: Vec<TaskId>,
    pub parent_id: Option<TaskId>,
    /// Restricts selection to one topology's members.
    pub topology_id: Option<TopologyId>,
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_strategy(mut self, strategy: DistributionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_requirements<I, S>(mut self, reqs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = reqs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_topology(mut self, topology_id: TopologyId) -> Self {
        self.topology_id = Some(topology_id);
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub strategy: DistributionStrategy,
    pub selection: SelectionPolicy,
    pub requirements: Vec<String>,
    pub payload: serde_json::Value,
    pub topology_id: Option<TopologyId>,
    pub assigned_workers: Vec<WorkerId>,
    pub assignments: Vec<Assignment>,
    /// 0..=100
    pub progress: u8,
    pub dependencies: Vec<TaskId>,
    pub lineage: Lineage,
    pub retry_count: u32,
    pub max_retries: u32,
    pub metrics: TaskMetrics,
    pub cancelled: bool,
    pub error: Option<String>,
    pub results: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Last time an adaptive task took on another worker.
    pub last_expanded_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a pending task from a spec. Lineage is supplied by the scheduler.
    pub fn from_spec(spec: TaskSpec, lineage: Lineage, default_max_retries: u32, now: DateTime<Utc>) -> Self {
        let id = lineage.breadcrumb.last().copied().unwrap_or_else(TaskId::new);
        let selection = spec
            .selection
            .unwrap_or_else(|| SelectionPolicy::for_task(&spec.requirements, spec.priority));
        let mut dependencies = Vec::with_capacity(spec.dependencies.len());
        for dep in spec.dependencies {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
        Self {
            id,
            name: spec.name,
            description: spec.description,
            status: TaskStatus::Pending,
            priority: spec.priority,
            strategy: spec.strategy,
            selection,
            requirements: spec.requirements,
            payload: spec.payload,
            topology_id: spec.topology_id,
            assigned_workers: Vec::new(),
            assignments: Vec::new(),
            progress: 0,
            dependencies,
            lineage,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            metrics: TaskMetrics::default(),
            cancelled: false,
            error: None,
            results: Vec::new(),
            created_at: now,
            start_time: None,
            end_time: None,
            last_expanded_at: None,
        }
    }

    /// Record the selected workers and move to `Assigned`.
    ///
    /// The first `listed` workers become `assigned_workers`; the rest are
    /// queued failover slots only.
    pub fn assign(&mut self, workers: Vec<WorkerId>, listed: usize, now: DateTime<Utc>) {
        self.assignments = workers.iter().copied().map(Assignment::queued).collect();
        self.assigned_workers = workers.into_iter().take(listed).collect();
        self.status = TaskStatus::Assigned;
        self.start_time = Some(now);
        self.last_expanded_at = Some(now);
        self.error = None;
        self.progress = 0;
    }

    /// Mark the next `count` queued assignments as dispatched.
    ///
    /// Returns the workers that were dispatched. The first dispatch moves
    /// the task to `Running`.
    pub fn dispatch_next(&mut self, count: usize, now: DateTime<Utc>) -> Vec<WorkerId> {
        let mut dispatched = Vec::new();
        for assignment in self
            .assignments
            .iter_mut()
            .filter(|a| a.state == AssignmentState::Queued)
            .take(count)
        {
            assignment.state = AssignmentState::Dispatched;
            assignment.dispatched_at = Some(now);
            dispatched.push(assignment.worker_id);
        }
        if !dispatched.is_empty() {
            self.status = TaskStatus::Running;
        }
        dispatched
    }

    /// Dispatch the next queued worker in place of `failed`.
    pub fn fail_over(&mut self, failed: WorkerId, now: DateTime<Utc>) -> Option<WorkerId> {
        let next = self.dispatch_next(1, now).into_iter().next()?;
        if !self.assigned_workers.contains(&next) {
            match self.assigned_workers.iter_mut().find(|w| **w == failed) {
                Some(slot) => *slot = next,
                None => self.assigned_workers.push(next),
            }
        }
        Some(next)
    }

    pub fn assignment_mut(&mut self, worker_id: WorkerId) -> Option<&mut Assignment> {
        self.assignments
            .iter_mut()
            .find(|a| a.worker_id == worker_id && a.state == AssignmentState::Dispatched)
    }

    pub fn count_in(&self, state: AssignmentState) -> usize {
        self.assignments.iter().filter(|a| a.state == state).count()
    }

    /// Workers with an execution still in flight.
    pub fn in_flight_workers(&self) -> Vec<WorkerId> {
        self.assignments
            .iter()
            .filter(|a| a.state == AssignmentState::Dispatched)
            .map(|a| a.worker_id)
            .collect()
    }

    /// Recompute progress from finished assignments.
    pub fn refresh_progress(&mut self) {
        let started = self
            .assignments
            .iter()
            .filter(|a| a.state != AssignmentState::Queued)
            .count();
        if started == 0 {
            self.progress = 0;
            return;
        }
        let done = self.count_in(AssignmentState::Succeeded);
        self.progress = ((done * 100) / started).min(100) as u8;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.end_time = Some(now);
    }

    /// Move to `Failed`. Execution errors are counted where they are
    /// observed, not here.
    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
        self.end_time = Some(now);
    }

    /// Fold elapsed running time into the metrics.
    pub fn refresh_processing_time(&mut self, now: DateTime<Utc>) {
        if let Some(start) = self.start_time {
            let end = self.end_time.unwrap_or(now);
            self.metrics.processing_time_ms = elapsed_ms(start, end);
        }
    }

    /// Pending or retrying: waiting to be distributed.
    pub fn is_waiting(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Retrying)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.cancelled = true;
        self.status = TaskStatus::Cancelled;
        self.end_time = Some(now);
    }

    /// Move a failed task back into the queue for another attempt.
    pub fn begin_retry(&mut self) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::Retrying.to_string(),
            });
        }
        if self.retry_count >= self.max_retries {
            return Err(Error::Validation(format!(
                "task {} exhausted its {} retries",
                self.id, self.max_retries
            )));
        }
        self.retry_count += 1;
        self.status = TaskStatus::Retrying;
        self.assignments.clear();
        self.assigned_workers.clear();
        self.progress = 0;
        self.end_time = None;
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && !self.cancelled && self.retry_count < self.max_retries
    }

    /// Export to a structured record.
    pub fn to_record(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Reconstruct from a record produced by [`Task::to_record`].
    pub fn from_record(record: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(record)?)
    }
}
