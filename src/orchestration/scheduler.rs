//! Dependency-aware task scheduler.
//!
//! The `TaskScheduler` owns every task. It gates tasks on their
//! dependencies, picks workers under the task's selection policy, hands
//! work out according to the distribution strategy, folds execution
//! outcomes back in, and releases dependents when a task completes.
//!
//! It performs no I/O of its own: operations return the [`Dispatch`]es
//! the caller must hand to the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::clock::elapsed_ms;
use crate::core::dag::DependencyGraph;
use crate::core::task::{
    AssignmentState, DistributionStrategy, Lineage, SelectionPolicy, Task, TaskId, TaskMetrics,
    TaskSpec, TaskStatus,
};
use crate::core::topology::TopologyId;
use crate::core::worker::{MetricsDelta, Worker, WorkerId};
use crate::error::{Error, Result};
use crate::external::{Dispatch, DurableStore, ExecutionOutcome, HostSample, RecordKind};
use crate::orchestration::monitor::{FanOut, RunningTask, WorkerLoad, WorkloadSnapshot};
use crate::orchestration::registry::WorkerRegistry;

/// Extra workers a sequential task keeps queued as failover.
pub const SEQUENTIAL_FALLBACKS: usize = 2;

/// Workers an adaptive task starts with.
pub const ADAPTIVE_INITIAL_WORKERS: usize = 2;

/// Average processing time at which time efficiency reaches zero.
const EFFICIENCY_HORIZON_MS: f64 = 300_000.0;

/// Efficiency below which `optimize_distribution` rebalances.
pub const REBALANCE_THRESHOLD: f64 = 0.7;

/// Result of folding one execution outcome into a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeReport {
    /// Metrics to apply to the worker that ran the dispatch.
    pub worker_delta: Option<(WorkerId, MetricsDelta)>,
    /// Failover dispatches started by this outcome.
    pub dispatches: Vec<Dispatch>,
    /// Set when the outcome moved the task to a terminal status.
    pub finished: Option<TaskStatus>,
}

/// Point-in-time progress document for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub assigned_workers: Vec<WorkerId>,
    pub in_flight: Vec<WorkerId>,
    /// Dependencies not yet completed.
    pub unresolved: Vec<TaskId>,
    pub metrics: TaskMetrics,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub time_efficiency: f64,
    pub resource_efficiency: f64,
    pub efficiency: f64,
    /// Queued assignments moved to a better worker.
    pub rebalanced: usize,
    pub reordered: bool,
}

pub struct TaskScheduler {
    tasks: HashMap<TaskId, Task>,
    graph: DependencyGraph,
    /// Tasks waiting on dependencies or on a worker, in queue order.
    pending: Vec<TaskId>,
    /// Tasks the monitor pass still watches.
    active: Vec<TaskId>,
    /// Every task id that ever completed. Survives retention.
    completed: HashSet<TaskId>,
    default_max_retries: u32,
}

impl TaskScheduler {
    pub fn new(default_max_retries: u32) -> Self {
        Self {
            tasks: HashMap::new(),
            graph: DependencyGraph::new(),
            pending: Vec::new(),
            active: Vec::new(),
            completed: HashSet::new(),
            default_max_retries,
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn require(&self, id: &TaskId) -> Result<&Task> {
        self.tasks.get(id).ok_or(Error::TaskNotFound { id: *id })
    }

    /// Tasks in creation order, optionally restricted to one status.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<&Task> {
        let mut out: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    pub fn pending_queue(&self) -> &[TaskId] {
        &self.pending
    }

    pub fn is_completed(&self, id: &TaskId) -> bool {
        self.completed.contains(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Dependencies of `task` that have not completed.
    pub fn unresolved(&self, task: &Task) -> Vec<TaskId> {
        task.dependencies
            .iter()
            .copied()
            .filter(|d| !self.completed.contains(d))
            .collect()
    }

    /// Create a task and queue it as pending.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` for an unknown parent, `Validation` for a reused id,
    /// `DependencyCycle` if the dependencies would close a loop.
    pub fn submit(&mut self, spec: TaskSpec, now: DateTime<Utc>) -> Result<TaskId> {
        let id = spec.id.unwrap_or_default();
        if self.tasks.contains_key(&id) || self.completed.contains(&id) {
            return Err(Error::Validation(format!("task id {} is already in use", id)));
        }
        let lineage = match spec.parent_id {
            Some(parent_id) => {
                let parent = self
                    .tasks
                    .get(&parent_id)
                    .ok_or(Error::TaskNotFound { id: parent_id })?;
                Lineage::child_of(parent_id, &parent.lineage, id)
            }
            None => Lineage::root(id),
        };
        self.graph.add_task(id, &spec.dependencies)?;
        if let Some(parent_id) = lineage.parent_id {
            if let Some(parent) = self.tasks.get_mut(&parent_id) {
                parent.lineage.child_ids.push(id);
            }
        }

        let task = Task::from_spec(spec, lineage, self.default_max_retries, now);
        debug!(
            "TaskScheduler::submit {} '{}' depth={} deps={}",
            id.short(),
            task.name,
            task.lineage.depth,
            task.dependencies.len()
        );
        self.tasks.insert(id, task);
        self.pending.push(id);
        self.active.push(id);
        Ok(id)
    }

    /// Distribute a waiting task if its dependencies are complete and a
    /// worker is available. Otherwise it stays queued.
    pub fn try_start(
        &mut self,
        id: &TaskId,
        registry: &mut WorkerRegistry,
        now: DateTime<Utc>,
    ) -> Result<Vec<Dispatch>> {
        let task = self.require(id)?;
        if !task.is_waiting() {
            return Ok(Vec::new());
        }
        let unresolved = self.unresolved(task);
        if !unresolved.is_empty() {
            trace!("task {} waits on {} dependencies", id.short(), unresolved.len());
            return Ok(Vec::new());
        }
        self.distribute(id, registry, now)
    }

    /// Select workers for a task and dispatch the first wave.
    ///
    /// Callers must have checked the dependency gate.
    fn distribute(
        &mut self,
        id: &TaskId,
        registry: &mut WorkerRegistry,
        now: DateTime<Utc>,
    ) -> Result<Vec<Dispatch>> {
        let loads = self.loads();
        let task = self.require(id)?;
        let selected = select_workers(task, registry, &loads);
        if selected.is_empty() {
            debug!("no eligible workers for task {}; left queued", id.short());
            if !self.pending.contains(id) {
                self.pending.push(*id);
            }
            return Ok(Vec::new());
        }

        let task = self
            .tasks
            .get_mut(id)
            .ok_or(Error::TaskNotFound { id: *id })?;
        let initial = match task.strategy {
            DistributionStrategy::Parallel => selected.len(),
            DistributionStrategy::Sequential => 1,
            DistributionStrategy::Adaptive => ADAPTIVE_INITIAL_WORKERS.min(selected.len()),
        };
        let listed = task.strategy.max_concurrency(task.priority).min(selected.len());
        task.assign(selected, listed, now);
        let started = task.dispatch_next(initial, now);
        info!(
            "Task {} '{}' started on {} of {} workers ({:?}, {:?})",
            id.short(),
            task.name,
            started.len(),
            task.assigned_workers.len(),
            task.strategy,
            task.selection
        );
        let dispatches = dispatches_for(task, &started);
        self.pending.retain(|p| p != id);
        if !self.active.contains(id) {
            self.active.push(*id);
        }
        Ok(dispatches)
    }

    /// Fold an execution outcome into its task.
    ///
    /// Outcomes for finished tasks or for workers without an in-flight
    /// dispatch are stale and ignored. Once nothing is in flight the task
    /// fails if any failure found no fallback worker, even when a sibling
    /// dispatch succeeded.
    pub fn record_outcome(
        &mut self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        outcome: ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> Result<OutcomeReport> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or(Error::TaskNotFound { id: *task_id })?;
        if task.status.is_finished() {
            debug!("dropping outcome for finished task {}", task_id.short());
            return Ok(OutcomeReport::default());
        }
        let Some(assignment) = task.assignment_mut(*worker_id) else {
            debug!(
                "dropping outcome from {} with no dispatch for task {}",
                worker_id.short(),
                task_id.short()
            );
            return Ok(OutcomeReport::default());
        };
        let response_ms = elapsed_ms(assignment.dispatched_at.unwrap_or(now), now) as f64;
        assignment.finished_at = Some(now);

        let mut report = OutcomeReport::default();
        match outcome {
            ExecutionOutcome::Success { result, token_usage } => {
                assignment.state = AssignmentState::Succeeded;
                task.results.push(result);
                task.metrics.token_usage += token_usage;
                report.worker_delta = Some((*worker_id, MetricsDelta::completed(response_ms, token_usage)));
            }
            ExecutionOutcome::Failure { error } => {
                assignment.state = AssignmentState::Failed;
                task.metrics.error_count += 1;
                report.worker_delta = Some((*worker_id, MetricsDelta::failed(response_ms)));
                match task.fail_over(*worker_id, now) {
                    Some(fallback) => {
                        info!(
                            "Task {} failed on {}; failing over to {}",
                            task_id.short(),
                            worker_id.short(),
                            fallback.short()
                        );
                        report.dispatches = dispatches_for(task, &[fallback]);
                    }
                    None => {
                        warn!("Task {} failed on {}: {}", task_id.short(), worker_id.short(), error);
                        task.error = Some(error);
                    }
                }
            }
        }

        task.refresh_progress();
        if task.count_in(AssignmentState::Dispatched) == 0 {
            match task.error.clone() {
                Some(error) => task.fail(&error, now),
                None => {
                    task.complete(now);
                    self.completed.insert(*task_id);
                }
            }
            task.refresh_processing_time(now);
            info!("Task {} '{}' {}", task_id.short(), task.name, task.status);
            report.finished = Some(task.status);
        }
        Ok(report)
    }

    /// Fail every in-flight dispatch on a worker that has gone away and
    /// drop it from queued failover slots.
    pub fn worker_lost(&mut self, worker_id: &WorkerId, now: DateTime<Utc>) -> Vec<(TaskId, OutcomeReport)> {
        let affected: Vec<TaskId> = self
            .active
            .iter()
            .copied()
            .filter(|id| {
                self.tasks.get(id).is_some_and(|t| {
                    !t.status.is_finished() && t.assignments.iter().any(|a| a.worker_id == *worker_id)
                })
            })
            .collect();

        let mut reports = Vec::new();
        for id in affected {
            if let Some(task) = self.tasks.get_mut(&id) {
                for a in task.assignments.iter_mut() {
                    if a.worker_id == *worker_id && a.state == AssignmentState::Queued {
                        a.state = AssignmentState::Failed;
                        a.finished_at = Some(now);
                    }
                }
            }
            let outcome = ExecutionOutcome::Failure {
                error: format!("worker {} terminated", worker_id.short()),
            };
            match self.record_outcome(&id, worker_id, outcome, now) {
                Ok(mut report) => {
                    report.worker_delta = None;
                    reports.push((id, report));
                }
                Err(e) => warn!("worker_lost: task {}: {}", id.short(), e),
            }
        }
        reports
    }

    /// Cancel a task.
    ///
    /// Returns `false` (and changes nothing) when the task already
    /// completed, failed or was cancelled.
    pub fn cancel(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<bool> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or(Error::TaskNotFound { id: *id })?;
        if task.status.is_finished() {
            return Ok(false);
        }
        task.cancel(now);
        task.refresh_processing_time(now);
        info!("Task {} '{}' cancelled", id.short(), task.name);
        self.pending.retain(|p| p != id);
        self.active.retain(|a| a != id);
        Ok(true)
    }

    /// Put a failed task back through distribution.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the task failed, `Validation` once its
    /// retries are exhausted.
    pub fn retry(
        &mut self,
        id: &TaskId,
        registry: &mut WorkerRegistry,
        now: DateTime<Utc>,
    ) -> Result<Vec<Dispatch>> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or(Error::TaskNotFound { id: *id })?;
        task.begin_retry()?;
        info!(
            "Task {} retrying ({}/{})",
            id.short(),
            task.retry_count,
            task.max_retries
        );
        if !self.active.contains(id) {
            self.active.push(*id);
        }
        self.distribute(id, registry, now)
    }

    /// Refresh a task's metrics and report its progress.
    pub fn monitor(&mut self, id: &TaskId, host: Option<HostSample>, now: DateTime<Utc>) -> Result<TaskProgress> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or(Error::TaskNotFound { id: *id })?;
        refresh_metrics(task, host, now);
        let task = self.require(id)?;
        Ok(TaskProgress {
            task_id: *id,
            status: task.status,
            progress: task.progress,
            assigned_workers: task.assigned_workers.clone(),
            in_flight: task.in_flight_workers(),
            unresolved: self.unresolved(task),
            metrics: task.metrics.clone(),
            error: task.error.clone(),
        })
    }

    /// One monitoring pass over every watched task.
    ///
    /// Honors cancellation flags, refreshes metrics, and stops watching
    /// tasks that reached a terminal status. Returns the tasks that
    /// finished since the last pass.
    pub fn monitor_pass(&mut self, host: Option<HostSample>, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut finished = Vec::new();
        for id in self.active.clone() {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            if task.cancelled && task.status != TaskStatus::Cancelled {
                task.cancel(now);
            }
            refresh_metrics(task, host, now);
            if task.status.is_finished() {
                finished.push(id);
            }
        }
        self.active.retain(|id| !finished.contains(id));
        if !finished.is_empty() {
            debug!("monitor pass: {} tasks finished", finished.len());
        }
        finished
    }

    /// Start every pending dependent of `id` whose dependencies are now
    /// all complete. Safe to call repeatedly for the same id.
    pub fn process_dependents(
        &mut self,
        id: &TaskId,
        registry: &mut WorkerRegistry,
        now: DateTime<Utc>,
    ) -> Vec<Dispatch> {
        if !self.completed.contains(id) {
            return Vec::new();
        }
        let mut dispatches = Vec::new();
        for dependent in self.graph.dependents(id) {
            if !self.pending.contains(&dependent) {
                continue;
            }
            match self.try_start(&dependent, registry, now) {
                Ok(d) => dispatches.extend(d),
                Err(e) => warn!("dependent {} of {} not started: {}", dependent.short(), id.short(), e),
            }
        }
        dispatches
    }

    /// Retry distribution for everything in the pending queue.
    pub fn sweep_pending(&mut self, registry: &mut WorkerRegistry, now: DateTime<Utc>) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        for id in self.pending.clone() {
            match self.try_start(&id, registry, now) {
                Ok(d) => dispatches.extend(d),
                Err(e) => warn!("pending task {} not started: {}", id.short(), e),
            }
        }
        dispatches
    }

    /// Let running adaptive tasks take on one reserved worker each once
    /// `after` has passed since they last grew.
    pub fn expand_adaptive(&mut self, after: Duration, now: DateTime<Utc>) -> Vec<Dispatch> {
        let after_ms = after.as_millis() as u64;
        let mut dispatches = Vec::new();
        for id in &self.active {
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            if task.strategy != DistributionStrategy::Adaptive
                || task.status != TaskStatus::Running
                || task.count_in(AssignmentState::Queued) == 0
            {
                continue;
            }
            let since = task.last_expanded_at.or(task.start_time).unwrap_or(now);
            if elapsed_ms(since, now) < after_ms {
                continue;
            }
            let added = task.dispatch_next(1, now);
            task.last_expanded_at = Some(now);
            debug!("adaptive task {} expanded to {:?}", id.short(), added);
            dispatches.extend(dispatches_for(task, &added));
        }
        dispatches
    }

    /// Running tasks whose elapsed time exceeds `limit`.
    pub fn overdue(&self, limit: Duration, now: DateTime<Utc>) -> Vec<TaskId> {
        let limit_ms = limit.as_millis() as u64;
        self.active
            .iter()
            .copied()
            .filter(|id| {
                self.tasks.get(id).is_some_and(|t| {
                    t.status == TaskStatus::Running
                        && t.start_time.is_some_and(|s| elapsed_ms(s, now) > limit_ms)
                })
            })
            .collect()
    }

    /// Failed tasks that still have retries left.
    pub fn retryable(&self) -> Vec<TaskId> {
        self.list(Some(TaskStatus::Failed))
            .into_iter()
            .filter(|t| t.can_retry())
            .map(|t| t.id)
            .collect()
    }

    /// Concurrent tasks held per worker: queued or dispatched assignments
    /// of tasks that are assigned or running.
    pub fn loads(&self) -> HashMap<WorkerId, usize> {
        let mut loads: HashMap<WorkerId, usize> = HashMap::new();
        for task in self.tasks.values().filter(|t| t.status.is_active()) {
            let mut seen = HashSet::new();
            for a in &task.assignments {
                if matches!(a.state, AssignmentState::Queued | AssignmentState::Dispatched)
                    && seen.insert(a.worker_id)
                {
                    *loads.entry(a.worker_id).or_default() += 1;
                }
            }
        }
        loads
    }

    /// Workload view for bottleneck detection, optionally scoped to one
    /// topology.
    pub fn snapshot(&self, registry: &WorkerRegistry, scope: Option<TopologyId>) -> WorkloadSnapshot {
        let loads = self.loads();
        let in_scope_worker = |w: &Worker| scope.map_or(true, |t| w.swarm_id == t);
        let workers = registry
            .live()
            .filter(|w| in_scope_worker(w))
            .map(|w| WorkerLoad {
                worker_id: w.id,
                load: loads.get(&w.id).copied().unwrap_or(0),
            })
            .collect();

        let in_scope_task = |t: &Task| match scope {
            None => true,
            Some(s) => {
                t.topology_id == Some(s)
                    || t
                        .assignments
                        .iter()
                        .any(|a| registry.get(&a.worker_id).is_some_and(|w| w.swarm_id == s))
            }
        };
        let tasks = self.list(None);
        let running = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running && in_scope_task(t))
            .filter_map(|t| {
                t.start_time.map(|started_at| RunningTask {
                    task_id: t.id,
                    started_at,
                })
            })
            .collect();
        let fan_out = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed && in_scope_task(t))
            .map(|t| FanOut {
                task_id: t.id,
                dependents: self.graph.dependent_count(&t.id),
            })
            .filter(|f| f.dependents > 0)
            .collect();

        WorkloadSnapshot {
            topology_id: scope,
            workers,
            running,
            fan_out,
        }
    }

    /// Distribution efficiency over completed tasks still in memory.
    /// Without any history the score is a perfect 1.0.
    pub fn efficiency(&self) -> DistributionReport {
        let done: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .collect();
        if done.is_empty() {
            return DistributionReport {
                time_efficiency: 1.0,
                resource_efficiency: 1.0,
                efficiency: 1.0,
                rebalanced: 0,
                reordered: false,
            };
        }
        let n = done.len() as f64;
        let avg_time = done.iter().map(|t| t.metrics.processing_time_ms as f64).sum::<f64>() / n;
        let avg_workers = done.iter().map(|t| t.assigned_workers.len() as f64).sum::<f64>() / n;
        let time_efficiency = (1.0 - avg_time / EFFICIENCY_HORIZON_MS).max(0.0);
        let resource_efficiency = (avg_workers / 3.0).min(1.0);
        DistributionReport {
            time_efficiency,
            resource_efficiency,
            efficiency: (time_efficiency + resource_efficiency) / 2.0,
            rebalanced: 0,
            reordered: false,
        }
    }

    /// Score distribution efficiency and, when it is poor, rebalance
    /// queued assignments and reorder the pending queue by priority.
    pub fn optimize_distribution(&mut self, registry: &WorkerRegistry, worker_capacity: usize) -> DistributionReport {
        let mut report = self.efficiency();
        let efficiency = report.efficiency;
        if efficiency >= REBALANCE_THRESHOLD {
            return report;
        }

        report.rebalanced = self.rebalance(registry, worker_capacity);
        let before = self.pending.clone();
        let tasks = &self.tasks;
        self.pending
            .sort_by_key(|id| Reverse(tasks.get(id).map(|t| t.priority).unwrap_or_default()));
        report.reordered = self.pending != before;
        info!(
            "Distribution efficiency {:.2}: rebalanced {}, reordered {}",
            efficiency, report.rebalanced, report.reordered
        );
        report
    }

    /// Move queued assignments off workers that are gone or saturated.
    fn rebalance(&mut self, registry: &WorkerRegistry, worker_capacity: usize) -> usize {
        let mut loads = self.loads();
        let mut moved = 0;
        let ids: Vec<TaskId> = self.active.clone();
        for id in ids {
            let Some(task) = self.tasks.get(&id) else {
                continue;
            };
            if !task.status.is_active() {
                continue;
            }
            let eligible: Vec<WorkerId> = eligible_workers(task, registry).iter().map(|w| w.id).collect();
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            let taken: HashSet<WorkerId> = task.assignments.iter().map(|a| a.worker_id).collect();
            for a in task.assignments.iter_mut().filter(|a| a.state == AssignmentState::Queued) {
                let current_load = loads.get(&a.worker_id).copied().unwrap_or(0);
                let gone = registry.get(&a.worker_id).map_or(true, |w| !w.status.is_schedulable());
                if !gone && current_load < worker_capacity {
                    continue;
                }
                let best = eligible
                    .iter()
                    .filter(|w| !taken.contains(w))
                    .min_by_key(|w| (loads.get(w).copied().unwrap_or(0), registry.rank(w)))
                    .copied();
                let Some(best) = best else {
                    continue;
                };
                if !gone && loads.get(&best).copied().unwrap_or(0) >= current_load {
                    continue;
                }
                trace!("rebalance {}: {} -> {}", id.short(), a.worker_id.short(), best.short());
                if let Some(l) = loads.get_mut(&a.worker_id) {
                    *l = l.saturating_sub(1);
                }
                *loads.entry(best).or_default() += 1;
                if let Some(slot) = task.assigned_workers.iter_mut().find(|w| **w == a.worker_id) {
                    *slot = best;
                }
                a.worker_id = best;
                moved += 1;
            }
        }
        moved
    }

    /// Export and drop terminal tasks older than `retention`.
    ///
    /// A task whose export fails stays in memory for the next pass.
    pub fn collect_garbage(
        &mut self,
        retention: Duration,
        store: &dyn DurableStore,
        now: DateTime<Utc>,
    ) -> Vec<TaskId> {
        let retention_ms = retention.as_millis() as u64;
        let expired: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status.is_finished() && !self.active.contains(&t.id))
            .filter(|t| t.end_time.is_some_and(|end| elapsed_ms(end, now) >= retention_ms))
            .map(|t| t.id)
            .collect();

        let mut removed = Vec::new();
        for id in expired {
            if let Err(e) = self.export(&id, store) {
                warn!("task {} not exported, keeping it: {}", id.short(), e);
                continue;
            }
            self.tasks.remove(&id);
            self.graph.remove(&id);
            removed.push(id);
        }
        if !removed.is_empty() {
            debug!("collected {} expired tasks", removed.len());
        }
        removed
    }

    /// Write a task's record to the durable store and return it.
    pub fn export(&self, id: &TaskId, store: &dyn DurableStore) -> Result<serde_json::Value> {
        let record = self.require(id)?.to_record()?;
        store.put(RecordKind::Task, &id.to_string(), record.clone())?;
        Ok(record)
    }

    /// Reinstate a task from an exported record.
    ///
    /// Finished tasks come back as they were. Unfinished ones lose their
    /// assignments and rejoin the pending queue.
    pub fn import(&mut self, record: serde_json::Value) -> Result<TaskId> {
        let mut task = Task::from_record(record)?;
        let id = task.id;
        if self.tasks.contains_key(&id) {
            return Err(Error::Validation(format!("task id {} is already in use", id)));
        }
        self.graph.add_task(id, &task.dependencies)?;
        if !task.status.is_finished() {
            task.status = TaskStatus::Pending;
            task.assignments.clear();
            task.assigned_workers.clear();
            task.progress = 0;
            self.pending.push(id);
            self.active.push(id);
        }
        if task.status == TaskStatus::Completed {
            self.completed.insert(id);
        }
        self.tasks.insert(id, task);
        Ok(id)
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("tasks", &self.tasks.len())
            .field("pending", &self.pending.len())
            .field("active", &self.active.len())
            .field("completed", &self.completed.len())
            .finish()
    }
}

fn refresh_metrics(task: &mut Task, host: Option<HostSample>, now: DateTime<Utc>) {
    task.refresh_processing_time(now);
    if let (Some(host), false) = (host, task.status.is_finished()) {
        task.metrics.resource_usage.cpu_percent = host.cpu_utilization;
        task.metrics.resource_usage.memory_percent = host.memory_utilization;
    }
}

fn dispatches_for(task: &Task, workers: &[WorkerId]) -> Vec<Dispatch> {
    workers
        .iter()
        .map(|w| Dispatch {
            task_id: task.id,
            worker_id: *w,
            payload: task.payload.clone(),
            attempt: task.retry_count,
        })
        .collect()
}

/// Live, schedulable workers a task may run on.
///
/// Capability-based tasks prefer workers meeting every requirement and
/// fall back to partial matches; a task nothing can serve gets no
/// candidates.
fn eligible_workers<'a>(task: &Task, registry: &'a WorkerRegistry) -> Vec<&'a Worker> {
    let base: Vec<&Worker> = registry
        .live()
        .filter(|w| w.status.is_schedulable())
        .filter(|w| task.topology_id.map_or(true, |t| w.swarm_id == t))
        .collect();
    if task.selection != SelectionPolicy::CapabilityBased || task.requirements.is_empty() {
        return base;
    }
    let full: Vec<&Worker> = base
        .iter()
        .copied()
        .filter(|w| w.requirement_score(&task.requirements) == task.requirements.len())
        .collect();
    if !full.is_empty() {
        return full;
    }
    base.into_iter()
        .filter(|w| w.requirement_score(&task.requirements) > 0)
        .collect()
}

fn select_workers(task: &Task, registry: &mut WorkerRegistry, loads: &HashMap<WorkerId, usize>) -> Vec<WorkerId> {
    let limit = match task.strategy {
        DistributionStrategy::Sequential => 1 + SEQUENTIAL_FALLBACKS,
        other => other.max_concurrency(task.priority),
    };
    let load = |w: &Worker| loads.get(&w.id).copied().unwrap_or(0);

    let mut candidates = eligible_workers(task, registry);
    match task.selection {
        SelectionPolicy::PerformanceBased => candidates.sort_by(|a, b| {
            b.performance
                .success_rate
                .total_cmp(&a.performance.success_rate)
                .then(b.performance.tasks_completed.cmp(&a.performance.tasks_completed))
                .then(
                    a.performance
                        .avg_response_time_ms
                        .total_cmp(&b.performance.avg_response_time_ms),
                )
        }),
        SelectionPolicy::LoadBalanced => candidates.sort_by_key(|w| load(w)),
        SelectionPolicy::CapabilityBased => {
            candidates.sort_by_key(|w| (Reverse(w.requirement_score(&task.requirements)), load(w)))
        }
        SelectionPolicy::RoundRobin => {}
    }
    let ids: Vec<WorkerId> = candidates.iter().map(|w| w.id).collect();
    if task.selection == SelectionPolicy::RoundRobin {
        return registry.round_robin(&ids, limit);
    }
    ids.into_iter().take(limit).collect()
}
