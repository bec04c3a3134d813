//! The swarm coordinator.
//!
//! `Swarm` is the single writer over workers, topologies and tasks. Every
//! operation takes `&mut self` and reads its timestamp from the injected
//! clock, so callers serialize access by owning it (the service actor
//! does) and tests drive it directly.
//!
//! Launches and shutdowns may block, so the operations that need them come
//! in two shapes: a plan/commit pair that leaves the blocking part to the
//! caller, and a convenience that runs it inline with the configured
//! launcher. Work to execute is never run here either; it collects in an
//! outbox the caller drains with [`Swarm::drain_dispatches`] and answers
//! with [`Swarm::report_outcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::core::bottleneck::BottleneckReport;
use crate::core::task::{Task, TaskId, TaskSpec, TaskStatus};
use crate::core::topology::{placement_plan, Topology, TopologyId, TopologyKind, TopologyStrategy};
use crate::core::worker::{MetricsDelta, Worker, WorkerConfig, WorkerId, WorkerStatus};
use crate::error::{Error, Result};
use crate::external::{
    launch_batch, Dispatch, DurableStore, ExecutionOutcome, MemoryStore, MetricsSource, NoopLauncher,
    NullMetrics, WorkerLauncher,
};
use crate::orchestration::{
    Detection, DistributionReport, InitPlan, OptimizationRecommendation, OutcomeReport,
    PerformanceMonitor, PerformanceSignals, SwitchOutcome, SwitchPlan, TaskProgress, TaskScheduler,
    TopologyManager, WorkerFilter, WorkerRegistry, WorkloadHint,
};

/// External collaborators the coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub launcher: Arc<dyn WorkerLauncher>,
    pub metrics: Arc<dyn MetricsSource>,
    pub store: Arc<dyn DurableStore>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            launcher: Arc::new(NoopLauncher),
            metrics: Arc::new(NullMetrics),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Collaborators {
    pub fn with_launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Lifecycle notifications, sent on the optional event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SwarmEvent {
    WorkerSpawned {
        worker_id: WorkerId,
        topology_id: TopologyId,
    },
    WorkerTerminated {
        worker_id: WorkerId,
    },
    TopologySwitched {
        topology_id: TopologyId,
        from: TopologyKind,
        to: TopologyKind,
    },
    /// Waiting on dependencies or on an eligible worker.
    TaskQueued {
        task_id: TaskId,
        unresolved: Vec<TaskId>,
    },
    /// Work handed to one or more workers.
    TaskStarted {
        task_id: TaskId,
        workers: Vec<WorkerId>,
    },
    TaskCompleted {
        task_id: TaskId,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    TaskCancelled {
        task_id: TaskId,
    },
    TaskRetrying {
        task_id: TaskId,
        attempt: u32,
    },
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tasks that reached a terminal status since the previous tick.
    pub finished: Vec<TaskId>,
    /// Dispatches queued by this tick.
    pub dispatched: usize,
    pub retried: Vec<TaskId>,
    pub cancelled: Vec<TaskId>,
    /// Tasks exported and dropped after their retention window.
    pub collected: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownFailure {
    pub worker_id: WorkerId,
    pub error: String,
}

/// Result of a bulk teardown. Individual failures are collected, not raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownSummary {
    pub topology_id: TopologyId,
    pub terminated: Vec<WorkerId>,
    pub failures: Vec<TeardownFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub generated_at: DateTime<Utc>,
    pub topologies: usize,
    /// Live workers by status.
    pub workers: BTreeMap<String, usize>,
    /// Tasks in memory by status.
    pub tasks: BTreeMap<String, usize>,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub distribution: DistributionReport,
    pub bottlenecks: BottleneckReport,
    pub health_score: u8,
}

pub struct Swarm {
    config: Config,
    registry: WorkerRegistry,
    topologies: TopologyManager,
    scheduler: TaskScheduler,
    monitor: PerformanceMonitor,
    collaborators: Collaborators,
    events: Option<mpsc::UnboundedSender<SwarmEvent>>,
    dispatches: Vec<Dispatch>,
    /// Workers removed from the registry whose backing resource still has
    /// to be shut down.
    retired: Vec<Worker>,
    last_report: Option<BottleneckReport>,
}

impl Swarm {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let registry = WorkerRegistry::new(collaborators.store.clone());
        let scheduler = TaskScheduler::new(config.default_max_retries);
        let monitor = PerformanceMonitor::new(config.thresholds.clone(), config.worker_capacity);
        Self {
            config,
            registry,
            topologies: TopologyManager::new(),
            scheduler,
            monitor,
            collaborators,
            events: None,
            dispatches: Vec::new(),
            retired: Vec::new(),
            last_report: None,
        }
    }

    /// Send lifecycle events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SwarmEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn topologies(&self) -> &TopologyManager {
        &self.topologies
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.collaborators.clock.now()
    }

    /// Detection parameters built from the configuration.
    pub fn default_detection(&self) -> Detection {
        Detection {
            time_window: self.config.stall_window(),
            ..Detection::default()
        }
    }

    /// Dispatches queued since the last drain, in order.
    pub fn drain_dispatches(&mut self) -> Vec<Dispatch> {
        std::mem::take(&mut self.dispatches)
    }

    /// Workers awaiting a launcher shutdown.
    pub fn drain_retired(&mut self) -> Vec<Worker> {
        std::mem::take(&mut self.retired)
    }

    /// Shut down every retired worker with the configured launcher.
    ///
    /// Failures are logged; the workers are already gone from the registry.
    pub fn shutdown_retired(&mut self) -> Vec<(WorkerId, Result<()>)> {
        self.drain_retired()
            .into_iter()
            .map(|worker| {
                let result = self.collaborators.launcher.shutdown(&worker);
                if let Err(e) = &result {
                    warn!("shutdown of worker {} failed: {}", worker.name, e);
                }
                (worker.id, result)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Topologies
    // ------------------------------------------------------------------

    /// Plan a topology. Launch `plan.workers`, then call [`Swarm::commit_init`].
    pub fn plan_init(
        &self,
        kind: TopologyKind,
        max_workers: usize,
        strategy: TopologyStrategy,
        memory_enabled: bool,
    ) -> Result<InitPlan> {
        self.topologies
            .plan_init(&self.registry, kind, max_workers, strategy, memory_enabled, self.now())
    }

    /// Register a planned topology's launched workers.
    ///
    /// Either every worker is registered or none is.
    pub fn commit_init(&mut self, plan: InitPlan) -> Result<Topology> {
        let now = self.now();
        let InitPlan { topology, workers } = plan;
        let mut registered: Vec<WorkerId> = Vec::with_capacity(workers.len());
        for worker in workers {
            let id = worker.id;
            if let Err(e) = self.registry.register(worker) {
                for done in &registered {
                    if let Err(e) = self.registry.terminate(done, now) {
                        warn!("rollback of worker {} failed: {}", done.short(), e);
                    }
                }
                return Err(e);
            }
            registered.push(id);
        }
        let topology_id = topology.id;
        self.topologies.commit_init(topology, registered.clone());
        for worker_id in registered {
            self.emit(SwarmEvent::WorkerSpawned { worker_id, topology_id });
        }
        self.sweep(now);
        Ok(self.topologies.get(&topology_id)?.clone())
    }

    /// Build a topology, launching its workers inline.
    pub fn init_topology(
        &mut self,
        kind: TopologyKind,
        max_workers: usize,
        strategy: TopologyStrategy,
        memory_enabled: bool,
    ) -> Result<Topology> {
        let mut plan = self.plan_init(kind, max_workers, strategy, memory_enabled)?;
        plan.workers = launch_batch(self.collaborators.launcher.as_ref(), plan.workers)?;
        self.commit_init(plan)
    }

    /// Start a switch. The topology is busy until commit or abort.
    pub fn plan_switch(&mut self, id: &TopologyId, new_kind: TopologyKind) -> Result<SwitchPlan> {
        let now = self.now();
        self.topologies.begin_switch(&self.registry, id, new_kind, now)
    }

    /// Apply a switch once `plan.spawn` has been launched.
    ///
    /// Retired members are queued for shutdown (see [`Swarm::drain_retired`]).
    /// On error the switch is aborted and every launched worker is queued
    /// for shutdown instead.
    pub fn commit_switch(&mut self, plan: SwitchPlan) -> Result<SwitchOutcome> {
        let now = self.now();
        let mut spawned = Vec::with_capacity(plan.spawn.len());
        let mut failure = plan
            .reshape
            .iter()
            .find(|(id, _)| !self.registry.contains(id))
            .map(|(id, _)| Error::WorkerNotFound { id: *id });
        if failure.is_none() {
            for worker in &plan.spawn {
                if let Err(e) = self.registry.register(worker.clone()) {
                    failure = Some(e);
                    break;
                }
                spawned.push(worker.id);
            }
        }
        if failure.is_none() {
            for (worker_id, slot) in &plan.reshape {
                if let Err(e) = self.registry.reshape(worker_id, slot, now) {
                    failure = Some(e);
                    break;
                }
            }
        }
        let adjacency = match failure {
            Some(e) => Err(e),
            None => self.topologies.commit_switch(&plan, now),
        };
        let adjacency = match adjacency {
            Ok(adjacency) => adjacency,
            Err(e) => {
                self.rollback_switch(&plan, &spawned, now);
                return Err(e);
            }
        };
        self.rewire(adjacency);

        let mut terminated = Vec::with_capacity(plan.retire.len());
        for worker_id in &plan.retire {
            match self.retire_worker(worker_id) {
                Ok(_) => terminated.push(*worker_id),
                Err(e) => warn!("retiring {} during switch failed: {}", worker_id.short(), e),
            }
        }
        for worker_id in &spawned {
            self.emit(SwarmEvent::WorkerSpawned {
                worker_id: *worker_id,
                topology_id: plan.topology_id,
            });
        }
        self.emit(SwarmEvent::TopologySwitched {
            topology_id: plan.topology_id,
            from: plan.previous_kind,
            to: plan.new_kind,
        });
        self.sweep(now);

        Ok(SwitchOutcome {
            topology_id: plan.topology_id,
            previous_kind: plan.previous_kind,
            new_kind: plan.new_kind,
            reshaped: plan.reshape.iter().map(|(id, _)| *id).collect(),
            spawned,
            terminated,
        })
    }

    /// Release a switch whose launches failed.
    pub fn abort_switch(&mut self, plan: &SwitchPlan) {
        self.topologies.abort_switch(&plan.topology_id);
    }

    fn rollback_switch(&mut self, plan: &SwitchPlan, spawned: &[WorkerId], now: DateTime<Utc>) {
        for worker in &plan.spawn {
            if spawned.contains(&worker.id) {
                if let Err(e) = self.registry.terminate(&worker.id, now) {
                    warn!("rollback of worker {} failed: {}", worker.id.short(), e);
                }
            }
            self.retired.push(worker.clone());
        }
        self.topologies.abort_switch(&plan.topology_id);
        warn!(
            "switch of {} to {} rolled back",
            plan.topology_id.short(),
            plan.new_kind
        );
    }

    /// Switch a topology to `new_kind`, launching and shutting down inline.
    pub fn switch_topology(&mut self, id: &TopologyId, new_kind: TopologyKind) -> Result<SwitchOutcome> {
        let mut plan = self.plan_switch(id, new_kind)?;
        match launch_batch(self.collaborators.launcher.as_ref(), std::mem::take(&mut plan.spawn)) {
            Ok(launched) => plan.spawn = launched,
            Err(e) => {
                self.abort_switch(&plan);
                return Err(e);
            }
        }
        let outcome = self.commit_switch(plan);
        self.shutdown_retired();
        outcome
    }

    /// Recommend a topology kind from a bottleneck report (detected fresh
    /// when none is given). Never mutates topology state.
    pub fn recommend_topology(
        &mut self,
        id: &TopologyId,
        report: Option<BottleneckReport>,
        hint: Option<WorkloadHint>,
    ) -> Result<OptimizationRecommendation> {
        let topology = self.topologies.get(id)?;
        let signals = PerformanceSignals::from_workers(
            topology.members.iter().filter_map(|m| self.registry.get(m)),
        );
        let report = match report {
            Some(report) => report,
            None => self.detect_bottlenecks(Some(*id), self.default_detection())?,
        };
        self.topologies.recommend(id, &report, signals, hint)
    }

    /// Recommend a kind and, with `auto_apply`, switch to it when it differs.
    pub fn optimize_topology(
        &mut self,
        id: &TopologyId,
        report: Option<BottleneckReport>,
        hint: Option<WorkloadHint>,
        auto_apply: bool,
    ) -> Result<OptimizationRecommendation> {
        let mut recommendation = self.recommend_topology(id, report, hint)?;
        if auto_apply && recommendation.changes_kind() {
            self.switch_topology(id, recommendation.recommended_kind)?;
            recommendation.applied = true;
        }
        info!(
            "Topology {} optimize: {} -> {} (score {}, applied {})",
            id.short(),
            recommendation.current_kind,
            recommendation.recommended_kind,
            recommendation.performance_score,
            recommendation.applied
        );
        Ok(recommendation)
    }

    /// Plan one more elastic worker for an adaptive topology. `None` when
    /// the topology is not adaptive or has no room.
    pub fn plan_scale(&mut self, id: &TopologyId) -> Result<Option<Worker>> {
        let now = self.now();
        self.topologies.plan_scale(&self.registry, id, now)
    }

    /// Grow an adaptive topology by one worker, launching inline.
    pub fn smart_scale(&mut self, id: &TopologyId) -> Result<Option<Worker>> {
        let Some(worker) = self.plan_scale(id)? else {
            return Ok(None);
        };
        if let Err(e) = self.collaborators.launcher.launch(&worker) {
            self.topologies.release_slot(id);
            return Err(e);
        }
        self.commit_spawn(worker).map(Some)
    }

    /// Detach a topology and retire its members for shutdown.
    ///
    /// The returned workers are out of the registry; shutting them down is
    /// the caller's job.
    pub fn begin_teardown(&mut self, id: &TopologyId) -> Result<Vec<Worker>> {
        let topology = self.topologies.remove(id)?;
        let queued = self.retired.len();
        let mut workers = Vec::with_capacity(topology.members.len());
        for member in &topology.members {
            match self.retire_worker(member) {
                Ok(worker) => workers.push(worker),
                Err(e) => warn!("teardown: worker {} not retired: {}", member.short(), e),
            }
        }
        // Shutdowns belong to the teardown caller, not the retired queue.
        self.retired.truncate(queued);
        Ok(workers)
    }

    /// Tear a topology down, shutting every member down inline.
    pub fn teardown_topology(&mut self, id: &TopologyId) -> Result<TeardownSummary> {
        let workers = self.begin_teardown(id)?;
        let mut summary = TeardownSummary {
            topology_id: *id,
            terminated: Vec::new(),
            failures: Vec::new(),
        };
        for worker in workers {
            match self.collaborators.launcher.shutdown(&worker) {
                Ok(()) => summary.terminated.push(worker.id),
                Err(e) => summary.failures.push(TeardownFailure {
                    worker_id: worker.id,
                    error: e.to_string(),
                }),
            }
        }
        info!(
            "Topology {} torn down: {} terminated, {} failed",
            id.short(),
            summary.terminated.len(),
            summary.failures.len()
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    /// Reserve a slot and prepare a worker. Launch it, then call
    /// [`Swarm::commit_spawn`] (or [`Swarm::abort_spawn`] on failure).
    pub fn plan_spawn(&mut self, config: WorkerConfig) -> Result<Worker> {
        self.topologies.reserve_slot(&config.topology_id)?;
        Ok(self.registry.prepare(config, self.now()))
    }

    pub fn commit_spawn(&mut self, worker: Worker) -> Result<Worker> {
        let now = self.now();
        let topology_id = worker.swarm_id;
        if let Err(e) = self.registry.register(worker.clone()) {
            self.topologies.release_slot(&topology_id);
            return Err(e);
        }
        let adjacency = match self.topologies.add_member(&topology_id, worker.id, now) {
            Ok(adjacency) => adjacency,
            Err(e) => {
                if let Err(rollback) = self.registry.terminate(&worker.id, now) {
                    warn!("rollback of worker {} failed: {}", worker.id.short(), rollback);
                }
                return Err(e);
            }
        };
        self.rewire(adjacency);
        self.emit(SwarmEvent::WorkerSpawned {
            worker_id: worker.id,
            topology_id,
        });
        self.sweep(now);
        self.registry.require(&worker.id).cloned()
    }

    pub fn abort_spawn(&mut self, topology_id: &TopologyId) {
        self.topologies.release_slot(topology_id);
    }

    /// Spawn a worker into a topology, launching inline.
    ///
    /// # Errors
    ///
    /// `TopologyFull`, `TopologyBusy`, or the launcher's error; the worker
    /// is never partially registered.
    pub fn spawn_worker(&mut self, config: WorkerConfig) -> Result<Worker> {
        let topology_id = config.topology_id;
        let worker = self.plan_spawn(config)?;
        if let Err(e) = self.collaborators.launcher.launch(&worker) {
            self.abort_spawn(&topology_id);
            return Err(e);
        }
        self.commit_spawn(worker)
    }

    /// Remove a worker from the registry and its topology, fail over its
    /// in-flight work, and queue it for shutdown.
    ///
    /// # Errors
    ///
    /// `WorkerNotFound`, or `TopologyBusy` while the worker's topology is
    /// being switched.
    pub fn retire_worker(&mut self, id: &WorkerId) -> Result<Worker> {
        let now = self.now();
        let topology_id = self.registry.require(id)?.swarm_id;
        if self.topologies.is_busy(&topology_id) {
            return Err(Error::TopologyBusy(topology_id));
        }
        let was_hub = self
            .topologies
            .get(&topology_id)
            .is_ok_and(|t| t.kind.has_hub() && t.members.first() == Some(id));
        let worker = self.registry.terminate(id, now)?;
        let adjacency = self.topologies.remove_member(&worker.swarm_id, id, now);
        if was_hub {
            self.promote_hub(&worker.swarm_id, now);
        }
        self.rewire(adjacency);
        for (task_id, report) in self.scheduler.worker_lost(id, now) {
            self.settle(task_id, report, now);
        }
        self.emit(SwarmEvent::WorkerTerminated { worker_id: *id });
        self.retired.push(worker.clone());
        self.sync_worker_status(now);
        Ok(worker)
    }

    /// Terminate a worker and shut it down inline.
    pub fn terminate_worker(&mut self, id: &WorkerId) -> Result<Worker> {
        let worker = self.retire_worker(id)?;
        self.shutdown_retired();
        Ok(worker)
    }

    pub fn get_worker(&self, id: &WorkerId) -> Result<Worker> {
        self.registry.require(id).cloned()
    }

    pub fn list_workers(&self, filter: &WorkerFilter) -> Result<Vec<Worker>> {
        self.registry.list(filter)
    }

    pub fn update_worker_metrics(&mut self, id: &WorkerId, delta: &MetricsDelta) -> Result<Worker> {
        let now = self.now();
        self.registry.update_metrics(id, delta, now).cloned()
    }

    /// Set a worker's status. Moving to an absorbing status fails over
    /// its work; `Terminated` also retires it.
    pub fn set_worker_status(&mut self, id: &WorkerId, status: WorkerStatus) -> Result<Worker> {
        let now = self.now();
        if status == WorkerStatus::Terminated {
            let current = self.registry.require(id)?.status;
            if current.is_absorbing() {
                return Err(Error::InvalidTransition {
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }
            return self.retire_worker(id);
        }
        let worker = self.registry.set_status(id, status, now)?;
        if status == WorkerStatus::Error {
            warn!("Worker {} marked as errored", worker.name);
            for (task_id, report) in self.scheduler.worker_lost(id, now) {
                self.settle(task_id, report, now);
            }
            self.sync_worker_status(now);
        }
        Ok(worker)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Submit a task. It starts right away when its dependencies are met
    /// and a worker is eligible; otherwise it is queued.
    pub fn orchestrate_task(&mut self, spec: TaskSpec) -> Result<TaskProgress> {
        if let Some(topology_id) = spec.topology_id {
            self.topologies.get(&topology_id)?;
        }
        let now = self.now();
        let id = self.scheduler.submit(spec, now)?;
        let dispatches = self.scheduler.try_start(&id, &mut self.registry, now)?;
        self.absorb(dispatches);
        self.sync_worker_status(now);

        let progress = self.monitor_task(&id)?;
        if progress.status == TaskStatus::Pending {
            self.emit(SwarmEvent::TaskQueued {
                task_id: id,
                unresolved: progress.unresolved.clone(),
            });
        }
        Ok(progress)
    }

    /// Cancel a task. `Ok(false)` when it already finished.
    pub fn cancel_task(&mut self, id: &TaskId) -> Result<bool> {
        let now = self.now();
        let cancelled = self.scheduler.cancel(id, now)?;
        if cancelled {
            self.emit(SwarmEvent::TaskCancelled { task_id: *id });
            self.dispatches.retain(|d| d.task_id != *id);
            self.sync_worker_status(now);
        }
        Ok(cancelled)
    }

    pub fn monitor_task(&mut self, id: &TaskId) -> Result<TaskProgress> {
        let host = self.collaborators.metrics.sample_host();
        let now = self.now();
        self.scheduler.monitor(id, host, now)
    }

    /// Fold an execution outcome back in: worker metrics, failover,
    /// completion, dependents, and automatic retry when configured.
    pub fn report_outcome(
        &mut self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        outcome: ExecutionOutcome,
    ) -> Result<OutcomeReport> {
        let now = self.now();
        let report = self.scheduler.record_outcome(task_id, worker_id, outcome, now)?;
        if let Some((worker, delta)) = &report.worker_delta {
            if self.registry.contains(worker) {
                self.registry.update_metrics(worker, delta, now)?;
            }
        }
        self.settle(*task_id, report.clone(), now);
        self.sync_worker_status(now);
        Ok(report)
    }

    /// Resubmit a failed task that has retries left.
    pub fn retry_task(&mut self, id: &TaskId) -> Result<TaskProgress> {
        let now = self.now();
        self.retry_inner(id, now)?;
        self.sync_worker_status(now);
        self.monitor_task(id)
    }

    pub fn get_task(&self, id: &TaskId) -> Result<Task> {
        self.scheduler.require(id).cloned()
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        self.scheduler.list(status).into_iter().cloned().collect()
    }

    /// Write a task's record to the durable store and return it.
    pub fn export_task(&self, id: &TaskId) -> Result<serde_json::Value> {
        self.scheduler.export(id, self.collaborators.store.as_ref())
    }

    /// Reinstate an exported task; unfinished ones are rescheduled.
    pub fn import_task(&mut self, record: serde_json::Value) -> Result<TaskId> {
        let now = self.now();
        let id = self.scheduler.import(record)?;
        let dispatches = self.scheduler.try_start(&id, &mut self.registry, now)?;
        self.absorb(dispatches);
        self.sync_worker_status(now);
        Ok(id)
    }

    pub fn optimize_distribution(&mut self) -> DistributionReport {
        self.scheduler
            .optimize_distribution(&self.registry, self.monitor.worker_capacity())
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    /// Analyze the workload of one topology (or of everything).
    pub fn detect_bottlenecks(&mut self, topology: Option<TopologyId>, detection: Detection) -> Result<BottleneckReport> {
        if let Some(id) = &topology {
            self.topologies.get(id)?;
        }
        let snapshot = self.scheduler.snapshot(&self.registry, topology);
        let host = self.collaborators.metrics.sample_host();
        let network = self.collaborators.metrics.sample_network();
        let report = self.monitor.analyze(&snapshot, detection, host, network, self.now());
        self.last_report = Some(report.clone());
        Ok(report)
    }

    pub fn last_report(&self) -> Option<&BottleneckReport> {
        self.last_report.as_ref()
    }

    pub fn performance_summary(&mut self) -> Result<PerformanceSummary> {
        let bottlenecks = self.detect_bottlenecks(None, self.default_detection())?;
        let mut workers: BTreeMap<String, usize> = BTreeMap::new();
        for worker in self.registry.live() {
            *workers.entry(worker.status.to_string()).or_default() += 1;
        }
        let mut tasks: BTreeMap<String, usize> = BTreeMap::new();
        for task in self.scheduler.list(None) {
            *tasks.entry(task.status.to_string()).or_default() += 1;
        }
        let signals = PerformanceSignals::from_workers(self.registry.live());
        Ok(PerformanceSummary {
            generated_at: self.now(),
            topologies: self.topologies.list().len(),
            workers,
            tasks,
            avg_response_time_ms: signals.avg_response_time_ms,
            success_rate: signals.success_rate,
            distribution: self.scheduler.efficiency(),
            health_score: bottlenecks.health_score,
            bottlenecks,
        })
    }

    /// One scheduler tick.
    ///
    /// Refreshes every watched task, releases dependents of completed
    /// ones, grows adaptive tasks, retries or cancels as configured, sweeps
    /// the pending queue and collects expired tasks.
    pub fn tick(&mut self) -> TickReport {
        let now = self.now();
        let host = self.collaborators.metrics.sample_host();
        let queued_before = self.dispatches.len();
        let mut report = TickReport {
            finished: self.scheduler.monitor_pass(host, now),
            ..TickReport::default()
        };

        for id in report.finished.clone() {
            if self.scheduler.is_completed(&id) {
                let dispatches = self.scheduler.process_dependents(&id, &mut self.registry, now);
                self.absorb(dispatches);
            }
        }

        let expanded = self
            .scheduler
            .expand_adaptive(self.config.adaptive_expand_after(), now);
        self.absorb(expanded);

        if self.config.auto_retry {
            for id in self.scheduler.retryable() {
                match self.retry_inner(&id, now) {
                    Ok(()) => report.retried.push(id),
                    Err(e) => warn!("auto retry of {} failed: {}", id.short(), e),
                }
            }
        }

        if self.config.auto_cancel_stalled {
            for id in self.scheduler.overdue(self.config.stall_window() * 2, now) {
                if let Ok(true) = self.scheduler.cancel(&id, now) {
                    warn!("Task {} cancelled after stalling", id.short());
                    self.emit(SwarmEvent::TaskCancelled { task_id: id });
                    self.dispatches.retain(|d| d.task_id != id);
                    report.cancelled.push(id);
                }
            }
        }

        self.sweep(now);
        report.collected = self.scheduler.collect_garbage(
            self.config.task_retention(),
            self.collaborators.store.as_ref(),
            now,
        );
        self.sync_worker_status(now);
        report.dispatched = self.dispatches.len().saturating_sub(queued_before);
        debug!(
            "tick: finished={} dispatched={} retried={} cancelled={} collected={}",
            report.finished.len(),
            report.dispatched,
            report.retried.len(),
            report.cancelled.len(),
            report.collected.len()
        );
        report
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn retry_inner(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<()> {
        let dispatches = self.scheduler.retry(id, &mut self.registry, now)?;
        let attempt = self.scheduler.require(id)?.retry_count;
        self.emit(SwarmEvent::TaskRetrying { task_id: *id, attempt });
        self.absorb(dispatches);
        Ok(())
    }

    /// Queue failover dispatches and react to a task finishing.
    fn settle(&mut self, task_id: TaskId, report: OutcomeReport, now: DateTime<Utc>) {
        self.absorb(report.dispatches);
        match report.finished {
            Some(TaskStatus::Completed) => {
                self.emit(SwarmEvent::TaskCompleted { task_id });
                let dispatches = self.scheduler.process_dependents(&task_id, &mut self.registry, now);
                self.absorb(dispatches);
            }
            Some(TaskStatus::Failed) => {
                let error = self
                    .scheduler
                    .get(&task_id)
                    .and_then(|t| t.error.clone())
                    .unwrap_or_default();
                self.emit(SwarmEvent::TaskFailed { task_id, error });
                let retryable = self.scheduler.get(&task_id).is_some_and(|t| t.can_retry());
                if self.config.auto_retry && retryable {
                    if let Err(e) = self.retry_inner(&task_id, now) {
                        warn!("auto retry of {} failed: {}", task_id.short(), e);
                    }
                }
            }
            _ => {}
        }
    }

    fn sweep(&mut self, now: DateTime<Utc>) {
        let dispatches = self.scheduler.sweep_pending(&mut self.registry, now);
        self.absorb(dispatches);
        self.sync_worker_status(now);
    }

    fn absorb(&mut self, dispatches: Vec<Dispatch>) {
        if dispatches.is_empty() {
            return;
        }
        let mut by_task: Vec<(TaskId, Vec<WorkerId>)> = Vec::new();
        for d in &dispatches {
            match by_task.iter_mut().find(|(t, _)| *t == d.task_id) {
                Some((_, workers)) => workers.push(d.worker_id),
                None => by_task.push((d.task_id, vec![d.worker_id])),
            }
        }
        for (task_id, workers) in by_task {
            self.emit(SwarmEvent::TaskStarted { task_id, workers });
        }
        self.dispatches.extend(dispatches);
    }

    /// Give the topology's new first member the hub slot of its kind.
    fn promote_hub(&mut self, topology_id: &TopologyId, now: DateTime<Utc>) {
        let (successor, slot) = match self.topologies.get(topology_id) {
            Ok(t) => match (
                t.members.first().copied(),
                placement_plan(t.kind, t.max_workers).into_iter().next(),
            ) {
                (Some(successor), Some(slot)) => (successor, slot),
                _ => return,
            },
            Err(_) => return,
        };
        match self.registry.reshape(&successor, &slot, now) {
            Ok(()) => info!(
                "Worker {} promoted to {} of topology {}",
                successor.short(),
                slot.role,
                topology_id.short()
            ),
            Err(e) => warn!("hub promotion of {} failed: {}", successor.short(), e),
        }
    }

    fn rewire(&mut self, adjacency: Vec<(WorkerId, Vec<WorkerId>)>) {
        for (worker, neighbors) in adjacency {
            self.registry.set_neighbors(&worker, neighbors);
        }
    }

    fn sync_worker_status(&mut self, now: DateTime<Utc>) {
        let loads = self.scheduler.loads();
        let ids: Vec<WorkerId> = self.registry.live().map(|w| w.id).collect();
        for id in ids {
            let load = loads.get(&id).copied().unwrap_or(0);
            self.registry.sync_load_status(&id, load, now);
        }
    }

    fn emit(&self, event: SwarmEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("registry", &self.registry)
            .field("topologies", &self.topologies)
            .field("scheduler", &self.scheduler)
            .field("queued_dispatches", &self.dispatches.len())
            .finish()
    }
}
