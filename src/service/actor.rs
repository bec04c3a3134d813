//! The swarm service loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::core::task::TaskId;
use crate::core::topology::{TopologyId, TopologyKind};
use crate::core::worker::Worker;
use crate::error::{Error, Result};
use crate::external::{Dispatch, WorkerExecutor, WorkerLauncher};
use crate::orchestration::SwitchPlan;
use crate::swarm::{Swarm, TeardownFailure, TeardownSummary, TickReport};
use crate::util::{launch_with_timeout, shutdown_with_timeout};

use super::command::{Command, SpawnReply, SwitchReply};
use super::SwarmHandle;

/// Owns a [`Swarm`] on a tokio task and serves it through a mailbox.
pub struct SwarmService {
    swarm: Swarm,
    executor: Arc<dyn WorkerExecutor>,
    interval: Duration,
    launch_timeout: Duration,
}

impl SwarmService {
    pub fn new(swarm: Swarm, executor: Arc<dyn WorkerExecutor>) -> Self {
        let interval = swarm.config().monitor_interval();
        let launch_timeout = swarm.config().launch_timeout();
        Self {
            swarm,
            executor,
            interval,
            launch_timeout,
        }
    }

    /// Override the tick interval from the configuration.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    pub fn spawn(self) -> SwarmHandle {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        debug!("SwarmService::spawn interval={:?}", self.interval);

        let mut actor = Actor {
            swarm: self.swarm,
            executor: self.executor,
            tx: tx.clone(),
            cancel: cancel.clone(),
            executions: HashMap::new(),
            launch_timeout: self.launch_timeout,
        };
        let period = self.interval;
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("SwarmService cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = actor.swarm.tick();
                        actor.after_tick(&report);
                    }
                    command = rx.recv() => {
                        let Some(command) = command else {
                            debug!("SwarmService: mailbox closed");
                            break;
                        };
                        actor.handle(command);
                    }
                }
                actor.pump();
            }

            for (_, token) in actor.executions.drain() {
                token.cancel();
            }
            info!("SwarmService stopped");
        });

        SwarmHandle::new(tx, cancel)
    }
}

struct Actor {
    swarm: Swarm,
    executor: Arc<dyn WorkerExecutor>,
    /// Mailbox sender, for results of off-loop work.
    tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    /// One token per task with executions in flight.
    executions: HashMap<TaskId, CancellationToken>,
    launch_timeout: Duration,
}

impl Actor {
    fn handle(&mut self, command: Command) {
        match command {
            Command::InitTopology {
                kind,
                max_workers,
                strategy,
                memory_enabled,
                reply,
            } => match self.swarm.plan_init(kind, max_workers, strategy, memory_enabled) {
                Ok(mut plan) => {
                    let workers = std::mem::take(&mut plan.workers);
                    let tx = self.tx.clone();
                    let launcher = self.swarm.collaborators().launcher.clone();
                    let timeout = self.launch_timeout;
                    tokio::spawn(async move {
                        let launched = launch_with_timeout(launcher, workers, timeout).await;
                        let _ = tx.send(Command::InitLaunched { plan, launched, reply });
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::InitLaunched {
                mut plan,
                launched,
                reply,
            } => {
                let result = launched.and_then(|workers| {
                    plan.workers = workers;
                    self.swarm.commit_init(plan)
                });
                let _ = reply.send(result);
            }
            Command::SwitchTopology { id, kind, reply } => {
                self.start_switch(id, kind, SwitchReply::Switch(reply));
            }
            Command::OptimizeTopology {
                id,
                report,
                hint,
                auto_apply,
                reply,
            } => match self.swarm.recommend_topology(&id, report, hint) {
                Ok(recommendation) if auto_apply && recommendation.changes_kind() => {
                    let kind = recommendation.recommended_kind;
                    self.start_switch(id, kind, SwitchReply::Optimize(recommendation, reply));
                }
                result => {
                    let _ = reply.send(result);
                }
            },
            Command::SwitchLaunched { plan, launched, reply } => self.finish_switch(plan, launched, reply),
            Command::SmartScale { id, reply } => match self.swarm.plan_scale(&id) {
                Ok(Some(worker)) => self.launch_worker(worker, SpawnReply::Scale(reply)),
                result => {
                    let _ = reply.send(result);
                }
            },
            Command::SpawnWorker { config, reply } => match self.swarm.plan_spawn(config) {
                Ok(worker) => self.launch_worker(worker, SpawnReply::Spawn(reply)),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::SpawnLaunched {
                worker,
                launched,
                reply,
            } => {
                // commit_spawn releases the reserved slot itself
                let result = match launched.map(|mut workers| workers.pop()) {
                    Ok(Some(launched)) => self.swarm.commit_spawn(launched),
                    Ok(None) => {
                        self.swarm.abort_spawn(&worker.swarm_id);
                        Err(Error::Spawn(format!("launch of {} returned nothing", worker.name)))
                    }
                    Err(e) => {
                        self.swarm.abort_spawn(&worker.swarm_id);
                        Err(e)
                    }
                };
                match reply {
                    SpawnReply::Spawn(reply) => {
                        let _ = reply.send(result);
                    }
                    SpawnReply::Scale(reply) => {
                        let _ = reply.send(result.map(Some));
                    }
                }
            }
            Command::TeardownTopology { id, timeout, reply } => match self.swarm.begin_teardown(&id) {
                Ok(workers) => {
                    let launcher = self.swarm.collaborators().launcher.clone();
                    tokio::spawn(async move {
                        let summary = shutdown_all(launcher, id, workers, timeout).await;
                        let _ = reply.send(Ok(summary));
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::TerminateWorker { id, reply } => {
                let _ = reply.send(self.swarm.retire_worker(&id));
            }
            Command::ListWorkers { filter, reply } => {
                let _ = reply.send(self.swarm.list_workers(&filter));
            }
            Command::UpdateWorkerMetrics { id, delta, reply } => {
                let _ = reply.send(self.swarm.update_worker_metrics(&id, &delta));
            }
            Command::SetWorkerStatus { id, status, reply } => {
                let _ = reply.send(self.swarm.set_worker_status(&id, status));
            }
            Command::OrchestrateTask { spec, reply } => {
                let _ = reply.send(self.swarm.orchestrate_task(spec));
            }
            Command::CancelTask { id, reply } => {
                let result = self.swarm.cancel_task(&id);
                if let Ok(true) = result {
                    self.stop_executions(&id);
                }
                let _ = reply.send(result);
            }
            Command::MonitorTask { id, reply } => {
                let _ = reply.send(self.swarm.monitor_task(&id));
            }
            Command::RetryTask { id, reply } => {
                let _ = reply.send(self.swarm.retry_task(&id));
            }
            Command::GetTask { id, reply } => {
                let _ = reply.send(self.swarm.get_task(&id));
            }
            Command::ListTasks { status, reply } => {
                let _ = reply.send(Ok(self.swarm.list_tasks(status)));
            }
            Command::ExportTask { id, reply } => {
                let _ = reply.send(self.swarm.export_task(&id));
            }
            Command::DetectBottlenecks {
                topology,
                detection,
                reply,
            } => {
                let detection = detection.unwrap_or_else(|| self.swarm.default_detection());
                let _ = reply.send(self.swarm.detect_bottlenecks(topology, detection));
            }
            Command::PerformanceSummary { reply } => {
                let _ = reply.send(self.swarm.performance_summary());
            }
            Command::OptimizeDistribution { reply } => {
                let _ = reply.send(Ok(self.swarm.optimize_distribution()));
            }
            Command::Tick { reply } => {
                let report = self.swarm.tick();
                self.after_tick(&report);
                let _ = reply.send(Ok(report));
            }
            Command::Executed { dispatch, outcome } => {
                trace!(
                    "execution of {} on {} returned",
                    dispatch.task_id.short(),
                    dispatch.worker_id.short()
                );
                match self
                    .swarm
                    .report_outcome(&dispatch.task_id, &dispatch.worker_id, outcome)
                {
                    Ok(report) if report.finished.is_some() => {
                        self.executions.remove(&dispatch.task_id);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("outcome for task {} dropped: {}", dispatch.task_id.short(), e),
                }
            }
        }
    }

    fn start_switch(&mut self, id: TopologyId, kind: TopologyKind, reply: SwitchReply) {
        match self.swarm.plan_switch(&id, kind) {
            Ok(mut plan) => {
                let workers = std::mem::take(&mut plan.spawn);
                let tx = self.tx.clone();
                let launcher = self.swarm.collaborators().launcher.clone();
                let timeout = self.launch_timeout;
                tokio::spawn(async move {
                    let launched = launch_with_timeout(launcher, workers, timeout).await;
                    let _ = tx.send(Command::SwitchLaunched { plan, launched, reply });
                });
            }
            Err(e) => match reply {
                SwitchReply::Switch(reply) => {
                    let _ = reply.send(Err(e));
                }
                SwitchReply::Optimize(_, reply) => {
                    let _ = reply.send(Err(e));
                }
            },
        }
    }

    fn finish_switch(
        &mut self,
        mut plan: SwitchPlan,
        launched: Result<Vec<Worker>>,
        reply: SwitchReply,
    ) {
        let result = match launched {
            Ok(workers) => {
                plan.spawn = workers;
                self.swarm.commit_switch(plan)
            }
            Err(e) => {
                warn!("switch of {} aborted: {}", plan.topology_id.short(), e);
                self.swarm.abort_switch(&plan);
                Err(e)
            }
        };
        match reply {
            SwitchReply::Switch(reply) => {
                let _ = reply.send(result);
            }
            SwitchReply::Optimize(mut recommendation, reply) => {
                let _ = reply.send(result.map(|_| {
                    recommendation.applied = true;
                    recommendation
                }));
            }
        }
    }

    fn launch_worker(&mut self, worker: Worker, reply: SpawnReply) {
        let tx = self.tx.clone();
        let launcher = self.swarm.collaborators().launcher.clone();
        let timeout = self.launch_timeout;
        tokio::spawn(async move {
            let launched = launch_with_timeout(launcher, vec![worker.clone()], timeout).await;
            let _ = tx.send(Command::SpawnLaunched {
                worker,
                launched,
                reply,
            });
        });
    }

    fn after_tick(&mut self, report: &TickReport) {
        for id in report.finished.iter().chain(&report.collected) {
            self.executions.remove(id);
        }
        for id in &report.cancelled {
            self.stop_executions(id);
        }
    }

    fn stop_executions(&mut self, task_id: &TaskId) {
        if let Some(token) = self.executions.remove(task_id) {
            debug!("stopping executions of task {}", task_id.short());
            token.cancel();
        }
    }

    /// Start queued dispatches and shut down retired workers.
    fn pump(&mut self) {
        for dispatch in self.swarm.drain_dispatches() {
            self.execute(dispatch);
        }
        let retired = self.swarm.drain_retired();
        if !retired.is_empty() {
            let launcher = self.swarm.collaborators().launcher.clone();
            let timeout = self.launch_timeout;
            tokio::spawn(async move {
                for worker in retired {
                    if let Err(e) = shutdown_with_timeout(launcher.clone(), worker.clone(), timeout).await {
                        warn!("shutdown of worker {} failed: {}", worker.name, e);
                    }
                }
            });
        }
    }

    fn execute(&mut self, dispatch: Dispatch) {
        let token = self
            .executions
            .entry(dispatch.task_id)
            .or_insert_with(|| self.cancel.child_token())
            .clone();
        let executor = self.executor.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("execution of task {} on {} cancelled", dispatch.task_id.short(), dispatch.worker_id.short());
                }
                outcome = executor.execute(&dispatch) => {
                    let _ = tx.send(Command::Executed { dispatch, outcome });
                }
            }
        });
    }
}

/// Shut every worker down, each under its own timeout.
async fn shutdown_all(
    launcher: Arc<dyn WorkerLauncher>,
    topology_id: TopologyId,
    workers: Vec<Worker>,
    timeout: Duration,
) -> TeardownSummary {
    let mut summary = TeardownSummary {
        topology_id,
        terminated: Vec::new(),
        failures: Vec::new(),
    };
    let shutdowns = workers.into_iter().map(|worker| {
        let worker_id = worker.id;
        let launcher = launcher.clone();
        async move { (worker_id, shutdown_with_timeout(launcher, worker, timeout).await) }
    });
    for (worker_id, result) in join_all(shutdowns).await {
        match result {
            Ok(()) => summary.terminated.push(worker_id),
            Err(e) => summary.failures.push(TeardownFailure {
                worker_id,
                error: e.to_string(),
            }),
        }
    }
    info!(
        "Topology {} torn down: {} terminated, {} failed",
        topology_id.short(),
        summary.terminated.len(),
        summary.failures.len()
    );
    summary
}
