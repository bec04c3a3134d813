//! Topology manager.
//!
//! Builds worker arrangements from the kind-specific placement plans,
//! reconfigures them, and recommends a better kind from bottleneck
//! signals. Worker launches are not done here: every mutation is split
//! into a plan (pure, returns the workers to launch) and a commit, so the
//! caller decides where the blocking launch runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::core::bottleneck::BottleneckReport;
use crate::core::topology::{
    placement_plan, wire_neighbors, PlacementSlot, Topology, TopologyId, TopologyKind,
    TopologyStrategy,
};
use crate::core::worker::{Worker, WorkerConfig, WorkerId, WorkerRole, WorkerType};
use crate::error::{Error, Result};
use crate::orchestration::registry::WorkerRegistry;

/// Average response time above which a topology counts as slow.
pub const HIGH_RESPONSE_TIME_MS: f64 = 3000.0;

/// Success rate below which a topology counts as error-prone.
pub const LOW_SUCCESS_RATE: f64 = 0.9;

/// Caller-supplied description of the expected workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadHint {
    Parallel,
    Sequential,
    Mixed,
    HighThroughput,
    FaultTolerant,
}

impl WorkloadHint {
    pub fn preferred_kind(&self) -> TopologyKind {
        match self {
            WorkloadHint::Parallel => TopologyKind::Mesh,
            WorkloadHint::Sequential => TopologyKind::Hierarchical,
            WorkloadHint::Mixed => TopologyKind::Adaptive,
            WorkloadHint::HighThroughput => TopologyKind::Ring,
            WorkloadHint::FaultTolerant => TopologyKind::Hierarchical,
        }
    }
}

impl std::str::FromStr for WorkloadHint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "parallel" => Ok(WorkloadHint::Parallel),
            "sequential" => Ok(WorkloadHint::Sequential),
            "mixed" => Ok(WorkloadHint::Mixed),
            "high-throughput" => Ok(WorkloadHint::HighThroughput),
            "fault-tolerant" => Ok(WorkloadHint::FaultTolerant),
            other => Err(Error::Validation(format!(
                "invalid workload hint '{}'; valid values are: parallel, sequential, mixed, high-throughput, fault-tolerant",
                other
            ))),
        }
    }
}

/// Aggregate performance of a topology's members, fed to the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSignals {
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
}

impl Default for PerformanceSignals {
    fn default() -> Self {
        Self {
            avg_response_time_ms: 0.0,
            success_rate: 1.0,
        }
    }
}

impl PerformanceSignals {
    /// Mean over workers that have reported anything.
    pub fn from_workers<'a>(workers: impl IntoIterator<Item = &'a Worker>) -> Self {
        let mut rt_sum = 0.0;
        let mut rt_n = 0usize;
        let mut completed = 0u64;
        let mut errors = 0u64;
        for w in workers {
            if w.performance.response_samples > 0 {
                rt_sum += w.performance.avg_response_time_ms;
                rt_n += 1;
            }
            completed += w.performance.tasks_completed;
            errors += w.performance.error_count;
        }
        let attempts = completed + errors;
        Self {
            avg_response_time_ms: if rt_n == 0 { 0.0 } else { rt_sum / rt_n as f64 },
            success_rate: if attempts == 0 { 1.0 } else { completed as f64 / attempts as f64 },
        }
    }

    pub fn high_response_time(&self) -> bool {
        self.avg_response_time_ms > HIGH_RESPONSE_TIME_MS
    }

    pub fn high_error_rate(&self) -> bool {
        self.success_rate < LOW_SUCCESS_RATE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub topology_id: TopologyId,
    pub current_kind: TopologyKind,
    pub recommended_kind: TopologyKind,
    pub reasons: Vec<String>,
    /// 0..=100
    pub performance_score: u8,
    pub signals: PerformanceSignals,
    /// True when the recommendation was applied through a switch.
    pub applied: bool,
}

impl OptimizationRecommendation {
    pub fn changes_kind(&self) -> bool {
        self.current_kind != self.recommended_kind
    }
}

/// Workers to launch for a new topology, already wired.
#[derive(Debug, Clone)]
pub struct InitPlan {
    pub topology: Topology,
    pub workers: Vec<Worker>,
}

/// A reconfiguration in progress. The topology stays busy until the plan
/// is committed or aborted.
#[derive(Debug, Clone)]
pub struct SwitchPlan {
    pub topology_id: TopologyId,
    pub previous_kind: TopologyKind,
    pub new_kind: TopologyKind,
    /// Existing members re-roled in place.
    pub reshape: Vec<(WorkerId, PlacementSlot)>,
    /// Existing members beyond the new plan's size.
    pub retire: Vec<WorkerId>,
    /// New workers for slots existing members cannot fill.
    pub spawn: Vec<Worker>,
}

impl SwitchPlan {
    /// Member order once the switch is committed.
    pub fn final_order(&self) -> Vec<WorkerId> {
        self.reshape
            .iter()
            .map(|(id, _)| *id)
            .chain(self.spawn.iter().map(|w| w.id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchOutcome {
    pub topology_id: TopologyId,
    pub previous_kind: TopologyKind,
    pub new_kind: TopologyKind,
    pub reshaped: Vec<WorkerId>,
    pub spawned: Vec<WorkerId>,
    pub terminated: Vec<WorkerId>,
}

#[derive(Debug, Default)]
pub struct TopologyManager {
    topologies: HashMap<TopologyId, Topology>,
    order: Vec<TopologyId>,
    /// Topologies with a switch in flight.
    busy: HashSet<TopologyId>,
    /// Slots claimed by spawns that have not committed yet.
    reserved: HashMap<TopologyId, usize>,
}

impl TopologyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TopologyId) -> Result<&Topology> {
        self.topologies.get(id).ok_or(Error::TopologyNotFound { id: *id })
    }

    pub fn list(&self) -> Vec<&Topology> {
        self.order.iter().filter_map(|id| self.topologies.get(id)).collect()
    }

    pub fn contains(&self, id: &TopologyId) -> bool {
        self.topologies.contains_key(id)
    }

    pub fn is_busy(&self, id: &TopologyId) -> bool {
        self.busy.contains(id)
    }

    /// Plan a new topology and its initial workers.
    ///
    /// Worker ids are fixed here so neighbor lists can be wired before any
    /// worker is launched.
    pub fn plan_init(
        &self,
        registry: &WorkerRegistry,
        kind: TopologyKind,
        max_workers: usize,
        strategy: TopologyStrategy,
        memory_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<InitPlan> {
        let topology = Topology::new(kind, max_workers, strategy, memory_enabled, now)?;
        let mut workers: Vec<Worker> = placement_plan(kind, max_workers)
            .into_iter()
            .map(|slot| prepare_slot(registry, topology.id, slot, now))
            .collect();
        let ids: Vec<WorkerId> = workers.iter().map(|w| w.id).collect();
        for (worker, neighbors) in workers.iter_mut().zip(wire_neighbors(kind, &ids)) {
            worker.neighbors = neighbors;
        }
        debug!(
            "TopologyManager::plan_init {} {} with {} workers",
            kind,
            topology.id.short(),
            workers.len()
        );
        Ok(InitPlan { topology, workers })
    }

    /// Record a topology whose workers have been launched and registered.
    pub fn commit_init(&mut self, mut topology: Topology, members: Vec<WorkerId>) {
        topology.members = members;
        info!(
            "Topology {} ({}) ready with {} workers",
            topology.id.short(),
            topology.kind,
            topology.members.len()
        );
        self.order.push(topology.id);
        self.topologies.insert(topology.id, topology);
    }

    /// Forget a topology. Its members are the caller's to terminate.
    ///
    /// # Errors
    ///
    /// `TopologyNotFound`, or `TopologyBusy` while a switch or spawn is in
    /// flight.
    pub fn remove(&mut self, id: &TopologyId) -> Result<Topology> {
        self.get(id)?;
        if self.busy.contains(id) || self.reserved.contains_key(id) {
            return Err(Error::TopologyBusy(*id));
        }
        self.order.retain(|t| t != id);
        let topology = self
            .topologies
            .remove(id)
            .ok_or(Error::TopologyNotFound { id: *id })?;
        info!("Topology {} ({}) removed", id.short(), topology.kind);
        Ok(topology)
    }

    /// Claim one slot for a worker about to be launched into a topology.
    pub fn reserve_slot(&mut self, id: &TopologyId) -> Result<()> {
        let topology = self.get(id)?;
        if self.busy.contains(id) {
            return Err(Error::TopologyBusy(*id));
        }
        let reserved = self.reserved.get(id).copied().unwrap_or(0);
        if topology.members.len() + reserved >= topology.max_workers {
            return Err(Error::TopologyFull {
                max: topology.max_workers,
            });
        }
        *self.reserved.entry(*id).or_default() += 1;
        Ok(())
    }

    pub fn release_slot(&mut self, id: &TopologyId) {
        if let Some(n) = self.reserved.get_mut(id) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.reserved.remove(id);
            }
        }
    }

    /// Turn a reserved slot into a member and return the rewired adjacency.
    pub fn add_member(&mut self, id: &TopologyId, worker: WorkerId, now: DateTime<Utc>) -> Result<Vec<(WorkerId, Vec<WorkerId>)>> {
        self.release_slot(id);
        let topology = self
            .topologies
            .get_mut(id)
            .ok_or(Error::TopologyNotFound { id: *id })?;
        if !topology.has_capacity() {
            return Err(Error::TopologyFull {
                max: topology.max_workers,
            });
        }
        topology.members.push(worker);
        topology.updated_at = now;
        Ok(adjacency(topology))
    }

    /// Drop a member and return the rewired adjacency. Unknown topologies
    /// and non-members are ignored.
    pub fn remove_member(&mut self, id: &TopologyId, worker: &WorkerId, now: DateTime<Utc>) -> Vec<(WorkerId, Vec<WorkerId>)> {
        let Some(topology) = self.topologies.get_mut(id) else {
            return Vec::new();
        };
        let before = topology.members.len();
        topology.members.retain(|m| m != worker);
        if topology.members.len() == before {
            return Vec::new();
        }
        topology.updated_at = now;
        adjacency(topology)
    }

    /// Start a reconfiguration to `new_kind` over the topology's capacity.
    ///
    /// # Errors
    ///
    /// `TopologyNotFound`, or `TopologyBusy` when another switch is in flight.
    pub fn begin_switch(
        &mut self,
        registry: &WorkerRegistry,
        id: &TopologyId,
        new_kind: TopologyKind,
        now: DateTime<Utc>,
    ) -> Result<SwitchPlan> {
        let topology = self.get(id)?;
        if self.busy.contains(id) || self.reserved.contains_key(id) {
            return Err(Error::TopologyBusy(*id));
        }
        let slots = placement_plan(new_kind, topology.max_workers);
        let members: Vec<WorkerId> = topology
            .members
            .iter()
            .copied()
            .filter(|m| registry.contains(m))
            .collect();

        let keep = members.len().min(slots.len());
        let reshape: Vec<(WorkerId, PlacementSlot)> = members[..keep]
            .iter()
            .copied()
            .zip(slots[..keep].iter().cloned())
            .collect();
        let retire = members[keep..].to_vec();
        let spawn = slots[keep..]
            .iter()
            .cloned()
            .map(|slot| prepare_slot(registry, *id, slot, now))
            .collect();

        let plan = SwitchPlan {
            topology_id: *id,
            previous_kind: topology.kind,
            new_kind,
            reshape,
            retire,
            spawn,
        };
        self.busy.insert(*id);
        debug!(
            "TopologyManager::begin_switch {} {} -> {} (reshape {}, retire {}, spawn {})",
            id.short(),
            plan.previous_kind,
            new_kind,
            plan.reshape.len(),
            plan.retire.len(),
            plan.spawn.len()
        );
        Ok(plan)
    }

    /// Apply a switch whose new workers have been launched and registered.
    pub fn commit_switch(&mut self, plan: &SwitchPlan, now: DateTime<Utc>) -> Result<Vec<(WorkerId, Vec<WorkerId>)>> {
        self.busy.remove(&plan.topology_id);
        let topology = self
            .topologies
            .get_mut(&plan.topology_id)
            .ok_or(Error::TopologyNotFound { id: plan.topology_id })?;
        topology.kind = plan.new_kind;
        topology.members = plan.final_order();
        topology.updated_at = now;
        info!(
            "Topology {} switched {} -> {}",
            plan.topology_id.short(),
            plan.previous_kind,
            plan.new_kind
        );
        Ok(adjacency(topology))
    }

    pub fn abort_switch(&mut self, id: &TopologyId) {
        if self.busy.remove(id) {
            debug!("TopologyManager::abort_switch {}", id.short());
        }
    }

    /// Plan one more elastic worker for an adaptive topology.
    ///
    /// Returns `None` for non-adaptive topologies or when the topology is
    /// at capacity. On `Some`, a slot is reserved.
    pub fn plan_scale(
        &mut self,
        registry: &WorkerRegistry,
        id: &TopologyId,
        now: DateTime<Utc>,
    ) -> Result<Option<Worker>> {
        let topology = self.get(id)?;
        if topology.kind != TopologyKind::Adaptive {
            return Ok(None);
        }
        let elastic = topology
            .members
            .iter()
            .filter_map(|m| registry.get(m))
            .filter(|w| w.elastic)
            .count();
        if self.reserve_slot(id).is_err() {
            return Ok(None);
        }
        let slot = PlacementSlot {
            worker_type: WorkerType::AdaptiveWorker,
            role: WorkerRole::Worker,
            name: format!("adaptive-worker-{}", elastic),
            elastic: true,
        };
        Ok(Some(prepare_slot(registry, *id, slot, now)))
    }

    /// Map bottleneck signals and an optional workload hint to a kind.
    ///
    /// Pure: the same inputs always give the same recommendation.
    pub fn recommend(
        &self,
        id: &TopologyId,
        report: &BottleneckReport,
        signals: PerformanceSignals,
        hint: Option<WorkloadHint>,
    ) -> Result<OptimizationRecommendation> {
        let topology = self.get(id)?;
        let current = topology.kind;
        let mut reasons = Vec::new();
        let mut recommended = current;

        if signals.high_response_time() {
            match current {
                TopologyKind::Hierarchical => {
                    recommended = TopologyKind::Mesh;
                    reasons.push("high response time: spread work across peers".to_string());
                }
                TopologyKind::Star => {
                    recommended = TopologyKind::Adaptive;
                    reasons.push("high response time: hub is saturated, allow elastic growth".to_string());
                }
                _ => {}
            }
        }
        if signals.high_error_rate() && current != TopologyKind::Hierarchical {
            recommended = TopologyKind::Hierarchical;
            reasons.push("high error rate: add coordinator oversight".to_string());
        }
        if let Some(hint) = hint {
            let preferred = hint.preferred_kind();
            if preferred != recommended {
                reasons.push(format!("workload hint prefers {}", preferred));
            }
            recommended = preferred;
        }

        Ok(OptimizationRecommendation {
            topology_id: *id,
            current_kind: current,
            recommended_kind: recommended,
            reasons,
            performance_score: performance_score(report.entries.len(), &signals),
            signals,
            applied: false,
        })
    }
}

/// 100 minus 10 per bottleneck (at most 50), minus 20 for a low success
/// rate, minus 15 for a high response time.
pub fn performance_score(bottlenecks: usize, signals: &PerformanceSignals) -> u8 {
    let mut score: i64 = 100;
    score -= (bottlenecks as i64 * 10).min(50);
    if signals.high_error_rate() {
        score -= 20;
    }
    if signals.high_response_time() {
        score -= 15;
    }
    score.clamp(0, 100) as u8
}

fn prepare_slot(registry: &WorkerRegistry, topology: TopologyId, slot: PlacementSlot, now: DateTime<Utc>) -> Worker {
    let config = WorkerConfig::new(slot.worker_type, topology)
        .with_name(slot.name)
        .with_role(slot.role);
    let mut worker = registry.prepare(config, now);
    worker.elastic = slot.elastic;
    worker
}

fn adjacency(topology: &Topology) -> Vec<(WorkerId, Vec<WorkerId>)> {
    topology
        .members
        .iter()
        .copied()
        .zip(wire_neighbors(topology.kind, &topology.members))
        .collect()
}
