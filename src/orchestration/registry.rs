//! Worker registry.
//!
//! The `WorkerRegistry` owns every live worker. It enforces the status
//! state machine, folds metrics updates into each worker's performance
//! record, and keeps a copy of every spawned and terminated worker in the
//! durable store so terminated history can be queried later.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::topology::{PlacementSlot, TopologyId};
use crate::core::worker::{
    MetricsDelta, Worker, WorkerConfig, WorkerId, WorkerStatus, WorkerType,
};
use crate::error::{Error, Result};
use crate::external::{DurableStore, RecordFilter, RecordKind};

/// Conjunctive worker query. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerFilter {
    pub swarm_id: Option<TopologyId>,
    pub worker_type: Option<WorkerType>,
    pub status: Option<WorkerStatus>,
    /// Merge terminated workers from the durable store into the result.
    pub include_terminated: bool,
}

impl WorkerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_swarm(mut self, swarm_id: TopologyId) -> Self {
        self.swarm_id = Some(swarm_id);
        self
    }

    pub fn of_type(mut self, worker_type: WorkerType) -> Self {
        self.worker_type = Some(worker_type);
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn include_terminated(mut self) -> Self {
        self.include_terminated = true;
        self
    }

    pub fn matches(&self, worker: &Worker) -> bool {
        self.swarm_id.map_or(true, |id| worker.swarm_id == id)
            && self.worker_type.map_or(true, |t| worker.worker_type == t)
            && self.status.map_or(true, |s| worker.status == s)
    }

    fn store_filter(&self) -> RecordFilter {
        let mut filter = RecordFilter::new().field("status", WorkerStatus::Terminated.to_string());
        if let Some(id) = self.swarm_id {
            filter = filter.field("swarm_id", id.to_string());
        }
        if let Some(t) = self.worker_type {
            filter = filter.field("worker_type", t.as_str());
        }
        filter
    }
}

/// Live worker map plus the durable history behind it.
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, Worker>,
    /// Registration order, used for stable listing and tie-breaks.
    order: Vec<WorkerId>,
    store: Arc<dyn DurableStore>,
    rr_cursor: usize,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            workers: HashMap::new(),
            order: Vec::new(),
            store,
            rr_cursor: 0,
        }
    }

    /// Build an unregistered worker for a spawn request.
    ///
    /// Nothing is recorded until [`WorkerRegistry::register`] is called, so
    /// a launch that fails in between leaves no trace.
    pub fn prepare(&self, config: WorkerConfig, now: DateTime<Utc>) -> Worker {
        Worker::from_config(config, now)
    }

    /// Add a launched worker to the live map.
    ///
    /// The store write happens first; if it fails the worker is not
    /// registered.
    pub fn register(&mut self, worker: Worker) -> Result<()> {
        if self.workers.contains_key(&worker.id) {
            return Err(Error::Validation(format!("worker {} is already registered", worker.id)));
        }
        self.persist(&worker)?;
        debug!(
            "WorkerRegistry::register {} ({}) in {}",
            worker.name,
            worker.worker_type,
            worker.swarm_id.short()
        );
        self.order.push(worker.id);
        self.workers.insert(worker.id, worker);
        Ok(())
    }

    /// Prepare and register in one step, for callers with nothing to launch.
    pub fn spawn(&mut self, config: WorkerConfig, now: DateTime<Utc>) -> Result<Worker> {
        let worker = self.prepare(config, now);
        self.register(worker.clone())?;
        Ok(worker)
    }

    /// Remove a worker from the live map and record its final snapshot.
    ///
    /// # Errors
    ///
    /// Returns `WorkerNotFound` for an unknown id; nothing changes.
    pub fn terminate(&mut self, id: &WorkerId, now: DateTime<Utc>) -> Result<Worker> {
        let mut worker = self
            .workers
            .remove(id)
            .ok_or(Error::WorkerNotFound { id: *id })?;
        self.order.retain(|w| w != id);

        worker.status = WorkerStatus::Terminated;
        worker.last_activity = now;
        if let Err(e) = self.persist(&worker) {
            warn!("final snapshot of worker {} not stored: {}", worker.name, e);
        }
        info!("Worker {} ({}) terminated", worker.name, id.short());
        Ok(worker)
    }

    pub fn get(&self, id: &WorkerId) -> Option<&Worker> {
        self.workers.get(id)
    }

    /// Like [`WorkerRegistry::get`] but with the not-found error attached.
    pub fn require(&self, id: &WorkerId) -> Result<&Worker> {
        self.workers.get(id).ok_or(Error::WorkerNotFound { id: *id })
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.contains_key(id)
    }

    /// Live workers in registration order.
    pub fn live(&self) -> impl Iterator<Item = &Worker> {
        self.order.iter().filter_map(|id| self.workers.get(id))
    }

    /// Position of a worker in registration order.
    pub fn rank(&self, id: &WorkerId) -> usize {
        self.order.iter().position(|w| w == id).unwrap_or(usize::MAX)
    }

    /// Live workers matching `filter`, plus stored terminated workers when
    /// requested.
    pub fn list(&self, filter: &WorkerFilter) -> Result<Vec<Worker>> {
        let mut out: Vec<Worker> = self.live().filter(|w| filter.matches(w)).cloned().collect();

        let wants_terminated = filter.status.map_or(true, |s| s == WorkerStatus::Terminated);
        if filter.include_terminated && wants_terminated {
            for record in self.store.get_all(RecordKind::Worker, &filter.store_filter())? {
                let worker: Worker = serde_json::from_value(record)?;
                if !self.workers.contains_key(&worker.id) && filter.matches(&worker) {
                    out.push(worker);
                }
            }
        }
        Ok(out)
    }

    /// Fold a metrics delta into a worker's performance record.
    pub fn update_metrics(
        &mut self,
        id: &WorkerId,
        delta: &MetricsDelta,
        now: DateTime<Utc>,
    ) -> Result<&Worker> {
        let worker = self
            .workers
            .get_mut(id)
            .ok_or(Error::WorkerNotFound { id: *id })?;
        worker.performance.apply(delta);
        worker.last_activity = now;
        Ok(worker)
    }

    /// Move a worker to a new status.
    ///
    /// Moving to `Terminated` goes through [`WorkerRegistry::terminate`].
    ///
    /// # Errors
    ///
    /// `InvalidTransition` out of an absorbing status, `WorkerNotFound` for
    /// an unknown id.
    pub fn set_status(
        &mut self,
        id: &WorkerId,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> Result<Worker> {
        let current = self.require(id)?.status;
        if current.is_absorbing() {
            return Err(Error::InvalidTransition {
                from: current.to_string(),
                to: status.to_string(),
            });
        }
        if status == WorkerStatus::Terminated {
            return self.terminate(id, now);
        }
        let worker = self
            .workers
            .get_mut(id)
            .ok_or(Error::WorkerNotFound { id: *id })?;
        if worker.status != status {
            debug!("Worker {} {} -> {}", worker.name, worker.status, status);
        }
        worker.status = status;
        worker.last_activity = now;
        Ok(worker.clone())
    }

    /// Flip a worker between idle and busy to match its current load.
    /// Absorbing statuses are left alone.
    pub fn sync_load_status(&mut self, id: &WorkerId, load: usize, now: DateTime<Utc>) {
        let Some(worker) = self.workers.get_mut(id) else {
            return;
        };
        if worker.status.is_absorbing() {
            return;
        }
        let target = if load > 0 { WorkerStatus::Busy } else { WorkerStatus::Idle };
        if worker.status != target {
            worker.status = target;
            worker.last_activity = now;
        }
    }

    /// Re-role a worker for a new placement slot. Skills reset to the new
    /// type's defaults and neighbors are cleared for rewiring.
    pub fn reshape(&mut self, id: &WorkerId, slot: &PlacementSlot, now: DateTime<Utc>) -> Result<()> {
        let worker = self
            .workers
            .get_mut(id)
            .ok_or(Error::WorkerNotFound { id: *id })?;
        worker.worker_type = slot.worker_type;
        worker.role = slot.role;
        worker.name = slot.name.clone();
        worker.elastic = slot.elastic;
        worker.skills = slot
            .worker_type
            .default_skills()
            .iter()
            .map(|s| s.to_string())
            .collect();
        worker.neighbors.clear();
        worker.last_activity = now;
        Ok(())
    }

    pub fn set_neighbors(&mut self, id: &WorkerId, neighbors: Vec<WorkerId>) {
        if let Some(worker) = self.workers.get_mut(id) {
            worker.neighbors = neighbors;
        }
    }

    /// Rotate `candidates` by the round-robin cursor and advance it by `take`.
    pub fn round_robin(&mut self, candidates: &[WorkerId], take: usize) -> Vec<WorkerId> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let start = self.rr_cursor % candidates.len();
        let picked: Vec<WorkerId> = candidates
            .iter()
            .cycle()
            .skip(start)
            .take(take.min(candidates.len()))
            .copied()
            .collect();
        self.rr_cursor = self.rr_cursor.wrapping_add(picked.len());
        picked
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn persist(&self, worker: &Worker) -> Result<()> {
        self.store
            .put(RecordKind::Worker, &worker.id.to_string(), serde_json::to_value(worker)?)
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("live", &self.workers.len())
            .field("rr_cursor", &self.rr_cursor)
            .finish()
    }
}
