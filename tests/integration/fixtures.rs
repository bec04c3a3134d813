//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building a coordinator on a manual clock
//! - Settling dispatched work with scripted outcomes
//! - Collecting lifecycle events

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use hive::config::Config;
use hive::core::task::TaskId;
use hive::external::{Dispatch, DurableStore, ExecutionOutcome, MemoryStore};
use hive::{Collaborators, ManualClock, Swarm, SwarmEvent};

/// A coordinator on a manual clock, with its store and event stream.
pub struct TestSwarm {
    pub swarm: Swarm,
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub events: mpsc::UnboundedReceiver<SwarmEvent>,
}

impl TestSwarm {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = ManualClock::new(Utc::now());
        let store = Arc::new(MemoryStore::new());
        Self::with_parts(config, clock, store)
    }

    pub fn with_parts(config: Config, clock: ManualClock, store: Arc<MemoryStore>) -> Self {
        let collaborators = Collaborators::default()
            .with_clock(Arc::new(clock.clone()))
            .with_store(store.clone() as Arc<dyn DurableStore>);
        let (tx, events) = mpsc::unbounded_channel();
        let swarm = Swarm::new(config, collaborators).with_events(tx);
        Self {
            swarm,
            clock,
            store,
            events,
        }
    }

    /// Answer every queued dispatch with `outcome(dispatch)`, repeating
    /// until no new work appears. Returns how many dispatches were settled.
    pub fn settle_with(&mut self, mut outcome: impl FnMut(&Dispatch) -> ExecutionOutcome) -> usize {
        let mut settled = 0;
        loop {
            let batch = self.swarm.drain_dispatches();
            if batch.is_empty() {
                return settled;
            }
            for d in batch {
                let result = outcome(&d);
                self.swarm
                    .report_outcome(&d.task_id, &d.worker_id, result)
                    .expect("report outcome");
                settled += 1;
            }
        }
    }

    /// Complete every dispatch successfully, echoing its payload.
    pub fn settle_all(&mut self) -> usize {
        self.settle_with(|d| success(d.payload.clone()))
    }

    /// Drain the events emitted so far.
    pub fn take_events(&mut self) -> Vec<SwarmEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn completed_events(&mut self) -> Vec<TaskId> {
        self.take_events()
            .into_iter()
            .filter_map(|e| match e {
                SwarmEvent::TaskCompleted { task_id } => Some(task_id),
                _ => None,
            })
            .collect()
    }
}

pub fn success(result: serde_json::Value) -> ExecutionOutcome {
    ExecutionOutcome::Success {
        result,
        token_usage: 10,
    }
}

pub fn failure(error: &str) -> ExecutionOutcome {
    ExecutionOutcome::Failure {
        error: error.to_string(),
    }
}
