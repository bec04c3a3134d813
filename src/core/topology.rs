//! Topology data model and kind-specific placement plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::worker::{WorkerId, WorkerRole, WorkerType};
use crate::error::{Error, Result};

/// Unique identifier for a topology (the worker's `swarm_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologyId(pub Uuid);

impl TopologyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TopologyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TopologyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TopologyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    Hierarchical,
    Mesh,
    Star,
    Ring,
    Adaptive,
}

impl TopologyKind {
    pub const ALL: [TopologyKind; 5] = [
        TopologyKind::Hierarchical,
        TopologyKind::Mesh,
        TopologyKind::Star,
        TopologyKind::Ring,
        TopologyKind::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyKind::Hierarchical => "hierarchical",
            TopologyKind::Mesh => "mesh",
            TopologyKind::Star => "star",
            TopologyKind::Ring => "ring",
            TopologyKind::Adaptive => "adaptive",
        }
    }

    /// Hub-and-spoke kinds, whose first member is the hub.
    pub fn has_hub(&self) -> bool {
        matches!(
            self,
            TopologyKind::Hierarchical | TopologyKind::Star | TopologyKind::Adaptive
        )
    }

    fn valid_values() -> String {
        Self::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl std::fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TopologyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TopologyKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "invalid topology '{}'; valid values are: {}",
                    s,
                    TopologyKind::valid_values()
                ))
            })
    }
}

/// How a topology prefers to run work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyStrategy {
    Parallel,
    Sequential,
    #[default]
    Balanced,
}

impl std::str::FromStr for TopologyStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "parallel" => Ok(TopologyStrategy::Parallel),
            "sequential" => Ok(TopologyStrategy::Sequential),
            "balanced" => Ok(TopologyStrategy::Balanced),
            other => Err(Error::Validation(format!(
                "invalid strategy '{}'; valid values are: parallel, sequential, balanced",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub id: TopologyId,
    pub kind: TopologyKind,
    pub max_workers: usize,
    pub strategy: TopologyStrategy,
    pub memory_enabled: bool,
    /// Member worker ids in placement order.
    pub members: Vec<WorkerId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Topology {
    pub fn new(
        kind: TopologyKind,
        max_workers: usize,
        strategy: TopologyStrategy,
        memory_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if max_workers == 0 {
            return Err(Error::Validation("max_workers must be at least 1".to_string()));
        }
        Ok(Self {
            id: TopologyId::new(),
            kind,
            max_workers,
            strategy,
            memory_enabled,
            members: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn has_capacity(&self) -> bool {
        self.members.len() < self.max_workers
    }

}

/// One slot of a placement plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementSlot {
    pub worker_type: WorkerType,
    pub role: WorkerRole,
    pub name: String,
    pub elastic: bool,
}

impl PlacementSlot {
    fn new(worker_type: WorkerType, role: WorkerRole, name: String) -> Self {
        Self {
            worker_type,
            role,
            name,
            elastic: false,
        }
    }
}

/// Deterministic placement plan for a topology kind, capped at `max_workers`.
pub fn placement_plan(kind: TopologyKind, max_workers: usize) -> Vec<PlacementSlot> {
    let rest = max_workers.saturating_sub(1);
    let mut slots = match kind {
        TopologyKind::Hierarchical => {
            let mut slots = vec![PlacementSlot::new(
                WorkerType::Coordinator,
                WorkerRole::Queen,
                "queen".to_string(),
            )];
            slots.extend((0..rest.min(3)).map(|i| {
                PlacementSlot::new(WorkerType::Worker, WorkerRole::Worker, format!("worker-{}", i))
            }));
            slots
        }
        TopologyKind::Mesh => (0..max_workers.min(5))
            .map(|i| PlacementSlot::new(WorkerType::Peer, WorkerRole::Peer, format!("peer-{}", i)))
            .collect(),
        TopologyKind::Star => {
            let mut slots = vec![PlacementSlot::new(WorkerType::Hub, WorkerRole::Hub, "hub".to_string())];
            slots.extend((0..rest.min(4)).map(|i| {
                PlacementSlot::new(WorkerType::Spoke, WorkerRole::Spoke, format!("spoke-{}", i))
            }));
            slots
        }
        TopologyKind::Ring => (0..max_workers.min(6))
            .map(|i| PlacementSlot::new(WorkerType::Node, WorkerRole::Node, format!("node-{}", i)))
            .collect(),
        TopologyKind::Adaptive => {
            let mut slots = vec![PlacementSlot::new(
                WorkerType::AdaptiveCoordinator,
                WorkerRole::Coordinator,
                "adaptive-coordinator".to_string(),
            )];
            let workers = rest.min(2).max(1);
            slots.extend((0..workers).map(|i| PlacementSlot {
                worker_type: WorkerType::AdaptiveWorker,
                role: WorkerRole::Worker,
                name: format!("adaptive-worker-{}", i),
                elastic: true,
            }));
            slots
        }
    };
    slots.truncate(max_workers);
    slots
}

/// Predecessor and successor positions of node `i` in a ring of `n`.
pub fn ring_neighbors(i: usize, n: usize) -> (usize, usize) {
    ((i + n - 1) % n, (i + 1) % n)
}

/// Neighbor lists for members laid out by `placement_plan(kind, ..)`.
///
/// Mesh connectivity is implicit (every distinct pair), so mesh members get
/// empty lists. Hub-and-spoke shapes connect the first member to all others.
pub fn wire_neighbors(kind: TopologyKind, members: &[WorkerId]) -> Vec<Vec<WorkerId>> {
    let n = members.len();
    match kind {
        TopologyKind::Mesh => vec![Vec::new(); n],
        TopologyKind::Ring => (0..n)
            .map(|i| {
                let (prev, next) = ring_neighbors(i, n);
                vec![members[prev], members[next]]
            })
            .collect(),
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    members[1..].to_vec()
                } else {
                    vec![members[0]]
                }
            })
            .collect(),
    }
}
