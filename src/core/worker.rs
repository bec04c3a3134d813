//! Worker data model.
//!
//! A worker is a schedulable unit of capacity owned by one topology. It
//! carries a closed [`WorkerType`], the skills used for capability-based
//! selection, and a running performance record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::core::topology::TopologyId;
use crate::error::{Error, Result};

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The closed set of worker types.
///
/// Topology placement uses the first eight; the rest are specialist types
/// that callers may spawn into any topology. `Generic` stands in for a type
/// with no dedicated skill profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerType {
    Coordinator,
    Worker,
    Peer,
    Hub,
    Spoke,
    Node,
    AdaptiveCoordinator,
    AdaptiveWorker,
    Coder,
    Researcher,
    Analyst,
    Tester,
    Reviewer,
    Architect,
    Optimizer,
    Documenter,
    Monitor,
    Generic,
}

impl WorkerType {
    pub const ALL: [WorkerType; 18] = [
        WorkerType::Coordinator,
        WorkerType::Worker,
        WorkerType::Peer,
        WorkerType::Hub,
        WorkerType::Spoke,
        WorkerType::Node,
        WorkerType::AdaptiveCoordinator,
        WorkerType::AdaptiveWorker,
        WorkerType::Coder,
        WorkerType::Researcher,
        WorkerType::Analyst,
        WorkerType::Tester,
        WorkerType::Reviewer,
        WorkerType::Architect,
        WorkerType::Optimizer,
        WorkerType::Documenter,
        WorkerType::Monitor,
        WorkerType::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Coordinator => "coordinator",
            WorkerType::Worker => "worker",
            WorkerType::Peer => "peer",
            WorkerType::Hub => "hub",
            WorkerType::Spoke => "spoke",
            WorkerType::Node => "node",
            WorkerType::AdaptiveCoordinator => "adaptive-coordinator",
            WorkerType::AdaptiveWorker => "adaptive-worker",
            WorkerType::Coder => "coder",
            WorkerType::Researcher => "researcher",
            WorkerType::Analyst => "analyst",
            WorkerType::Tester => "tester",
            WorkerType::Reviewer => "reviewer",
            WorkerType::Architect => "architect",
            WorkerType::Optimizer => "optimizer",
            WorkerType::Documenter => "documenter",
            WorkerType::Monitor => "monitor",
            WorkerType::Generic => "generic",
        }
    }

    /// Skills a worker of this type gets when the caller supplies none.
    pub fn default_skills(&self) -> &'static [&'static str] {
        match self {
            WorkerType::Coordinator => &["task-coordination", "planning", "delegation", "monitoring"],
            WorkerType::Worker => &["task-execution", "general-processing"],
            WorkerType::Peer => &["task-execution", "peer-communication", "consensus"],
            WorkerType::Hub => &["routing", "task-coordination", "aggregation"],
            WorkerType::Spoke => &["task-execution", "reporting"],
            WorkerType::Node => &["task-execution", "message-passing"],
            WorkerType::AdaptiveCoordinator => {
                &["task-coordination", "load-balancing", "topology-optimization"]
            }
            WorkerType::AdaptiveWorker => &["task-execution", "self-optimization"],
            WorkerType::Coder => &["programming", "debugging", "code-review", "refactoring"],
            WorkerType::Researcher => {
                &["research", "analysis", "documentation", "information-gathering"]
            }
            WorkerType::Analyst => {
                &["data-analysis", "pattern-recognition", "reporting", "visualization"]
            }
            WorkerType::Tester => &["testing", "quality-assurance", "test-automation", "bug-detection"],
            WorkerType::Reviewer => &["code-review", "quality-assurance", "standards-compliance"],
            WorkerType::Architect => &["system-design", "architecture", "technical-planning"],
            WorkerType::Optimizer => {
                &["performance-optimization", "profiling", "resource-management"]
            }
            WorkerType::Documenter => &["documentation", "technical-writing"],
            WorkerType::Monitor => &["monitoring", "alerting", "metrics-collection"],
            WorkerType::Generic => &["general-processing"],
        }
    }
}

impl std::fmt::Display for WorkerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        WorkerType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown worker type: {}", s)))
    }
}

/// Role a worker plays inside its topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Queen,
    Worker,
    Peer,
    Hub,
    Spoke,
    Node,
    Coordinator,
    Member,
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerRole::Queen => "queen",
            WorkerRole::Worker => "worker",
            WorkerRole::Peer => "peer",
            WorkerRole::Hub => "hub",
            WorkerRole::Spoke => "spoke",
            WorkerRole::Node => "node",
            WorkerRole::Coordinator => "coordinator",
            WorkerRole::Member => "member",
        };
        f.write_str(s)
    }
}

/// Worker lifecycle status.
///
/// `Idle` and `Busy` alternate freely; `Terminated` and `Error` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Terminated,
    Error,
}

impl WorkerStatus {
    pub fn is_absorbing(&self) -> bool {
        matches!(self, WorkerStatus::Terminated | WorkerStatus::Error)
    }

    /// Whether a worker in this status can be given work.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, WorkerStatus::Idle | WorkerStatus::Busy)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Terminated => "terminated",
            WorkerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPerformance {
    pub tasks_completed: u64,
    pub avg_response_time_ms: f64,
    /// Number of response-time samples folded into the average.
    pub response_samples: u64,
    pub error_count: u64,
    pub token_usage: u64,
    pub success_rate: f64,
}

impl Default for WorkerPerformance {
    fn default() -> Self {
        Self {
            tasks_completed: 0,
            avg_response_time_ms: 0.0,
            response_samples: 0,
            error_count: 0,
            token_usage: 0,
            success_rate: 1.0,
        }
    }
}

impl WorkerPerformance {
    /// Fold a metrics delta into the running record.
    pub fn apply(&mut self, delta: &MetricsDelta) {
        if let Some(sample) = delta.response_time_ms {
            let count = self.response_samples as f64;
            self.avg_response_time_ms = (self.avg_response_time_ms * count + sample) / (count + 1.0);
            self.response_samples += 1;
        }
        self.tasks_completed += delta.tasks_completed;
        self.error_count += delta.error_count;
        self.token_usage += delta.token_usage;

        let attempts = self.tasks_completed + self.error_count;
        self.success_rate = if attempts == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / attempts as f64
        };
    }
}

/// Incremental metrics update for one worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsDelta {
    pub tasks_completed: u64,
    pub error_count: u64,
    pub token_usage: u64,
    pub response_time_ms: Option<f64>,
}

impl MetricsDelta {
    pub fn completed(response_time_ms: f64, token_usage: u64) -> Self {
        Self {
            tasks_completed: 1,
            token_usage,
            response_time_ms: Some(response_time_ms),
            ..Default::default()
        }
    }

    pub fn failed(response_time_ms: f64) -> Self {
        Self {
            error_count: 1,
            response_time_ms: Some(response_time_ms),
            ..Default::default()
        }
    }
}

/// Request to spawn a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_type: WorkerType,
    pub topology_id: TopologyId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub skills: Option<BTreeSet<String>>,
    #[serde(default)]
    pub role: Option<WorkerRole>,
}

impl WorkerConfig {
    pub fn new(worker_type: WorkerType, topology_id: TopologyId) -> Self {
        Self {
            worker_type,
            topology_id,
            name: None,
            skills: None,
            role: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = Some(skills.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_role(mut self, role: WorkerRole) -> Self {
        self.role = Some(role);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub worker_type: WorkerType,
    pub name: String,
    pub status: WorkerStatus,
    pub skills: BTreeSet<String>,
    pub performance: WorkerPerformance,
    pub swarm_id: TopologyId,
    pub role: WorkerRole,
    /// Topology-specific adjacency, by id.
    pub neighbors: Vec<WorkerId>,
    /// Eligible for growth under adaptive scaling.
    pub elastic: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Worker {
    /// Build a fresh idle worker from a spawn request.
    pub fn from_config(config: WorkerConfig, now: DateTime<Utc>) -> Self {
        let id = WorkerId::new();
        let skills = config.skills.unwrap_or_else(|| {
            config
                .worker_type
                .default_skills()
                .iter()
                .map(|s| s.to_string())
                .collect()
        });
        let name = config
            .name
            .unwrap_or_else(|| format!("{}-{}", config.worker_type, id.short()));
        Self {
            id,
            worker_type: config.worker_type,
            name,
            status: WorkerStatus::Idle,
            skills,
            performance: WorkerPerformance::default(),
            swarm_id: config.topology_id,
            role: config.role.unwrap_or(WorkerRole::Member),
            neighbors: Vec::new(),
            elastic: false,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.contains(skill) || self.worker_type.as_str() == skill
    }

    /// Number of requirements this worker satisfies.
    pub fn requirement_score(&self, requirements: &[String]) -> usize {
        requirements.iter().filter(|r| self.has_skill(r)).count()
    }
}
