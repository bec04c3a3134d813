use thiserror::Error;

use crate::core::task::TaskId;
use crate::core::topology::TopologyId;
use crate::core::worker::WorkerId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Topology not found: {id}")]
    TopologyNotFound { id: TopologyId },

    #[error("Worker not found: {id}")]
    WorkerNotFound { id: WorkerId },

    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Topology is full (max: {max})")]
    TopologyFull { max: usize },

    #[error("Topology {0} is being reconfigured")]
    TopologyBusy(TopologyId),

    #[error("Dependency on {dependency} would create a cycle for task {task}")]
    DependencyCycle { task: TaskId, dependency: TaskId },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Swarm service is not running")]
    ServiceClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
