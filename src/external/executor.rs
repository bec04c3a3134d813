//! Worker execution collaborator.
//!
//! The scheduler never interprets payloads. It hands a [`Dispatch`] to a
//! [`WorkerExecutor`] and waits for an [`ExecutionOutcome`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::task::TaskId;
use crate::core::worker::WorkerId;

/// One unit of work handed to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub payload: serde_json::Value,
    /// Zero on the first attempt, incremented per retry.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ExecutionOutcome {
    Success {
        result: serde_json::Value,
        #[serde(default)]
        token_usage: u64,
    },
    Failure {
        error: String,
    },
}

#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    async fn execute(&self, dispatch: &Dispatch) -> ExecutionOutcome;
}

/// Executor that succeeds with the dispatched payload after an optional delay.
#[derive(Debug, Clone, Default)]
pub struct EchoExecutor {
    delay: Duration,
}

impl EchoExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl WorkerExecutor for EchoExecutor {
    async fn execute(&self, dispatch: &Dispatch) -> ExecutionOutcome {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        ExecutionOutcome::Success {
            result: dispatch.payload.clone(),
            token_usage: 0,
        }
    }
}
