//! Collaborators the swarm consumes but does not implement: worker
//! execution, worker launch, host metrics and durable storage.

mod executor;
mod launcher;
mod metrics;
mod store;

pub use executor::{Dispatch, EchoExecutor, ExecutionOutcome, WorkerExecutor};
pub use launcher::{launch_batch, NoopLauncher, WorkerLauncher};
pub use metrics::{FixedMetrics, HostSample, MetricsSource, NetworkSample, NullMetrics};
pub use store::{DurableStore, JsonFileStore, MemoryStore, RecordFilter, RecordKind};
