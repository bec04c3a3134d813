//! Core domain models for the swarm.
//!
//! Workers, topologies, tasks, the dependency graph and bottleneck reports.
//! Nothing here performs I/O or holds shared state.

pub mod bottleneck;
pub mod dag;
pub mod task;
pub mod topology;
pub mod worker;

pub use bottleneck::{Bottleneck, BottleneckKind, BottleneckReport, Severity, Subject};
pub use dag::DependencyGraph;
pub use task::{
    Assignment, AssignmentState, DistributionStrategy, Lineage, Priority, SelectionPolicy, Task,
    TaskId, TaskMetrics, TaskSpec, TaskStatus,
};
pub use topology::{Topology, TopologyId, TopologyKind, TopologyStrategy};
pub use worker::{
    MetricsDelta, Worker, WorkerConfig, WorkerId, WorkerPerformance, WorkerRole, WorkerStatus,
    WorkerType,
};
