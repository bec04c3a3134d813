//! The four scheduling components.
//!
//! [`WorkerRegistry`] owns live workers, [`TopologyManager`] arranges them,
//! [`TaskScheduler`] places work on them and [`PerformanceMonitor`] watches
//! the result. None of them locks or spawns; the [`crate::Swarm`]
//! coordinator owns all four and serializes access.

pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod topology;

pub use monitor::{Detection, FanOut, PerformanceMonitor, RunningTask, WorkerLoad, WorkloadSnapshot};
pub use registry::{WorkerFilter, WorkerRegistry};
pub use scheduler::{DistributionReport, OutcomeReport, TaskProgress, TaskScheduler};
pub use topology::{
    performance_score, InitPlan, OptimizationRecommendation, PerformanceSignals, SwitchOutcome,
    SwitchPlan, TopologyManager, WorkloadHint,
};
