//! Integration test suite for hive.
//!
//! These tests drive the public surface end to end: topologies built and
//! reshaped through the coordinator, tasks scheduled across workers,
//! bottleneck detection over live workloads, and the service actor.
//!
//! # Test Categories
//!
//! - `topology`: placement, wiring, switching and teardown
//! - `scheduling`: dependency gating, failover, retry and record export
//! - `bottlenecks`: overload, stalls and optimization
//! - `service`: the actor behind a `SwarmHandle`
//!
//! Everything runs in-process against a manual clock or the echo executor.

mod fixtures;

mod bottlenecks;
mod scheduling;
mod service;
mod topology;
