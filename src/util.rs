//! Helpers for running blocking collaborator calls off the async runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::core::worker::Worker;
use crate::external::{launch_batch, WorkerLauncher};
use crate::{Error, Result};

pub async fn blocking_with_timeout<F, T>(duration: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match timeout(duration, spawn_blocking(f)).await {
        Ok(Ok(inner)) => inner,
        Ok(Err(join_err)) => Err(Error::TaskJoin(join_err.to_string())),
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// Launch a batch of workers on the blocking pool.
///
/// A launch that times out is reported as `Timeout`; workers it already
/// brought up are not rolled back.
pub async fn launch_with_timeout(
    launcher: Arc<dyn WorkerLauncher>,
    workers: Vec<Worker>,
    duration: Duration,
) -> Result<Vec<Worker>> {
    if workers.is_empty() {
        return Ok(workers);
    }
    blocking_with_timeout(duration, move || launch_batch(launcher.as_ref(), workers)).await
}

pub async fn shutdown_with_timeout(
    launcher: Arc<dyn WorkerLauncher>,
    worker: Worker,
    duration: Duration,
) -> Result<()> {
    blocking_with_timeout(duration, move || launcher.shutdown(&worker)).await
}
