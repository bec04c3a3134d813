//! Worker launch collaborator.
//!
//! Launching a worker may block (process start, container pull), so the
//! service always calls a [`WorkerLauncher`] from a blocking thread.

use tracing::{debug, warn};

use crate::core::worker::Worker;
use crate::error::{Error, Result};

pub trait WorkerLauncher: Send + Sync {
    /// Bring the worker's backing resource up. May block.
    fn launch(&self, worker: &Worker) -> Result<()>;

    /// Tear the worker's backing resource down. May block.
    fn shutdown(&self, _worker: &Worker) -> Result<()> {
        Ok(())
    }
}

/// Launcher for in-process workers with nothing to start.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLauncher;

impl WorkerLauncher for NoopLauncher {
    fn launch(&self, _worker: &Worker) -> Result<()> {
        Ok(())
    }
}

/// Launch every worker or none of them.
///
/// On the first failure the workers already launched are shut down again
/// and the failure is returned as `Error::Spawn`.
pub fn launch_batch(launcher: &dyn WorkerLauncher, workers: Vec<Worker>) -> Result<Vec<Worker>> {
    let mut launched: Vec<Worker> = Vec::with_capacity(workers.len());
    for worker in workers {
        if let Err(e) = launcher.launch(&worker) {
            warn!("launch of {} failed: {}; rolling back {} workers", worker.name, e, launched.len());
            for done in launched.iter().rev() {
                if let Err(e) = launcher.shutdown(done) {
                    warn!("rollback shutdown of {} failed: {}", done.name, e);
                }
            }
            return Err(match e {
                Error::Spawn(msg) => Error::Spawn(msg),
                other => Error::Spawn(format!("{}: {}", worker.name, other)),
            });
        }
        debug!("launched worker {} ({})", worker.name, worker.id.short());
        launched.push(worker);
    }
    Ok(launched)
}
