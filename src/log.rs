//! Structured logging for hive.
//!
//! Log levels:
//! - ERROR: Failures that abort an operation (launch errors, store writes)
//! - WARN: Recoverable surprises (shutdown failures, dropped results)
//! - INFO: Topology and task lifecycle (init, switch, completion)
//! - DEBUG: Scheduling decisions and tick passes
//! - TRACE: Per-worker selection details
//!
//! Debug mode can be enabled with `--debug` flag or `HIVE_DEBUG=1` env var.
//! `RUST_LOG` takes precedence over both when set.

use std::fs::File;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Initialize logging to ~/.hive/hive.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first subscriber is installed.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    let default_level = if debug_enabled { "hive=debug" } else { "hive=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let Some(file) = open_log_file() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init();
}

/// Check the `HIVE_DEBUG` environment variable.
pub fn env_debug() -> bool {
    std::env::var("HIVE_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn open_log_file() -> Option<File> {
    let hive_dir = dirs::home_dir()?.join(".hive");
    std::fs::create_dir_all(&hive_dir).ok()?;
    // Truncate on startup
    File::create(hive_dir.join("hive.log")).ok()
}
