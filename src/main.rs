use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use hive::config::Config;
use hive::core::task::{TaskId, TaskSpec};
use hive::core::topology::{TopologyKind, TopologyStrategy};
use hive::external::{EchoExecutor, JsonFileStore, MemoryStore};
use hive::{Collaborators, Result, Swarm, SwarmService};

const POLL: Duration = Duration::from_millis(20);

/// Hive - worker-pool topology manager and task scheduler
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    HIVE_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.hive/hive.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run an in-process swarm with echo workers and print its summary
    Simulate {
        /// hierarchical, mesh, star, ring or adaptive
        #[arg(long, default_value = "mesh")]
        topology: TopologyKind,

        #[arg(long, default_value_t = 4)]
        max_workers: usize,

        /// Number of tasks to submit
        #[arg(long, default_value_t = 8)]
        tasks: usize,

        /// Make each task depend on the previous one
        #[arg(long)]
        chain: bool,

        /// parallel, sequential or balanced
        #[arg(long, default_value = "balanced")]
        strategy: TopologyStrategy,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Show the active configuration
    Config {
        /// Write the defaults to ~/.hive/hive.toml
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    hive::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Simulate {
            topology,
            max_workers,
            tasks,
            chain,
            strategy,
            timeout,
        } => {
            run_simulate(
                topology,
                max_workers,
                tasks,
                chain,
                strategy,
                Duration::from_secs(timeout),
            )
            .await
        }
        Command::Config { init } => run_config(init),
    }
}

async fn run_simulate(
    kind: TopologyKind,
    max_workers: usize,
    tasks: usize,
    chain: bool,
    strategy: TopologyStrategy,
    timeout: Duration,
) -> Result<()> {
    let config = Config::load()?;
    let collaborators = match &config.store_dir {
        Some(_) => Collaborators::default().with_store(Arc::new(JsonFileStore::new(config.store_dir()?))),
        None => Collaborators::default().with_store(Arc::new(MemoryStore::new())),
    };
    let swarm = Swarm::new(config, collaborators);
    let handle = SwarmService::new(swarm, Arc::new(EchoExecutor::with_delay(Duration::from_millis(10))))
        .with_interval(Duration::from_millis(100))
        .spawn();

    let topology = handle.init_topology(kind, max_workers, strategy, false).await?;
    info!(
        "Simulating {} tasks on {} topology {} ({} workers)",
        tasks,
        kind,
        topology.id.short(),
        topology.members.len()
    );

    let mut submitted: Vec<TaskId> = Vec::with_capacity(tasks);
    for n in 0..tasks {
        let mut spec = TaskSpec::new(format!("task-{}", n + 1))
            .with_payload(serde_json::json!({ "n": n + 1 }));
        if chain {
            if let Some(previous) = submitted.last() {
                spec = spec.with_dependencies(vec![*previous]);
            }
        }
        let progress = handle.orchestrate_task(spec).await?;
        submitted.push(progress.task_id);
    }

    let waited = tokio::time::timeout(timeout, async {
        for id in &submitted {
            handle.wait_for_task(*id, POLL).await?;
        }
        Ok::<_, hive::Error>(())
    })
    .await;
    match waited {
        Ok(result) => result?,
        Err(_) => warn!("simulation timed out after {:?}; reporting partial results", timeout),
    }

    let summary = handle.performance_summary().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    handle.teardown_topology(topology.id, Duration::from_secs(5)).await?;
    handle.shutdown();
    Ok(())
}

fn run_config(init: bool) -> Result<()> {
    let config = if init {
        let config = Config::default();
        config.save()?;
        eprintln!("Wrote {}", Config::config_path()?.display());
        config
    } else {
        Config::load()?
    };
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["hive", "simulate"]).unwrap();
        assert!(!cli.debug);
        assert_eq!(
            cli.command,
            Command::Simulate {
                topology: TopologyKind::Mesh,
                max_workers: 4,
                tasks: 8,
                chain: false,
                strategy: TopologyStrategy::Balanced,
                timeout: 30,
            }
        );
    }

    #[test]
    fn test_simulate_parses_topology_and_chain() {
        let cli = Cli::try_parse_from([
            "hive",
            "--debug",
            "simulate",
            "--topology",
            "ring",
            "--max-workers",
            "6",
            "--tasks",
            "3",
            "--chain",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.command {
            Command::Simulate {
                topology,
                max_workers,
                tasks,
                chain,
                ..
            } => {
                assert_eq!(topology, TopologyKind::Ring);
                assert_eq!(max_workers, 6);
                assert_eq!(tasks, 3);
                assert!(chain);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_topology_rejected() {
        let result = Cli::try_parse_from(["hive", "simulate", "--topology", "torus"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_init_flag() {
        let cli = Cli::try_parse_from(["hive", "config", "--init"]).unwrap();
        assert_eq!(cli.command, Command::Config { init: true });
    }
}
