//! fleetd — the Fleetgrid daemon.
//!
//! Single binary that assembles the fleet control loops:
//! - State store (redb)
//! - Node monitor (health refresh)
//! - Queue telemetry sampler (RabbitMQ management API)
//! - Strategy runner (busy-queue scaling)
//!
//! # Usage
//!
//! ```text
//! fleetd run --data-dir /var/lib/fleetgrid
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleet_nodes::{NodeClientPool, NodeMonitor};
use fleet_scheduler::{StrategyConfig, StrategyRunner};
use fleet_state::StateStore;
use fleet_telemetry::QueueSampler;

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleetgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all control loops in one process.
    Run {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        /// Node RPC timeout in seconds.
        #[arg(long, default_value = "30")]
        node_timeout: u64,

        /// Node health refresh interval in seconds.
        #[arg(long, default_value = "30")]
        node_refresh_interval: u64,

        /// Queue telemetry sampling interval in seconds.
        #[arg(long, default_value = "60")]
        sample_interval: u64,

        /// Scheduling pass interval in seconds.
        #[arg(long, default_value = "60")]
        schedule_interval: u64,

        /// Queue samples retained per model.
        #[arg(long, default_value = "1000")]
        queue_history_max: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetd=debug,fleet=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            data_dir,
            node_timeout,
            node_refresh_interval,
            sample_interval,
            schedule_interval,
            queue_history_max,
        } => {
            run(
                data_dir,
                node_timeout,
                node_refresh_interval,
                sample_interval,
                schedule_interval,
                queue_history_max,
            )
            .await
        }
    }
}

async fn run(
    data_dir: PathBuf,
    node_timeout: u64,
    node_refresh_interval: u64,
    sample_interval: u64,
    schedule_interval: u64,
    queue_history_max: usize,
) -> anyhow::Result<()> {
    info!("Fleetgrid daemon starting");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("fleetgrid.redb");

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // One client pool shared by the monitor and the scheduler, so a
    // node's connection is reused across loops.
    let pool = Arc::new(NodeClientPool::new(Duration::from_secs(node_timeout)));

    let monitor = NodeMonitor::new(state.clone(), pool.clone());
    info!(interval = node_refresh_interval, "node monitor initialized");

    let sampler = QueueSampler::new(state.clone(), queue_history_max)?;
    info!(
        interval = sample_interval,
        retention = queue_history_max,
        "queue sampler initialized"
    );

    let runner = StrategyRunner::new(state, pool, StrategyConfig::default());
    info!(interval = schedule_interval, "strategy runner initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_shutdown = shutdown_rx.clone();
    let sampler_shutdown = shutdown_rx.clone();
    let runner_shutdown = shutdown_rx;

    let monitor_handle = tokio::spawn(async move {
        monitor
            .run(Duration::from_secs(node_refresh_interval), monitor_shutdown)
            .await;
    });

    let sampler_handle = tokio::spawn(async move {
        sampler
            .run(Duration::from_secs(sample_interval), sampler_shutdown)
            .await;
    });

    let runner_handle = tokio::spawn(async move {
        runner
            .run(Duration::from_secs(schedule_interval), runner_shutdown)
            .await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = monitor_handle.await;
    let _ = sampler_handle.await;
    let _ = runner_handle.await;

    info!("Fleetgrid daemon stopped");
    Ok(())
}
