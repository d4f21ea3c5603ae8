use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use etl_common::ProcessError;
use etl_scheduling::{Scheduler, SchedulerConfig};
use etl_process::SystemProcesses;

/// ETL Scheduler - launches pipeline stages and keeps them on schedule
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file path (YAML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "ETL_SCHEDULER_CONFIG",
        default_value = "config/scheduler.yaml",
        global = true
    )]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit console logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Exit after the startup pass instead of staying resident
    #[arg(long)]
    once: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stop the running scheduler and every task process it launched
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug, args.json_logs)?;

    info!("Config file: {}", args.config.display());
    let config = SchedulerConfig::load_from_file(&args.config)?;
    info!("Loaded configuration for {} jobs", config.jobs.len());

    let mut scheduler = Scheduler::new(config, SystemProcesses::new());

    match args.command {
        Some(Command::Stop) => {
            let report = scheduler
                .stop()
                .await
                .map_err(|e| anyhow::anyhow!("Stop failed: {}", e))?;
            info!(
                "Stopped {} task processes, {} failed{}",
                report.tasks_stopped,
                report.tasks_failed,
                if report.timed_out { " (timed out)" } else { "" }
            );
        }
        None => match scheduler.start().await {
            Ok(()) => {
                if args.once {
                    info!("Startup pass complete, exiting (--once)");
                    return Ok(());
                }

                info!("Scheduler running, waiting for due jobs");
                scheduler
                    .run_until(shutdown_signal())
                    .await
                    .context("Scheduler loop failed")?;
                info!("Scheduler shut down");
            }
            Err(ProcessError::AlreadyRunning { pid, .. }) => {
                warn!("Another scheduler is already running (PID {}), nothing to do", pid);
            }
            Err(e) => {
                error!("Failed to start scheduler: {}", e);
                return Err(anyhow::anyhow!("Start failed: {}", e));
            }
        },
    }

    Ok(())
}

fn initialize_logging(debug: bool, json: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM signal"),
                    _ = sigint.recv() => info!("Received SIGINT signal"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers, falling back to Ctrl+C: {}", e);
            }
        }
    }

    if signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C signal");
    }
}
