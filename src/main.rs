//! Read-only view of a hub state directory. Running steps needs an
//! embedding server that supplies agent and client transport.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gpupgrade_core::Segment;
use gpupgrade_hub::initialize::INITIALIZE_STEP;
use gpupgrade_hub::planner::plan_segment;
use gpupgrade_hub::revert::REVERT_STEP;
use gpupgrade_hub::{HubConfig, StepStore};
use gpupgrade_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "gpupgrade-hub", about = "Inspect the gpupgrade hub state directory")]
struct Cli {
    /// State directory. Defaults to $GPUPGRADE_HOME, then $HOME/.gpupgrade.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// Also append logs to gpupgrade_hub.log in this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show where every source segment will live after the upgrade.
    Plan,
    /// Show the running step and the last outcome of each step.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = cli
        .state_dir
        .unwrap_or_else(gpupgrade_hub::config::state_dir_from_env);

    init_telemetry(&TelemetryConfig {
        json: cli.json,
        log_dir: cli.log_dir,
        ..Default::default()
    })?;
    tracing::debug!(state_dir = %state_dir.display(), "using state directory");

    match cli.command {
        Command::Plan => plan(&state_dir),
        Command::Status => status(&state_dir),
    }
}

fn plan(state_dir: &std::path::Path) -> anyhow::Result<()> {
    let config = HubConfig::load(state_dir)
        .with_context(|| format!("load hub config from {}", state_dir.display()))?;
    let cluster = config.source_cluster()?;

    let segments: Vec<&Segment> = cluster.primaries().chain(cluster.mirrors()).collect();
    for segment in segments {
        let planned = plan_segment(segment, &config.ports)?;
        println!(
            "{:>4} {:<7} {}:{} {} -> {}:{} {}",
            segment.content.as_raw(),
            segment.role.to_string(),
            segment.hostname,
            segment.port,
            segment.data_dir.display(),
            planned.hostname,
            planned.port,
            planned.data_dir.display(),
        );
    }
    Ok(())
}

fn status(state_dir: &std::path::Path) -> anyhow::Result<()> {
    let store = StepStore::new(state_dir);

    match store.running()? {
        Some(marker) => println!(
            "running: {} (run {}, started {})",
            marker.step, marker.run_id, marker.started_at
        ),
        None => println!("running: none"),
    }

    for step in [INITIALIZE_STEP, REVERT_STEP] {
        match store.outcome(step)? {
            Some(outcome) => {
                println!(
                    "{step}: {:?} at {} (run {})",
                    outcome.outcome, outcome.finished_at, outcome.run_id
                );
                if let Some(error) = outcome.error {
                    for line in error.lines() {
                        println!("  {line}");
                    }
                }
            }
            None => println!("{step}: never run"),
        }
    }
    Ok(())
}
