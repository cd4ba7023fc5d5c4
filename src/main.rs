use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod utils;

use battery_pipeline::{run_postprocess, run_prepare, LocalBackend, PipelineConfig};
use crate::utils::conf_helper::{init_config, ConfigOverrides};

#[derive(Debug, Parser)]
#[command(name = "battery-pipeline", about = "Battery cycling data preparation and health metrics")]
struct Cli {
    /// Pipeline configuration file.
    #[arg(long, default_value = "pipeline.json")]
    config: PathBuf,

    /// Override the job identifier from the config file.
    #[arg(long)]
    job_id: Option<String>,

    /// Override the checkpoint cycle from the config file.
    #[arg(long)]
    checkpoint: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split the raw dataset into forecaster input and UI work areas.
    Prepare,
    /// Import the forecast export and compute SOH/RUL plot data.
    Postprocess,
    /// Prepare, then postprocess.
    Run,
}

async fn execute(command: Command, config: &PipelineConfig) -> anyhow::Result<()> {
    let storage = LocalBackend::new(&config.storage_root);

    if matches!(command, Command::Prepare | Command::Run) {
        let report = run_prepare(&storage, config)
            .await
            .context("prepare job failed")?;
        info!(
            "Prepare done: checkpoint {}, {} test cells, {} train / {} test records, {} warnings",
            report.checkpoint,
            report.test_cells.len(),
            report.train_records,
            report.test_records,
            report.warnings.len()
        );
    }

    if matches!(command, Command::Postprocess | Command::Run) {
        let report = run_postprocess(&storage, config)
            .await
            .context("postprocess job failed")?;
        for (segment, rows) in &report.segments {
            info!("  {}: {} rows", segment, rows);
        }
        info!(
            "Postprocess done: {} batteries, {} files, {} warnings",
            report.batteries,
            report.outputs.len(),
            report.warnings.len()
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // === CONFIG ===
    let overrides = ConfigOverrides {
        job_id: cli.job_id,
        checkpoint: cli.checkpoint,
    };
    let config = init_config(&cli.config, overrides)
        .await
        .context("CRITICAL INIT FAILURE")?;

    if let Err(e) = execute(cli.command, config).await {
        error!("Job {} aborted, nothing committed: {:#}", config.job_id, e);
        return Err(e);
    }

    Ok(())
}
