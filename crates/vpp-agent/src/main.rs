//! vpp-resync entry point.
//!
//! Loads the desired configuration, seeds the in-memory dataplane from an
//! optional snapshot, runs the startup resync once and prints the resulting
//! dataplane operations.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{error, info, warn};
use vpp_agent::audit::{init_logging, init_logging_pretty};
use vpp_agent::config::{load_config, load_snapshot};
use vpp_agent::sim::{DataplaneOp, SimDataplane};
use vpp_agent::{DataplaneSnapshot, ResyncDaemon, ResyncDaemonConfig, ResyncReport, ResyncStrategy};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// VPP dataplane resync
#[derive(Parser, Debug)]
#[command(name = "vpp-resync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Desired configuration (YAML)
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Dataplane snapshot (YAML); the dataplane starts empty without one
    #[arg(short = 's', long)]
    snapshot: Option<PathBuf>,

    /// Overrides the strategy set in the configuration file
    #[arg(long, value_enum)]
    strategy: Option<ResyncStrategy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Write the report and operation plan as JSON to this file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct Plan<'a> {
    report: &'a ResyncReport,
    operations: &'a [DataplaneOp],
}

async fn run(args: &Args) -> anyhow::Result<ResyncReport> {
    let mut config = load_config(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }

    let snapshot = match &args.snapshot {
        Some(path) => load_snapshot(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?,
        None => DataplaneSnapshot::default(),
    };
    info!(
        "Dataplane seeded with {} interfaces, {} BFD sessions, {} DNAT labels",
        snapshot.interfaces.len(),
        snapshot.bfd_sessions.len(),
        snapshot.dnat.len()
    );

    let dataplane = Arc::new(SimDataplane::new(snapshot));
    let daemon = ResyncDaemon::new(
        ResyncDaemonConfig {
            strategy: config.strategy,
            ..Default::default()
        },
        dataplane.clone(),
    );

    let report = daemon.run(config.desired).await;
    let operations = dataplane.ops();

    for op in &operations {
        println!("{}", op);
    }
    for rule in &report.pending_stn_rules {
        warn!("STN rule {} waits for its interface", rule);
    }

    if let Some(path) = &args.output {
        let plan = Plan {
            report: &report,
            operations: &operations,
        };
        let json = serde_json::to_string_pretty(&plan).context("serializing operation plan")?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Operation plan written to {}", path.display());
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match args.log_format {
        LogFormat::Pretty => init_logging_pretty(&args.log_level),
        LogFormat::Json => init_logging(&args.log_level),
    }

    info!("Starting vpp-resync");

    match run(&args).await {
        Ok(report) if report.skipped => {
            info!("Nothing to resync");
            ExitCode::SUCCESS
        }
        Ok(report) if report.is_success() => {
            info!("Resync completed");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            for failure in report.failures() {
                error!(
                    "{}: {}",
                    failure.family,
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("vpp-resync failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
