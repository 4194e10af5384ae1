use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use fwbench_campaign::{CampaignConfig, CampaignDriver, SignalGuard};
use fwbench_process::{PortProbe, ProcessSupervisor};

/// Run every framework under a directory through the same load test
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding one subdirectory per framework (overrides config)
    #[arg(long, value_name = "DIR")]
    frameworks_dir: Option<PathBuf>,

    /// Directory receiving load test reports (overrides config)
    #[arg(long, value_name = "DIR")]
    results_dir: Option<PathBuf>,

    /// Only benchmark these frameworks (repeatable)
    #[arg(long, value_name = "NAME")]
    only: Vec<String>,

    /// Treat versioned directories such as fastify-v5 as frameworks of their own
    #[arg(long)]
    include_versioned: bool,

    /// Exit with status 1 when any framework failed to start or failed under load
    #[arg(long)]
    fail_on_tuple_failure: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.debug)?;

    info!("Starting fwbench");

    let config = load_config(&args)?;
    info!(
        "Frameworks: {}, results: {}",
        config.frameworks_dir.display(),
        config.results_dir.display()
    );

    let supervisor = ProcessSupervisor::new(PortProbe::new(config.free_delay), config.stop_timeout);

    // Cleanup on SIGINT/SIGTERM exits the process from the guard task
    let guard = SignalGuard::install(supervisor.clone()).context("Failed to install signal handlers")?;

    let fail_on_tuple_failure = config.fail_on_tuple_failure;
    let mut driver = CampaignDriver::new(config, supervisor)?;

    let report = match driver.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("Campaign failed: {:#}", e);
            guard.disarm();
            return Err(e);
        }
    };
    guard.disarm();

    let code = report.exit_code(fail_on_tuple_failure);
    if code != 0 {
        error!("Some frameworks failed; exiting with status {}", code);
        std::process::exit(code);
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<CampaignConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Config file: {}", path.display());
            CampaignConfig::load_from_file(path)?
        }
        None => CampaignConfig::default(),
    };

    // Command-line flags override the file
    if let Some(dir) = &args.frameworks_dir {
        config.frameworks_dir = dir.clone();
    }
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }
    if !args.only.is_empty() {
        config.only = args.only.clone();
    }
    config.include_versioned |= args.include_versioned;
    config.fail_on_tuple_failure |= args.fail_on_tuple_failure;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}
