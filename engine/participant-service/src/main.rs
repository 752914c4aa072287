//! Simulation participant service
//!
//! Hosts the configured participants, starts their clocks and schedulers and shuts them down
//! gracefully on SIGINT/SIGTERM or after the configured run time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use participant_service::{
    config::validate_config, graceful_shutdown, initialize_logging, load_configuration,
    setup_signal_handlers, wait_for_shutdown, ParticipantHost,
};

#[derive(Parser, Debug)]
#[command(name = "sim-participant", version, about = "Run simulation participants")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (plain, pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    run_for: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Some(secs) = cli.run_for {
        config.service.run_for_secs = Some(secs);
    }
    validate_config(&config).context("Invalid command line override")?;

    initialize_logging(&config.logging)?;
    info!("Starting simulation participant service v{}", env!("CARGO_PKG_VERSION"));

    let host = Arc::new(ParticipantHost::new(&config).context("Failed to create participants")?);
    let shutdown = setup_signal_handlers()?;
    host.start()?;

    let status_interval = match config.service.status_interval_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let run_for = config.service.run_for_secs.map(Duration::from_secs);
    info!("Participants are running. Press Ctrl+C to shutdown gracefully.");
    let reason = wait_for_shutdown(&shutdown, run_for, status_interval, || host.log_status());

    info!(?reason, "Initiating graceful shutdown...");
    host.log_status();
    graceful_shutdown(host, Duration::from_secs(config.service.shutdown_timeout_secs))?;

    info!("Simulation participant service shutdown complete");
    Ok(())
}
