//! Logging and tracing setup
//!
//! The clock, scheduler and sync crates log under their crate names, so each can be tuned
//! separately from the service itself. Worker threads are named after their clock
//! (`clock-*`, `scheduler-*`, `time-sync-*`), which is why every format prints thread names.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, prelude::*, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Filter directives derived from the logging configuration.
///
/// Crates without an explicit level follow the global one.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let level = config.level.as_str();
    let crate_levels = [
        ("participant_service", None),
        ("simulation_clock", config.clock.as_deref()),
        ("job_scheduler", config.scheduler.as_deref()),
        ("time_sync", config.sync.as_deref()),
    ];

    let mut directives = vec![level.to_string()];
    directives.extend(
        crate_levels
            .iter()
            .map(|(target, crate_level)| format!("{}={}", target, crate_level.unwrap_or(level))),
    );
    directives.join(",")
}

/// Initialize logging and tracing.
///
/// `RUST_LOG` replaces the configured directives entirely.
pub fn initialize_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config))
            .context("Failed to build log filter from configuration")?,
    };

    let fmt_layer = match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_current_span(false)
            .with_thread_names(true)
            .boxed(),
        "pretty" => fmt::layer().pretty().with_thread_names(true).with_line_number(true).boxed(),
        _ => fmt::layer().compact().with_thread_names(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
