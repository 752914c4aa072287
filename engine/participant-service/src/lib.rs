//! Simulation participant host library
//!
//! Configuration loading, logging setup, signal handling and the lifecycle of the participants a
//! process hosts. Each participant owns a ClockService, a SchedulerService and a
//! ClockSyncService; participants of one process share a LocalTimingBus.

use std::path::Path;

use anyhow::{Context, Result};

pub mod config;
pub mod jobs;
pub mod logging;
pub mod participant;
pub mod signals;

pub use config::{JobSpec, LoggingConfig, ParticipantConfig, ServiceConfig, ServiceSettings};
pub use jobs::HeartbeatJob;
pub use logging::initialize_logging;
pub use participant::{Participant, ParticipantHost, ParticipantStatus, ServiceHealth};
pub use signals::{graceful_shutdown, setup_signal_handlers, wait_for_shutdown, ShutdownReason};

/// Load configuration from an optional file and environment variables
pub fn load_configuration(path: Option<&Path>) -> Result<ServiceConfig> {
    config::load_config(path).context("Failed to load service configuration")
}
