//! Service configuration management

use std::collections::HashSet;
use std::path::Path;

use ::config::{Config, Environment, File};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use job_scheduler::{JobConfiguration, SchedulerServiceConfig, TimeViolationStrategy};
use simulation_clock::{checked_millis, ClockServiceConfig};
use time_sync::{ClockSyncConfig, SyncMode};

/// Prefix of environment variables overriding the configuration, e.g. `SIMTIME__LOGGING__LEVEL`
pub const ENV_PREFIX: &str = "SIMTIME";

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service-level configuration
    pub service: ServiceSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Participants hosted by this process
    pub participants: Vec<ParticipantConfig>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,

    /// Interval between status reports in seconds, 0 disables them
    pub status_interval_secs: u64,

    /// Stop after this many seconds instead of waiting for a signal
    pub run_for_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`
    pub level: String,

    /// Log format (plain, pretty, json)
    pub format: String,

    /// Level of the simulation clock crate, defaults to `level`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock: Option<String>,

    /// Level of the job scheduler crate, defaults to `level`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,

    /// Level of the time sync crate, defaults to `level`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<String>,
}

/// One simulation participant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub name: String,
    pub clock: ClockServiceConfig,
    pub scheduler: SchedulerServiceConfig,
    pub sync: ClockSyncConfig,
    pub jobs: Vec<JobSpec>,
}

/// A heartbeat job hosted by a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    pub name: String,
    pub cycle_time_ms: i64,
    pub first_delay_ms: i64,
    /// Wall-clock budget per invocation in microseconds, 0 disables the check
    pub max_runtime_us: u64,
    pub runtime_violation_strategy: TimeViolationStrategy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            logging: LoggingConfig::default(),
            participants: vec![ParticipantConfig::default()],
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { shutdown_timeout_secs: 10, status_interval_secs: 5, run_for_secs: None }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
            clock: None,
            scheduler: None,
            sync: None,
        }
    }
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            name: "participant".to_string(),
            clock: ClockServiceConfig::default(),
            scheduler: SchedulerServiceConfig::default(),
            sync: ClockSyncConfig::default(),
            jobs: vec![JobSpec::default()],
        }
    }
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            name: "heartbeat".to_string(),
            cycle_time_ms: 1_000,
            first_delay_ms: 0,
            max_runtime_us: 0,
            runtime_violation_strategy: TimeViolationStrategy::Warn,
        }
    }
}

impl JobSpec {
    /// Job configuration in simulation microseconds, validated
    pub fn to_configuration(&self) -> Result<JobConfiguration> {
        let cycle_time = checked_millis(self.cycle_time_ms).ok_or_else(|| {
            anyhow!("Cycle time of {} overflows: {}ms", self.name, self.cycle_time_ms)
        })?;
        let first_delay = checked_millis(self.first_delay_ms).ok_or_else(|| {
            anyhow!("First delay of {} overflows: {}ms", self.name, self.first_delay_ms)
        })?;
        let configuration = JobConfiguration::new(cycle_time)
            .with_first_delay(first_delay)
            .with_max_runtime(self.max_runtime_us, self.runtime_violation_strategy);
        configuration.validate()?;
        Ok(configuration)
    }
}

/// Load configuration from an optional TOML file and `SIMTIME__*` environment variables
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true));

    let config: ServiceConfig = builder
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    let logging = &config.logging;
    let crate_levels = [&logging.clock, &logging.scheduler, &logging.sync];
    for level in std::iter::once(&logging.level).chain(crate_levels.into_iter().flatten()) {
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow!("Invalid log level: {}", level)),
        }
    }

    match config.logging.format.as_str() {
        "plain" | "pretty" | "json" => {}
        _ => return Err(anyhow!("Invalid log format: {}", config.logging.format)),
    }

    if config.participants.is_empty() {
        return Err(anyhow!("No participants configured"));
    }

    let mut names = HashSet::new();
    for participant in &config.participants {
        if !names.insert(participant.name.as_str()) {
            return Err(anyhow!("Duplicate participant name: {}", participant.name));
        }
    }

    for participant in &config.participants {
        participant
            .sync
            .validate()
            .with_context(|| format!("Invalid sync configuration of {}", participant.name))?;

        // Only the in-process transport is available, so a master must be hosted here.
        let master = &participant.sync.timing_master;
        if participant.sync.mode != SyncMode::NoSync && !names.contains(master.as_str()) {
            return Err(anyhow!(
                "Timing master {} of {} is not hosted by this process",
                master,
                participant.name
            ));
        }

        for job in &participant.jobs {
            job.to_configuration().with_context(|| {
                format!("Invalid configuration of job {} on {}", job.name, participant.name)
            })?;
        }
    }

    Ok(())
}

/// Save configuration to a TOML file
pub fn save_config(config: &ServiceConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write configuration to {:?}", path))?;
    Ok(())
}
