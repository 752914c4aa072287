// Configuration structures for jobs and the scheduler service

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simulation_clock::{Timestamp, DEFAULT_SPIN_THRESHOLD_US};

use crate::error::SchedulerError;
use crate::{CLOCK_BASED_SCHEDULER, DEFAULT_MAX_CATCH_UP};

/// Reaction to a job exceeding its wall-clock budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeViolationStrategy {
    /// Do nothing
    #[default]
    Ignore,
    /// Publish a warning incident
    Warn,
    /// Publish a critical incident and drop this cycle's outputs
    SkipOutputPublish,
    /// Publish a critical incident, escalate to the error state and cancel the job
    SetErrorState,
}

/// Reaction to an input without a valid sample when the job is due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputViolationStrategy {
    /// Proceed; the input is treated as empty
    #[default]
    Ignore,
    /// Publish a warning incident and proceed
    Warn,
    /// Publish a critical incident, proceed and drop this cycle's outputs
    SkipOutputPublish,
    /// Publish a critical incident, escalate to the error state and fail this execution
    SetErrorState,
}

/// Timing contract of one job input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Artificial reception latency in simulation time
    pub delay_sim_us: Timestamp,

    /// Maximum sample age in simulation time
    pub valid_age_sim_us: Timestamp,

    pub violation_strategy: InputViolationStrategy,
}

impl InputConfig {
    pub fn new(delay_sim_us: Timestamp, valid_age_sim_us: Timestamp) -> Self {
        Self { delay_sim_us, valid_age_sim_us, violation_strategy: InputViolationStrategy::Ignore }
    }

    pub fn with_strategy(mut self, strategy: InputViolationStrategy) -> Self {
        self.violation_strategy = strategy;
        self
    }

    /// Simulation time window `[earliest, latest]` a sample must fall into for a step at `time`
    pub fn window(&self, time: Timestamp) -> (Timestamp, Timestamp) {
        (time - self.valid_age_sim_us, time + self.delay_sim_us)
    }
}

/// Options of one job output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputConfig {}

/// Temporal contract of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfiguration {
    /// Simulation time between two invocations, must be positive
    pub cycle_time_sim_us: Timestamp,

    /// Simulation time offset of the first invocation
    pub first_delay_sim_us: Timestamp,

    /// Wall-clock budget of one invocation, 0 disables the check
    pub max_runtime_real_us: u64,

    /// Wall-clock budget to wait for valid inputs, 0 checks once without waiting
    pub max_input_wait_real_us: u64,

    pub runtime_violation_strategy: TimeViolationStrategy,

    pub inputs: BTreeMap<String, InputConfig>,

    pub outputs: BTreeMap<String, OutputConfig>,
}

impl Default for JobConfiguration {
    fn default() -> Self {
        Self {
            cycle_time_sim_us: 0,
            first_delay_sim_us: 0,
            max_runtime_real_us: 0,
            max_input_wait_real_us: 0,
            runtime_violation_strategy: TimeViolationStrategy::Ignore,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl JobConfiguration {
    pub fn new(cycle_time_sim_us: Timestamp) -> Self {
        Self { cycle_time_sim_us, ..Default::default() }
    }

    pub fn with_first_delay(mut self, first_delay_sim_us: Timestamp) -> Self {
        self.first_delay_sim_us = first_delay_sim_us;
        self
    }

    pub fn with_max_runtime(
        mut self,
        max_runtime_real_us: u64,
        strategy: TimeViolationStrategy,
    ) -> Self {
        self.max_runtime_real_us = max_runtime_real_us;
        self.runtime_violation_strategy = strategy;
        self
    }

    pub fn with_max_input_wait(mut self, max_input_wait_real_us: u64) -> Self {
        self.max_input_wait_real_us = max_input_wait_real_us;
        self
    }

    /// Declare an input. Names must be unique within the job.
    pub fn add_input(&mut self, name: &str, input: InputConfig) -> Result<(), SchedulerError> {
        if self.inputs.contains_key(name) {
            return Err(SchedulerError::DuplicateName { kind: "Input", name: name.to_string() });
        }
        self.inputs.insert(name.to_string(), input);
        Ok(())
    }

    /// Declare an output. Names must be unique within the job.
    pub fn add_output(&mut self, name: &str) -> Result<(), SchedulerError> {
        if self.outputs.contains_key(name) {
            return Err(SchedulerError::DuplicateName { kind: "Output", name: name.to_string() });
        }
        self.outputs.insert(name.to_string(), OutputConfig::default());
        Ok(())
    }

    /// Check the invariants a scheduler relies on. Nothing is coerced to a default.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.cycle_time_sim_us <= 0 {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "cycle time must be positive, got {}us",
                self.cycle_time_sim_us
            )));
        }
        if self.first_delay_sim_us < 0 {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "first delay must not be negative, got {}us",
                self.first_delay_sim_us
            )));
        }
        for (name, input) in &self.inputs {
            if input.delay_sim_us < 0 || input.valid_age_sim_us < 0 {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "input {} has a negative delay or valid age",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Wall-clock runtime budget, `None` when unbounded
    pub fn max_runtime(&self) -> Option<Duration> {
        (self.max_runtime_real_us > 0).then(|| Duration::from_micros(self.max_runtime_real_us))
    }

    /// Get max input wait as Duration
    pub fn max_input_wait(&self) -> Duration {
        Duration::from_micros(self.max_input_wait_real_us)
    }
}

/// Configuration for the SchedulerService
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerServiceConfig {
    /// Name of the active scheduler (default: clock_based_scheduler)
    pub scheduler: String,

    /// Maximum boundaries executed per pass of the continuous scheduling loop
    pub max_catch_up: usize,

    /// Remainder of a wait for the next boundary that is busy-polled instead of slept
    pub spin_threshold_us: u64,
}

impl Default for SchedulerServiceConfig {
    fn default() -> Self {
        Self {
            scheduler: CLOCK_BASED_SCHEDULER.to_string(),
            max_catch_up: DEFAULT_MAX_CATCH_UP,
            spin_threshold_us: DEFAULT_SPIN_THRESHOLD_US,
        }
    }
}

impl SchedulerServiceConfig {
    /// Get spin threshold as Duration
    pub fn spin_threshold(&self) -> Duration {
        Duration::from_micros(self.spin_threshold_us)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulerServiceConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
