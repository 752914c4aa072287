//! Configuration for the clock service

use crate::clock::Timestamp;
use crate::{
    checked_millis, millis, DEFAULT_CYCLE_TIME_MS, DEFAULT_MAIN_CLOCK, DEFAULT_TIME_FACTOR,
    MIN_TIME_FACTOR,
};
use serde::{Deserialize, Serialize};

/// Configuration for the ClockService and its built-in clocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockServiceConfig {
    /// Name of the clock that drives the participant (default: local_system_realtime)
    pub main_clock: String,

    /// Step of the built-in simulation time clock in milliseconds (default: 100ms)
    pub cycle_time_ms: i64,

    /// Simulation time per real time for the built-in simulation time clock.
    /// 0.0 runs as fast as possible.
    pub time_factor: f64,
}

impl Default for ClockServiceConfig {
    fn default() -> Self {
        Self {
            main_clock: DEFAULT_MAIN_CLOCK.to_string(),
            cycle_time_ms: DEFAULT_CYCLE_TIME_MS,
            time_factor: DEFAULT_TIME_FACTOR,
        }
    }
}

impl ClockServiceConfig {
    /// Cycle time of the built-in simulation time clock in microseconds.
    ///
    /// Non-positive values and values overflowing microseconds fall back to the default.
    pub fn effective_cycle_time(&self) -> Timestamp {
        match checked_millis(self.cycle_time_ms) {
            Some(cycle_time) if cycle_time > 0 => cycle_time,
            _ => {
                tracing::warn!(
                    cycle_time_ms = self.cycle_time_ms,
                    default_ms = DEFAULT_CYCLE_TIME_MS,
                    "Invalid simulation clock cycle time, using default"
                );
                millis(DEFAULT_CYCLE_TIME_MS)
            }
        }
    }

    /// Time factor of the built-in simulation time clock.
    ///
    /// 0.0 is kept (as fast as possible). Anything else below the minimum, or not finite, falls
    /// back to the default.
    pub fn effective_time_factor(&self) -> f64 {
        if self.time_factor == 0.0 {
            0.0
        } else if !self.time_factor.is_finite() || self.time_factor < MIN_TIME_FACTOR {
            tracing::warn!(
                time_factor = self.time_factor,
                default = DEFAULT_TIME_FACTOR,
                "Invalid simulation clock time factor, using default"
            );
            DEFAULT_TIME_FACTOR
        } else {
            self.time_factor
        }
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ClockServiceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
