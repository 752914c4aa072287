//! Configuration for clock synchronization

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_SYNC_CYCLE_TIME_MS, SLAVE_MASTER_ON_DEMAND,
    SLAVE_MASTER_ON_DEMAND_DISCRETE,
};

/// How a participant obtains its time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Local clocks only
    #[default]
    NoSync,
    /// Interpolate a continuous master between periodic time requests
    OnDemand,
    /// Step along with every update of the master's clock
    OnDemandDiscrete,
}

impl SyncMode {
    /// Name of the slave clock this mode installs as main clock
    pub fn slave_clock(&self) -> Option<&'static str> {
        match self {
            SyncMode::NoSync => None,
            SyncMode::OnDemand => Some(SLAVE_MASTER_ON_DEMAND),
            SyncMode::OnDemandDiscrete => Some(SLAVE_MASTER_ON_DEMAND_DISCRETE),
        }
    }

    /// Mode implied by selecting `main_clock` as the participant's main clock
    pub fn from_main_clock(main_clock: &str) -> Self {
        match main_clock {
            SLAVE_MASTER_ON_DEMAND => SyncMode::OnDemand,
            SLAVE_MASTER_ON_DEMAND_DISCRETE => SyncMode::OnDemandDiscrete,
            _ => SyncMode::NoSync,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSyncConfig {
    pub mode: SyncMode,
    /// Participant owning the authoritative clock. Empty when no participant is timing master.
    pub timing_master: String,
    /// Interval between time requests to a continuous master (0 selects the default)
    pub sync_cycle_time_ms: u64,
    /// How long the master waits for a discrete slave to apply an event (0 selects the default)
    pub ack_timeout_ms: u64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::NoSync,
            timing_master: String::new(),
            sync_cycle_time_ms: DEFAULT_SYNC_CYCLE_TIME_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
        }
    }
}

impl ClockSyncConfig {
    pub fn sync_cycle(&self) -> Duration {
        match self.sync_cycle_time_ms {
            0 => Duration::from_millis(DEFAULT_SYNC_CYCLE_TIME_MS),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        match self.ack_timeout_ms {
            0 => Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.mode != SyncMode::NoSync && self.timing_master.is_empty() {
            return Err(SyncError::InvalidArgument(format!(
                "sync mode {:?} requires a timing master",
                self.mode
            )));
        }
        Ok(())
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ClockSyncConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClockSyncConfig::default();
        assert_eq!(config.mode, SyncMode::NoSync);
        assert_eq!(config.sync_cycle(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_durations_use_defaults() {
        let config =
            ClockSyncConfig { sync_cycle_time_ms: 0, ack_timeout_ms: 0, ..Default::default() };
        assert_eq!(config.sync_cycle(), Duration::from_millis(DEFAULT_SYNC_CYCLE_TIME_MS));
        assert_eq!(config.ack_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_on_demand_requires_timing_master() {
        let mut config = ClockSyncConfig { mode: SyncMode::OnDemand, ..Default::default() };
        assert!(matches!(config.validate(), Err(SyncError::InvalidArgument(_))));

        config.timing_master = "hub".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_from_main_clock() {
        assert_eq!(SyncMode::from_main_clock(SLAVE_MASTER_ON_DEMAND), SyncMode::OnDemand);
        assert_eq!(
            SyncMode::from_main_clock(SLAVE_MASTER_ON_DEMAND_DISCRETE),
            SyncMode::OnDemandDiscrete
        );
        assert_eq!(SyncMode::from_main_clock("local_system_realtime"), SyncMode::NoSync);
        assert_eq!(SyncMode::OnDemandDiscrete.slave_clock(), Some(SLAVE_MASTER_ON_DEMAND_DISCRETE));
    }

    #[test]
    fn test_parse_toml() {
        let config: ClockSyncConfig =
            toml::from_str("mode = \"on_demand_discrete\"\ntiming_master = \"hub\"").unwrap();
        assert_eq!(config.mode, SyncMode::OnDemandDiscrete);
        assert_eq!(config.timing_master, "hub");
        assert_eq!(config.sync_cycle_time_ms, DEFAULT_SYNC_CYCLE_TIME_MS);
        assert_eq!(config.ack_timeout_ms, DEFAULT_ACK_TIMEOUT_MS);
    }
}
