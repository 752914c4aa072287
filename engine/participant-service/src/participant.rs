//! Participant lifecycle and component wiring

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use job_scheduler::{LoggingIncidentReporter, SchedulerService, SchedulerState};
use simulation_clock::{ClockService, Timestamp};
use time_sync::{ClockSyncService, LocalTimingBus, SyncMode};

use crate::config::{ParticipantConfig, ServiceConfig};
use crate::jobs::HeartbeatJob;

/// Snapshot of a participant for status reports
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantStatus {
    pub name: String,
    pub main_clock: String,
    pub time: Timestamp,
    pub scheduler: SchedulerState,
    pub heartbeats: u64,
    pub cancelled_jobs: usize,
}

/// One participant: its clocks, scheduler and time sync
pub struct Participant {
    name: String,
    clock_service: Arc<ClockService>,
    scheduler: SchedulerService,
    sync: ClockSyncService,
    incidents: Arc<LoggingIncidentReporter>,
    bus: Arc<LocalTimingBus>,
    jobs: Vec<Arc<HeartbeatJob>>,
}

impl Participant {
    /// Create the participant's services and register its jobs
    pub fn new(config: &ParticipantConfig, bus: Arc<LocalTimingBus>) -> Result<Self> {
        info!(participant = %config.name, "Initializing participant...");

        let clock_service = Arc::new(ClockService::new(config.clock.clone()));
        clock_service
            .set_main_clock(&config.clock.main_clock)
            .with_context(|| format!("Main clock of {} is not available", config.name))?;

        let link = match config.sync.mode {
            SyncMode::NoSync => None,
            _ => Some(bus.master_link(&config.sync.timing_master)),
        };
        let sync =
            ClockSyncService::new(&config.name, config.sync.clone(), clock_service.clone(), link);
        sync.initialize()
            .with_context(|| format!("Failed to initialize clock sync of {}", config.name))?;
        if let Some(master) = sync.clock_master() {
            bus.attach_master(&config.name, master, clock_service.clone());
        }

        let incidents = Arc::new(LoggingIncidentReporter::new());
        let scheduler = SchedulerService::new(
            config.scheduler.clone(),
            clock_service.clone(),
            incidents.clone(),
        );

        let mut jobs = Vec::with_capacity(config.jobs.len());
        for spec in &config.jobs {
            let job = Arc::new(HeartbeatJob::new(&config.name, &spec.name));
            let configuration = spec
                .to_configuration()
                .with_context(|| format!("Invalid configuration of job {}", spec.name))?;
            scheduler
                .add_job(&spec.name, job.clone(), configuration, None)
                .with_context(|| format!("Failed to add job {} to {}", spec.name, config.name))?;
            jobs.push(job);
        }

        info!(
            participant = %config.name,
            main_clock = %clock_service.main_clock_name(),
            scheduler = %scheduler.scheduler_name(),
            jobs = jobs.len(),
            "Participant initialized"
        );
        Ok(Self {
            name: config.name.clone(),
            clock_service,
            scheduler,
            sync,
            incidents,
            bus,
            jobs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_timing_master(&self) -> bool {
        self.sync.is_timing_master()
    }

    pub fn clock_service(&self) -> &Arc<ClockService> {
        &self.clock_service
    }

    pub fn jobs(&self) -> &[Arc<HeartbeatJob>] {
        &self.jobs
    }

    /// Connect to the timing master, then start scheduling and the main clock
    pub fn start(&self) -> Result<()> {
        self.sync.start().context("Failed to start clock sync")?;
        self.scheduler.ready().context("Failed to prepare scheduler")?;
        self.scheduler.start().context("Failed to start scheduler")?;
        self.clock_service.start().context("Failed to start clock service")?;
        info!(participant = %self.name, "Participant started");
        Ok(())
    }

    /// Stop scheduling, the main clock and time sync. Stopping twice is a no-op.
    pub fn stop(&self) -> Result<()> {
        self.scheduler.stop().context("Failed to stop scheduler")?;
        self.clock_service.stop().context("Failed to stop clock service")?;
        self.sync.stop().context("Failed to stop clock sync")?;
        info!(participant = %self.name, "Participant stopped");
        Ok(())
    }

    /// Stop and release everything the participant registered
    pub fn shutdown(&self) -> Result<()> {
        self.stop()?;
        if self.scheduler.state() == SchedulerState::Ready {
            self.scheduler.deinitialize().context("Failed to deinitialize scheduler")?;
        }
        if self.sync.is_timing_master() {
            self.bus.detach_master(&self.name);
        }
        self.sync.deinitialize().context("Failed to deinitialize clock sync")?;
        if self.incidents.is_error_state() {
            warn!(participant = %self.name, "Participant shut down in error state");
        }
        Ok(())
    }

    pub fn status(&self) -> ParticipantStatus {
        ParticipantStatus {
            name: self.name.clone(),
            main_clock: self.clock_service.main_clock_name(),
            time: self.clock_service.time(),
            scheduler: self.scheduler.state(),
            heartbeats: self.jobs.iter().map(|job| job.beats()).sum(),
            cancelled_jobs: self.scheduler.tasks().iter().filter(|task| task.cancelled).count(),
        }
    }

    pub fn health(&self) -> ServiceHealth {
        if self.incidents.is_error_state() {
            ServiceHealth::Degraded
        } else if self.scheduler.state() == SchedulerState::Running {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::Unhealthy
        }
    }
}

/// Every participant of the process, connected through one in-process timing bus
pub struct ParticipantHost {
    participants: Vec<Participant>,
    running: AtomicBool,
}

impl ParticipantHost {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let bus = Arc::new(LocalTimingBus::new());
        let participants = config
            .participants
            .iter()
            .map(|participant| Participant::new(participant, bus.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { participants, running: AtomicBool::new(false) })
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, name: &str) -> Option<&Participant> {
        self.participants.iter().find(|participant| participant.name() == name)
    }

    /// Start followers before timing masters so no master update is missed
    pub fn start(&self) -> Result<()> {
        for participant in self.start_order() {
            participant
                .start()
                .with_context(|| format!("Failed to start participant {}", participant.name()))?;
        }
        self.running.store(true, Ordering::Release);
        info!(participants = self.participants.len(), "All participants started");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        for participant in self.start_order().into_iter().rev() {
            participant.stop()?;
        }
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    pub fn shutdown(&self) -> Result<()> {
        self.stop()?;
        for participant in self.start_order().into_iter().rev() {
            participant.shutdown()?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn health(&self) -> ServiceHealth {
        if !self.is_running() {
            return ServiceHealth::Unhealthy;
        }
        self.participants
            .iter()
            .map(Participant::health)
            .max_by_key(|health| match health {
                ServiceHealth::Healthy => 0,
                ServiceHealth::Degraded => 1,
                ServiceHealth::Unhealthy => 2,
            })
            .unwrap_or(ServiceHealth::Unhealthy)
    }

    pub fn log_status(&self) {
        for participant in &self.participants {
            let status = participant.status();
            info!(
                participant = %status.name,
                main_clock = %status.main_clock,
                time = status.time,
                scheduler = %status.scheduler,
                heartbeats = status.heartbeats,
                cancelled_jobs = status.cancelled_jobs,
                "Participant status"
            );
        }
    }

    fn start_order(&self) -> Vec<&Participant> {
        let (masters, followers): (Vec<&Participant>, Vec<&Participant>) =
            self.participants.iter().partition(|participant| participant.is_timing_master());
        followers.into_iter().chain(masters).collect()
    }
}

/// Service health status
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceHealth {
    Healthy,
    Unhealthy,
    Degraded,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSpec;
    use simulation_clock::{ClockServiceConfig, LOCAL_SYSTEM_SIMTIME};
    use std::thread;
    use std::time::{Duration, Instant};
    use time_sync::ClockSyncConfig;

    fn create_test_config() -> ServiceConfig {
        let hub = ParticipantConfig {
            name: "hub".to_string(),
            clock: ClockServiceConfig {
                main_clock: LOCAL_SYSTEM_SIMTIME.to_string(),
                cycle_time_ms: 10,
                time_factor: 1.0,
            },
            sync: ClockSyncConfig { timing_master: "hub".to_string(), ..Default::default() },
            jobs: vec![JobSpec { cycle_time_ms: 10, ..Default::default() }],
            ..Default::default()
        };
        let follower = ParticipantConfig {
            name: "follower".to_string(),
            sync: ClockSyncConfig {
                mode: SyncMode::OnDemandDiscrete,
                timing_master: "hub".to_string(),
                ..Default::default()
            },
            jobs: vec![JobSpec { cycle_time_ms: 20, ..Default::default() }],
            ..Default::default()
        };
        ServiceConfig { participants: vec![hub, follower], ..Default::default() }
    }

    fn wait_for(predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_follower_runs_on_master_time() {
        let host = ParticipantHost::new(&create_test_config()).unwrap();
        let hub = host.participant("hub").unwrap();
        let follower = host.participant("follower").unwrap();
        assert!(hub.is_timing_master());
        assert_eq!(follower.status().main_clock, time_sync::SLAVE_MASTER_ON_DEMAND_DISCRETE);

        host.start().unwrap();
        assert_eq!(host.health(), ServiceHealth::Healthy);
        wait_for(|| follower.jobs()[0].beats() >= 5);
        host.stop().unwrap();

        let hub_beats = hub.jobs()[0].beats();
        let follower_beats = follower.jobs()[0].beats();
        assert!(follower_beats >= 5);
        // The follower steps on master time with twice the cycle.
        assert!(hub_beats >= follower_beats);
        assert_eq!(follower.jobs()[0].last_time() % 20_000, 0);

        host.shutdown().unwrap();
        assert_eq!(host.health(), ServiceHealth::Unhealthy);
    }

    #[test]
    fn test_unknown_main_clock_is_rejected() {
        let mut config = ServiceConfig::default();
        config.participants[0].clock.main_clock = "sundial".to_string();
        assert!(ParticipantHost::new(&config).is_err());
    }
}
