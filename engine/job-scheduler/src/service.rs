//! Registry of schedulers and jobs, and the participant-facing scheduling lifecycle

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use simulation_clock::ClockService;

use crate::clock_based::ClockBasedScheduler;
use crate::config::{JobConfiguration, SchedulerServiceConfig};
use crate::data::DataAccess;
use crate::error::SchedulerError;
use crate::incident::IncidentReporter;
use crate::job::{Job, JobEntry, JobInfo};
use crate::locked_step::LockedStepScheduler;
use crate::scheduler::{Scheduler, SchedulerState, SchedulingContext, TaskInfo};
use crate::CLOCK_BASED_SCHEDULER;

const COMPONENT: &str = "SchedulerService";

struct Inner {
    schedulers: BTreeMap<String, Arc<dyn Scheduler>>,
    active: String,
    /// Registration order is execution order for ties and lock-step
    jobs: Vec<JobEntry>,
    state: SchedulerState,
}

impl Inner {
    fn require(
        &self,
        expected: SchedulerState,
        operation: &'static str,
    ) -> Result<(), SchedulerError> {
        self.state.require(expected, COMPONENT, operation)
    }

    fn active(&self) -> Result<Arc<dyn Scheduler>, SchedulerError> {
        self.schedulers.get(&self.active).cloned().ok_or_else(|| SchedulerError::NotFound {
            kind: "Scheduler",
            name: self.active.clone(),
        })
    }
}

/// Holds a participant's jobs and hands them to the active scheduler.
///
/// Jobs and schedulers can only be changed while idle. `ready` initializes the active scheduler
/// with the clock service and the registered jobs, `start` and `stop` toggle execution.
pub struct SchedulerService {
    inner: Mutex<Inner>,
    clock_service: Arc<ClockService>,
    incidents: Arc<dyn IncidentReporter>,
    config: SchedulerServiceConfig,
}

impl SchedulerService {
    /// Create a service with the built-in schedulers registered
    pub fn new(
        config: SchedulerServiceConfig,
        clock_service: Arc<ClockService>,
        incidents: Arc<dyn IncidentReporter>,
    ) -> Self {
        let mut schedulers: BTreeMap<String, Arc<dyn Scheduler>> = BTreeMap::new();
        for scheduler in [
            Arc::new(ClockBasedScheduler::new()) as Arc<dyn Scheduler>,
            Arc::new(LockedStepScheduler::new()),
        ] {
            schedulers.insert(scheduler.name().to_string(), scheduler);
        }

        let active = if schedulers.contains_key(&config.scheduler) {
            config.scheduler.clone()
        } else {
            tracing::warn!(
                scheduler = %config.scheduler,
                fallback = CLOCK_BASED_SCHEDULER,
                "Configured scheduler not found, falling back to default"
            );
            CLOCK_BASED_SCHEDULER.to_string()
        };
        tracing::info!(scheduler = %active, "Creating SchedulerService");

        Self {
            inner: Mutex::new(Inner {
                schedulers,
                active,
                jobs: Vec::new(),
                state: SchedulerState::Idle,
            }),
            clock_service,
            incidents,
            config,
        }
    }

    pub fn register_scheduler(&self, scheduler: Arc<dyn Scheduler>) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.require(SchedulerState::Idle, "register_scheduler")?;

        let name = scheduler.name().to_string();
        if inner.schedulers.contains_key(&name) {
            return Err(SchedulerError::DuplicateName { kind: "Scheduler", name });
        }
        tracing::info!(scheduler = %name, "Registered scheduler");
        inner.schedulers.insert(name, scheduler);
        Ok(())
    }

    /// Remove a scheduler. Removing the active one selects the default scheduler.
    pub fn unregister_scheduler(&self, name: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.require(SchedulerState::Idle, "unregister_scheduler")?;

        if name == CLOCK_BASED_SCHEDULER {
            return Err(SchedulerError::DefaultScheduler { name: name.to_string() });
        }
        if inner.schedulers.remove(name).is_none() {
            return Err(SchedulerError::NotFound { kind: "Scheduler", name: name.to_string() });
        }
        if inner.active == name {
            tracing::warn!(
                scheduler = %name,
                fallback = CLOCK_BASED_SCHEDULER,
                "Unregistered the active scheduler, falling back to default"
            );
            inner.active = CLOCK_BASED_SCHEDULER.to_string();
        }
        Ok(())
    }

    pub fn set_scheduler(&self, name: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.require(SchedulerState::Idle, "set_scheduler")?;

        if !inner.schedulers.contains_key(name) {
            return Err(SchedulerError::NotFound { kind: "Scheduler", name: name.to_string() });
        }
        inner.active = name.to_string();
        tracing::info!(scheduler = %name, "Scheduler selected");
        Ok(())
    }

    pub fn scheduler_name(&self) -> String {
        self.inner.lock().active.clone()
    }

    pub fn scheduler_names(&self) -> Vec<String> {
        self.inner.lock().schedulers.keys().cloned().collect()
    }

    /// Register a job after validating its configuration
    pub fn add_job(
        &self,
        name: &str,
        job: Arc<dyn Job>,
        config: JobConfiguration,
        data: Option<Arc<dyn DataAccess>>,
    ) -> Result<(), SchedulerError> {
        config.validate()?;

        let mut inner = self.inner.lock();
        inner.require(SchedulerState::Idle, "add_job")?;
        if inner.jobs.iter().any(|entry| entry.name() == name) {
            return Err(SchedulerError::DuplicateName { kind: "Job", name: name.to_string() });
        }

        tracing::info!(
            job = %name,
            cycle_time_us = config.cycle_time_sim_us,
            first_delay_us = config.first_delay_sim_us,
            "Registered job"
        );
        let mut entry = JobEntry::new(JobInfo::new(name, config), job);
        entry.data = data;
        inner.jobs.push(entry);
        Ok(())
    }

    pub fn remove_job(&self, name: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.require(SchedulerState::Idle, "remove_job")?;

        let before = inner.jobs.len();
        inner.jobs.retain(|entry| entry.name() != name);
        if inner.jobs.len() == before {
            return Err(SchedulerError::NotFound { kind: "Job", name: name.to_string() });
        }
        tracing::info!(job = %name, "Removed job");
        Ok(())
    }

    /// Registered jobs in registration order
    pub fn jobs(&self) -> Vec<JobInfo> {
        self.inner.lock().jobs.iter().map(|entry| entry.info.clone()).collect()
    }

    /// Scheduled jobs with their execution metrics, empty unless the service is ready or running
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let scheduler = self.inner.lock().active();
        scheduler.map(|scheduler| scheduler.tasks()).unwrap_or_default()
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    /// Hand the registered jobs to the active scheduler
    pub fn ready(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.require(SchedulerState::Idle, "ready")?;

        let scheduler = inner.active()?;
        let context = SchedulingContext {
            clock_service: self.clock_service.clone(),
            incidents: self.incidents.clone(),
            config: self.config.clone(),
        };
        scheduler.initialize(context, inner.jobs.clone())?;
        inner.state = SchedulerState::Ready;
        tracing::info!(scheduler = %scheduler.name(), jobs = inner.jobs.len(), "Scheduling ready");
        Ok(())
    }

    pub fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = {
            let inner = self.inner.lock();
            inner.require(SchedulerState::Ready, "start")?;
            inner.active()?
        };

        scheduler.start()?;
        self.inner.lock().state = SchedulerState::Running;
        Ok(())
    }

    /// Stop execution. Stopping a service that is not running is a no-op.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        let scheduler = {
            let mut inner = self.inner.lock();
            if inner.state != SchedulerState::Running {
                return Ok(());
            }
            inner.state = SchedulerState::Ready;
            inner.active()?
        };

        // Jobs may be running on this thread or the scheduler's worker; neither holds our lock.
        scheduler.stop()
    }

    /// Take the jobs back from the active scheduler
    pub fn deinitialize(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.require(SchedulerState::Ready, "deinitialize")?;

        inner.active()?.deinitialize()?;
        inner.state = SchedulerState::Idle;
        tracing::info!("Scheduling deinitialized");
        Ok(())
    }
}

impl Drop for SchedulerService {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Failed to stop SchedulerService on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::testing::RecordingReporter;
    use crate::job::FnJob;
    use crate::LOCKED_STEP_SCHEDULER;

    fn create_test_service() -> SchedulerService {
        SchedulerService::new(
            SchedulerServiceConfig::default(),
            Arc::new(ClockService::default()),
            Arc::new(RecordingReporter::default()),
        )
    }

    fn noop_job() -> Arc<dyn Job> {
        Arc::new(FnJob::new(|_| Ok(())))
    }

    #[test]
    fn test_builtin_schedulers() {
        let service = create_test_service();
        assert_eq!(service.scheduler_name(), CLOCK_BASED_SCHEDULER);
        assert_eq!(
            service.scheduler_names(),
            vec![CLOCK_BASED_SCHEDULER.to_string(), LOCKED_STEP_SCHEDULER.to_string()]
        );
    }

    #[test]
    fn test_unknown_configured_scheduler_falls_back() {
        let config =
            SchedulerServiceConfig { scheduler: "round_robin".to_string(), ..Default::default() };
        let service = SchedulerService::new(
            config,
            Arc::new(ClockService::default()),
            Arc::new(RecordingReporter::default()),
        );
        assert_eq!(service.scheduler_name(), CLOCK_BASED_SCHEDULER);
    }

    #[test]
    fn test_scheduler_registry() {
        let service = create_test_service();

        let err = service.register_scheduler(Arc::new(LockedStepScheduler::new())).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::DuplicateName {
                kind: "Scheduler",
                name: LOCKED_STEP_SCHEDULER.to_string()
            }
        );

        assert!(matches!(
            service.set_scheduler("missing"),
            Err(SchedulerError::NotFound { kind: "Scheduler", .. })
        ));
        assert!(matches!(
            service.unregister_scheduler(CLOCK_BASED_SCHEDULER),
            Err(SchedulerError::DefaultScheduler { .. })
        ));

        service.set_scheduler(LOCKED_STEP_SCHEDULER).unwrap();
        service.unregister_scheduler(LOCKED_STEP_SCHEDULER).unwrap();
        assert_eq!(service.scheduler_name(), CLOCK_BASED_SCHEDULER);
    }

    #[test]
    fn test_job_registry() {
        let service = create_test_service();
        service.add_job("a", noop_job(), JobConfiguration::new(100), None).unwrap();
        service.add_job("b", noop_job(), JobConfiguration::new(200), None).unwrap();

        assert!(matches!(
            service.add_job("a", noop_job(), JobConfiguration::new(100), None),
            Err(SchedulerError::DuplicateName { kind: "Job", .. })
        ));
        assert!(matches!(
            service.add_job("zero", noop_job(), JobConfiguration::new(0), None),
            Err(SchedulerError::InvalidConfiguration(_))
        ));

        let names: Vec<_> = service.jobs().into_iter().map(|info| info.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        service.remove_job("a").unwrap();
        assert!(matches!(service.remove_job("a"), Err(SchedulerError::NotFound { .. })));
        assert_eq!(service.jobs().len(), 1);
    }

    #[test]
    fn test_lifecycle() {
        let service = create_test_service();
        service.add_job("a", noop_job(), JobConfiguration::new(100), None).unwrap();
        assert!(service.tasks().is_empty());

        assert!(matches!(service.start(), Err(SchedulerError::InvalidState { .. })));
        service.ready().unwrap();
        assert_eq!(service.tasks().len(), 1);

        assert!(matches!(
            service.add_job("b", noop_job(), JobConfiguration::new(100), None),
            Err(SchedulerError::InvalidState { .. })
        ));
        assert!(service.set_scheduler(LOCKED_STEP_SCHEDULER).is_err());

        service.start().unwrap();
        assert_eq!(service.state(), SchedulerState::Running);
        service.stop().unwrap();
        service.stop().unwrap();
        assert_eq!(service.state(), SchedulerState::Ready);

        service.deinitialize().unwrap();
        assert_eq!(service.state(), SchedulerState::Idle);
        assert!(service.tasks().is_empty());
    }
}
