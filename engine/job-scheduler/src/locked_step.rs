//! Scheduler stepping every job on every update of a discrete main clock

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use simulation_clock::{ClockEventSink, ClockType, Timestamp};

use crate::error::{JobError, SchedulerError};
use crate::job::JobEntry;
use crate::runtime::JobRuntimeCheck;
use crate::scheduler::{runtime_checks, Scheduler, SchedulerState, SchedulingContext, TaskInfo};
use crate::LOCKED_STEP_SCHEDULER;

/// Clock listener running all jobs, in registration order, once per time update
struct StepDriver {
    checks: Vec<Arc<JobRuntimeCheck>>,
    running: AtomicBool,
}

impl StepDriver {
    fn step(&self, time: Timestamp) {
        for check in &self.checks {
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            match check.run(time) {
                Ok(()) | Err(JobError::Cancelled { .. }) => {}
                Err(e) => tracing::debug!(job = %check.name(), time, error = %e, "Job step failed"),
            }
        }
    }
}

impl ClockEventSink for StepDriver {
    fn time_updating(&self, new: Timestamp) {
        self.step(new);
    }
}

struct Inner {
    state: SchedulerState,
    context: Option<SchedulingContext>,
    checks: Vec<Arc<JobRuntimeCheck>>,
    driver: Option<Arc<StepDriver>>,
    sink: Option<Arc<dyn ClockEventSink>>,
}

/// Lock-step scheduling against a discrete main clock.
///
/// Job cycle times are not consulted: every update executes every job exactly once with the new
/// time. Resets only move the time base and execute nothing.
pub struct LockedStepScheduler {
    inner: Mutex<Inner>,
}

impl LockedStepScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SchedulerState::Idle,
                context: None,
                checks: Vec::new(),
                driver: None,
                sink: None,
            }),
        }
    }
}

impl Default for LockedStepScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for LockedStepScheduler {
    fn name(&self) -> &str {
        LOCKED_STEP_SCHEDULER
    }

    fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    fn initialize(
        &self,
        context: SchedulingContext,
        jobs: Vec<JobEntry>,
    ) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.state.require(SchedulerState::Idle, self.name(), "initialize")?;

        inner.checks = runtime_checks(jobs, &context.incidents);
        inner.context = Some(context);
        inner.state = SchedulerState::Ready;
        tracing::info!(scheduler = self.name(), jobs = inner.checks.len(), "Scheduler initialized");
        Ok(())
    }

    fn start(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.state.require(SchedulerState::Ready, self.name(), "start")?;
        let context = inner
            .context
            .clone()
            .ok_or_else(|| SchedulerError::Internal("scheduler has no context".to_string()))?;

        let clock_type = context.clock_service.clock_type()?;
        if clock_type != ClockType::Discrete {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "{} requires a discrete main clock, {} is {}",
                self.name(),
                context.clock_service.main_clock_name(),
                clock_type
            )));
        }

        let driver =
            Arc::new(StepDriver { checks: inner.checks.clone(), running: AtomicBool::new(true) });
        let sink: Arc<dyn ClockEventSink> = driver.clone();
        context.clock_service.register_event_sink(sink.clone());

        inner.driver = Some(driver);
        inner.sink = Some(sink);
        inner.state = SchedulerState::Running;
        tracing::info!(
            scheduler = self.name(),
            clock = %context.clock_service.main_clock_name(),
            "Scheduler started"
        );
        Ok(())
    }

    fn stop(&self) -> Result<(), SchedulerError> {
        let (driver, sink, context) = {
            let mut inner = self.inner.lock();
            if inner.state != SchedulerState::Running {
                return Ok(());
            }
            inner.state = SchedulerState::Ready;
            (inner.driver.take(), inner.sink.take(), inner.context.clone())
        };

        if let Some(driver) = driver {
            driver.running.store(false, Ordering::Release);
        }
        if let (Some(sink), Some(context)) = (sink, context) {
            if let Err(e) = context.clock_service.unregister_event_sink(&sink) {
                tracing::warn!(scheduler = self.name(), error = %e, "Clock listener already gone");
            }
        }
        tracing::info!(scheduler = self.name(), "Scheduler stopped");
        Ok(())
    }

    fn deinitialize(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        inner.state.require(SchedulerState::Ready, self.name(), "deinitialize")?;
        inner.checks.clear();
        inner.context = None;
        inner.state = SchedulerState::Idle;
        tracing::info!(scheduler = self.name(), "Scheduler deinitialized");
        Ok(())
    }

    fn tasks(&self) -> Vec<TaskInfo> {
        self.inner.lock().checks.iter().map(|check| TaskInfo::from_check(check)).collect()
    }
}

impl Drop for LockedStepScheduler {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
