//! Default scheduler running every job on its own cycle of the main clock

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use simulation_clock::{ClockEventSink, ClockType};

use crate::error::SchedulerError;
use crate::job::JobEntry;
use crate::runtime::JobRuntimeCheck;
use crate::scheduler::{runtime_checks, Scheduler, SchedulerState, SchedulingContext, TaskInfo};
use crate::timer::{run_worker, TimerCore};
use crate::CLOCK_BASED_SCHEDULER;

struct Inner {
    state: SchedulerState,
    context: Option<SchedulingContext>,
    checks: Vec<Arc<JobRuntimeCheck>>,
    core: Option<Arc<TimerCore>>,
    sink: Option<Arc<dyn ClockEventSink>>,
    worker: Option<JoinHandle<()>>,
}

/// Executes each job at `first_delay + k * cycle_time` of the main clock.
///
/// Against a discrete main clock due jobs run on the thread delivering the time update, against
/// a continuous one on a dedicated worker thread.
pub struct ClockBasedScheduler {
    inner: Mutex<Inner>,
}

impl ClockBasedScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SchedulerState::Idle,
                context: None,
                checks: Vec::new(),
                core: None,
                sink: None,
                worker: None,
            }),
        }
    }
}

impl Default for ClockBasedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ClockBasedScheduler {
    fn name(&self) -> &str {
        CLOCK_BASED_SCHEDULER
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

        let clock = context.clock_service.main_clock()?;
        let synchronous = clock.clock_type() == ClockType::Discrete;
        let core = Arc::new(TimerCore::new(&inner.checks, context.incidents.clone(), synchronous));

        // Querying a continuous clock may report a reset, which the core must not see yet.
        let now = clock.time();
        core.activate(now);

        let sink: Arc<dyn ClockEventSink> = core.clone();
        context.clock_service.register_event_sink(sink.clone());

        if !synchronous {
            let worker_core = core.clone();
            let worker_clock = clock.clone();
            let max_catch_up = context.config.max_catch_up;
            let spin_threshold = context.config.spin_threshold();
            let spawned = thread::Builder::new()
                .name(format!("scheduler-{}", clock.name()))
                .spawn(move || run_worker(worker_core, worker_clock, max_catch_up, spin_threshold));
            match spawned {
                Ok(handle) => inner.worker = Some(handle),
                Err(e) => {
                    core.deactivate();
                    if let Err(e) = context.clock_service.unregister_event_sink(&sink) {
                        tracing::warn!(
                            scheduler = self.name(),
                            error = %e,
                            "Failed to detach scheduler after worker spawn failure"
                        );
                    }
                    return Err(SchedulerError::Internal(format!(
                        "failed to spawn scheduler worker: {}",
                        e
                    )));
                }
            }
        }

        inner.core = Some(core);
        inner.sink = Some(sink);
        inner.state = SchedulerState::Running;
        tracing::info!(
            scheduler = self.name(),
            clock = %clock.name(),
            clock_type = %clock.clock_type(),
            time = now,
            "Scheduler started"
        );
        Ok(())
    }

    fn stop(&self) -> Result<(), SchedulerError> {
        let (core, sink, worker, context) = {
            let mut inner = self.inner.lock();
            if inner.state != SchedulerState::Running {
                return Ok(());
            }
            inner.state = SchedulerState::Ready;
            (inner.core.take(), inner.sink.take(), inner.worker.take(), inner.context.clone())
        };

        if let Some(core) = core {
            core.deactivate();
        }
        if let (Some(sink), Some(context)) = (sink, context) {
            if let Err(e) = context.clock_service.unregister_event_sink(&sink) {
                tracing::warn!(scheduler = self.name(), error = %e, "Clock listener already gone");
            }
        }
        if let Some(handle) = worker {
            // A job may stop the scheduler from the worker itself; joining would never return.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!(scheduler = self.name(), "Scheduler worker terminated abnormally");
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

impl Drop for ClockBasedScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Failed to stop scheduler on drop: {}", e);
        }
    }
}
