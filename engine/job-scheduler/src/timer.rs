//! Per-job timers of the clock-based scheduler.
//!
//! Every job owns a timer holding its next due boundary `first_delay + k * cycle_time`. The core
//! is installed as a listener on the clock service. With a discrete main clock due boundaries
//! are executed on the thread delivering the time update. With a continuous main clock a worker
//! thread polls the clock and executes them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use simulation_clock::{Clock, ClockEventSink, DeadlineTimer, Timestamp};

use crate::error::JobError;
use crate::incident::{IncidentCode, IncidentReporter, Severity};
use crate::runtime::JobRuntimeCheck;

struct JobTimer {
    check: Arc<JobRuntimeCheck>,
    cycle_time: Timestamp,
    first_delay: Timestamp,
    next: Timestamp,
}

impl JobTimer {
    fn anchor(&mut self, time: Timestamp) {
        self.next = time + self.first_delay;
    }
}

/// Timer set shared by the clock-based scheduler, its clock listener and its worker
pub struct TimerCore {
    timers: Mutex<Vec<JobTimer>>,
    incidents: Arc<dyn IncidentReporter>,
    /// Due boundaries run on the thread delivering clock events
    synchronous: bool,
    running: AtomicBool,
    wake: Mutex<bool>,
    condvar: Condvar,
}

impl TimerCore {
    pub fn new(
        checks: &[Arc<JobRuntimeCheck>],
        incidents: Arc<dyn IncidentReporter>,
        synchronous: bool,
    ) -> Self {
        let timers = checks
            .iter()
            .map(|check| {
                let config = &check.info().config;
                JobTimer {
                    check: check.clone(),
                    cycle_time: config.cycle_time_sim_us,
                    first_delay: config.first_delay_sim_us,
                    next: config.first_delay_sim_us,
                }
            })
            .collect();

        Self {
            timers: Mutex::new(timers),
            incidents,
            synchronous,
            running: AtomicBool::new(false),
            wake: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Anchor every timer at `time` and begin reacting to clock events
    pub fn activate(&self, time: Timestamp) {
        self.reanchor(time);
        self.running.store(true, Ordering::Release);
    }

    /// Stop reacting to clock events and wake the worker
    pub fn deactivate(&self) {
        self.running.store(false, Ordering::Release);
        self.notify();
    }

    /// Move every timer's next boundary to `time + first_delay`
    pub fn reanchor(&self, time: Timestamp) {
        for timer in self.timers.lock().iter_mut() {
            timer.anchor(time);
        }
    }

    /// Earliest pending boundary of a job that is not cancelled
    pub fn next_boundary(&self) -> Option<Timestamp> {
        self.timers
            .lock()
            .iter()
            .filter(|timer| !timer.check.is_cancelled())
            .map(|timer| timer.next)
            .min()
    }

    /// Execute boundaries due at `now` in boundary order across jobs, at most `limit` of them.
    ///
    /// Ties between jobs are broken by registration order. Returns the number executed.
    pub fn process_due(&self, now: Timestamp, limit: usize) -> usize {
        let mut executed = 0;
        while executed < limit && self.is_running() {
            let (check, time) = {
                let mut timers = self.timers.lock();
                let due = timers
                    .iter_mut()
                    .filter(|timer| timer.next <= now && !timer.check.is_cancelled())
                    .min_by_key(|timer| timer.next);
                match due {
                    Some(timer) => {
                        let time = timer.next;
                        timer.next += timer.cycle_time;
                        (timer.check.clone(), time)
                    }
                    None => break,
                }
            };

            self.execute(&check, time);
            executed += 1;
        }
        executed
    }

    fn execute(&self, check: &JobRuntimeCheck, time: Timestamp) {
        match check.run(time) {
            Ok(()) => {}
            Err(JobError::Failed(message)) => {
                tracing::debug!(job = %check.name(), time, error = %message, "Job step failed");
            }
            Err(e) => {
                tracing::warn!(job = %check.name(), time, error = %e, "Job step rejected");
            }
        }
    }

    /// Block for at most `timeout` or until woken by a reset or deactivation
    fn wait_for(&self, timeout: Duration) {
        let mut woken = self.wake.lock();
        if !*woken && self.is_running() {
            self.condvar.wait_for(&mut woken, timeout);
        }
        *woken = false;
    }

    fn notify(&self) {
        *self.wake.lock() = true;
        self.condvar.notify_all();
    }
}

impl ClockEventSink for TimerCore {
    fn time_updating(&self, new: Timestamp) {
        if self.synchronous && self.is_running() {
            self.process_due(new, usize::MAX);
        }
    }

    fn time_reset_end(&self, new: Timestamp) {
        if !self.is_running() {
            return;
        }
        tracing::debug!(time = new, "Re-anchoring job timers after clock reset");
        self.reanchor(new);
        if self.synchronous {
            self.process_due(new, usize::MAX);
        } else {
            self.notify();
        }
    }
}

/// Body of the worker thread scheduling against a continuous clock
pub fn run_worker(
    core: Arc<TimerCore>,
    clock: Arc<dyn Clock>,
    max_catch_up: usize,
    spin_threshold: Duration,
) {
    let max_catch_up = max_catch_up.max(1);
    let mut deadline = DeadlineTimer::with_spin_threshold(spin_threshold);
    let mut behind = false;

    tracing::debug!(clock = %clock.name(), "Scheduler worker started");
    while core.is_running() {
        let now = clock.time();
        let executed = core.process_due(now, max_catch_up);

        if executed >= max_catch_up {
            if !behind {
                behind = true;
                let message = format!(
                    "Scheduler fell behind clock {} at {}, executing at most {} steps per pass",
                    clock.name(),
                    now,
                    max_catch_up
                );
                core.incidents.publish_incident(
                    IncidentCode::SchedulerOverrun,
                    Severity::Warning,
                    &message,
                );
            }
            continue;
        }
        if behind {
            behind = false;
            tracing::info!(clock = %clock.name(), time = now, "Scheduler caught up");
        }

        let Some(next) = core.next_boundary() else {
            core.wait_for(Duration::from_millis(100));
            continue;
        };
        let wait_us = next - clock.time();
        if wait_us <= 0 {
            continue;
        }

        let wait = Duration::from_micros(wait_us as u64);
        if wait > spin_threshold {
            core.wait_for(wait - spin_threshold);
        } else {
            deadline.reset(wait);
            deadline.wait();
        }
    }
    tracing::debug!(clock = %clock.name(), "Scheduler worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfiguration;
    use crate::incident::testing::RecordingReporter;
    use crate::job::{FnJob, JobEntry, JobInfo};

    type Log = Arc<Mutex<Vec<(&'static str, Timestamp)>>>;

    fn create_test_check(
        name: &'static str,
        config: JobConfiguration,
        log: &Log,
    ) -> Arc<JobRuntimeCheck> {
        let log = log.clone();
        let job = Arc::new(FnJob::new(move |time| {
            log.lock().push((name, time));
            Ok(())
        }));
        Arc::new(JobRuntimeCheck::new(
            JobEntry::new(JobInfo::new(name, config), job),
            Arc::new(RecordingReporter::default()),
        ))
    }

    #[test]
    fn test_boundaries_interleave_across_jobs() {
        let log: Log = Default::default();
        let checks = vec![
            create_test_check("fast", JobConfiguration::new(50), &log),
            create_test_check("slow", JobConfiguration::new(100).with_first_delay(20), &log),
        ];
        let core = TimerCore::new(&checks, Arc::new(RecordingReporter::default()), true);
        core.activate(0);

        assert_eq!(core.process_due(120, usize::MAX), 5);
        assert_eq!(
            *log.lock(),
            vec![("fast", 0), ("slow", 20), ("fast", 50), ("fast", 100), ("slow", 120)]
        );
        assert_eq!(core.next_boundary(), Some(150));
    }

    #[test]
    fn test_limit_bounds_catch_up() {
        let log: Log = Default::default();
        let checks = vec![create_test_check("job", JobConfiguration::new(10), &log)];
        let core = TimerCore::new(&checks, Arc::new(RecordingReporter::default()), false);
        core.activate(0);

        assert_eq!(core.process_due(95, 4), 4);
        assert_eq!(core.process_due(95, 4), 4);
        assert_eq!(core.process_due(95, 4), 2);
        let times: Vec<_> = log.lock().iter().map(|(_, t)| *t).collect();
        assert_eq!(times, (0..10).map(|k| k * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_reset_reanchors_and_runs_boundary_at_reset_time() {
        let log: Log = Default::default();
        let checks = vec![create_test_check("job", JobConfiguration::new(100), &log)];
        let core = TimerCore::new(&checks, Arc::new(RecordingReporter::default()), true);
        core.activate(0);

        core.time_updating(300);
        assert_eq!(log.lock().len(), 4);

        log.lock().clear();
        core.time_reset_end(1000);
        core.time_updating(1100);
        assert_eq!(*log.lock(), vec![("job", 1000), ("job", 1100)]);
    }

    #[test]
    fn test_inactive_core_ignores_events() {
        let log: Log = Default::default();
        let checks = vec![create_test_check("job", JobConfiguration::new(100), &log)];
        let core = TimerCore::new(&checks, Arc::new(RecordingReporter::default()), true);

        core.time_updating(500);
        assert!(log.lock().is_empty());

        core.activate(0);
        core.deactivate();
        core.time_updating(500);
        assert!(log.lock().is_empty());
    }
}
