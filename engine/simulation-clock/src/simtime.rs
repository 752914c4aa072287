//! Discrete clock stepped by its own worker thread

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::clock::{Clock, ClockEventSink, ClockType, Timestamp};
use crate::discrete::DiscreteClock;
use crate::error::ClockError;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    /// Sleep until `deadline`. Returns false if a stop was requested in the meantime.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        loop {
            if *stopped {
                return false;
            }
            // Spurious and early wakeups are re-checked against the monotonic deadline.
            if Instant::now() >= deadline {
                return true;
            }
            self.condvar.wait_until(&mut stopped, deadline);
        }
    }

    fn raise(&self) {
        *self.stopped.lock() = true;
        self.condvar.notify_all();
    }

    fn clear(&self) {
        *self.stopped.lock() = false;
    }
}

/// Discrete clock that advances by `cycle_time` every `cycle_time / time_factor` of real time.
///
/// A time factor of 0.0 steps as fast as possible. Listener callbacks run on the worker thread;
/// a panicking listener is logged and the worker keeps stepping.
pub struct SimulationTimeClock {
    clock: Arc<DiscreteClock>,
    cycle_time: Timestamp,
    time_factor: f64,
    signal: Arc<StopSignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulationTimeClock {
    pub fn new(name: impl Into<String>, cycle_time: Timestamp, time_factor: f64) -> Self {
        Self {
            clock: Arc::new(DiscreteClock::new(name)),
            cycle_time,
            time_factor,
            signal: Arc::new(StopSignal::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn cycle_time(&self) -> Timestamp {
        self.cycle_time
    }

    pub fn time_factor(&self) -> f64 {
        self.time_factor
    }

    /// Real time between two steps. A factor of 0.0, or one giving no representable interval,
    /// steps as fast as possible.
    pub fn step_interval(&self) -> Duration {
        if self.time_factor == 0.0 {
            return Duration::ZERO;
        }
        let secs = self.cycle_time as f64 / 1_000_000.0 / self.time_factor;
        Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
            tracing::warn!(
                clock = %self.name(),
                cycle_time = self.cycle_time,
                time_factor = self.time_factor,
                "No valid step interval, stepping as fast as possible"
            );
            Duration::ZERO
        })
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

fn step_loop(
    clock: Arc<DiscreteClock>,
    signal: Arc<StopSignal>,
    cycle_time: Timestamp,
    interval: Duration,
) {
    let mut deadline = Instant::now() + interval;
    while signal.wait_until(deadline) {
        let next = clock.time() + cycle_time;
        let step = panic::catch_unwind(AssertUnwindSafe(|| clock.set_new_time(next, true)));
        if let Err(payload) = step {
            tracing::error!(
                clock = %clock.name(),
                time = next,
                "Clock listener panicked: {}",
                panic_message(payload.as_ref())
            );
        }
        deadline = Instant::now() + interval;
    }
    tracing::debug!(clock = %clock.name(), "Step loop exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Clock for SimulationTimeClock {
    fn name(&self) -> &str {
        self.clock.name()
    }

    fn clock_type(&self) -> ClockType {
        ClockType::Discrete
    }

    fn time(&self) -> Timestamp {
        self.clock.time()
    }

    fn reset(&self) {
        self.clock.reset();
    }

    fn start(&self, sink: Weak<dyn ClockEventSink>) -> Result<(), ClockError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(ClockError::AlreadyRunning { name: self.name().to_string() });
        }
        if self.cycle_time <= 0 {
            return Err(ClockError::Config(format!(
                "cycle time of clock {} must be positive, got {}",
                self.name(),
                self.cycle_time
            )));
        }

        self.signal.clear();
        self.clock.start(sink)?;
        self.clock.reset_to(0);

        let clock = self.clock.clone();
        let signal = self.signal.clone();
        let cycle_time = self.cycle_time;
        let interval = self.step_interval();
        let handle = thread::Builder::new()
            .name(format!("clock-{}", self.name()))
            .spawn(move || step_loop(clock, signal, cycle_time, interval))
            .map_err(|e| ClockError::Internal(format!("failed to spawn clock worker: {}", e)));

        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::info!(
                    clock = %self.name(),
                    cycle_time_us = cycle_time,
                    time_factor = self.time_factor,
                    "Simulation time clock started"
                );
                Ok(())
            }
            Err(e) => {
                self.clock.stop()?;
                Err(e)
            }
        }
    }

    fn stop(&self) -> Result<(), ClockError> {
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        self.signal.raise();
        // A listener may stop the clock from the worker itself; joining would never return.
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            tracing::error!(clock = %self.name(), "Clock worker terminated abnormally");
        }
        self.clock.stop()?;
        tracing::info!(
            clock = %self.name(),
            time = self.clock.time(),
            "Simulation time clock stopped"
        );
        Ok(())
    }
}

impl Drop for SimulationTimeClock {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
