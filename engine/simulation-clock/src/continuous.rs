//! Continuous clocks derived from a free-running time source

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Instant;

use parking_lot::Mutex;

use crate::clock::{Clock, ClockEvent, ClockEventSink, ClockType, SinkSlot, Timestamp};
use crate::error::ClockError;

/// Raw time provider behind a [`ContinuousClock`]
pub trait TimeSource: Send + Sync {
    /// Current source time; must be a pure query
    fn new_time(&self) -> Timestamp;

    /// Re-zero the source and return the time it now reports
    fn reset_time(&self) -> Timestamp;
}

/// Monotonic wall-clock time minus a resettable offset
#[derive(Debug)]
pub struct SystemTimeSource {
    offset: Mutex<Instant>,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self { offset: Mutex::new(Instant::now()) }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn new_time(&self) -> Timestamp {
        self.offset.lock().elapsed().as_micros() as Timestamp
    }

    fn reset_time(&self) -> Timestamp {
        *self.offset.lock() = Instant::now();
        0
    }
}

#[derive(Debug, Default)]
struct ContinuousState {
    current: Timestamp,
    initialized: bool,
}

/// Clock whose time is queried from a [`TimeSource`] on demand.
///
/// The first query after `start` re-zeros the source and reports a reset. A source that runs
/// backwards is reported as a reset as well, so listeners never see time decrease through a
/// regular update.
pub struct ContinuousClock<S: TimeSource = SystemTimeSource> {
    name: String,
    source: S,
    state: Mutex<ContinuousState>,
    sink: SinkSlot,
    emit_lock: Mutex<()>,
    running: AtomicBool,
}

impl ContinuousClock<SystemTimeSource> {
    /// Clock backed by the local monotonic system time
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_source(name, SystemTimeSource::new())
    }
}

impl<S: TimeSource> ContinuousClock<S> {
    pub fn with_source(name: impl Into<String>, source: S) -> Self {
        Self {
            name: name.into(),
            source,
            state: Mutex::new(ContinuousState::default()),
            sink: SinkSlot::default(),
            emit_lock: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn emit(&self, events: &[ClockEvent]) {
        let _guard = self.emit_lock.lock();
        self.sink.emit(events);
    }
}

impl<S: TimeSource> Clock for ContinuousClock<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn clock_type(&self) -> ClockType {
        ClockType::Continuous
    }

    fn time(&self) -> Timestamp {
        let (current, reset) = {
            let mut state = self.state.lock();
            let old = state.current;
            if !state.initialized {
                state.current = self.source.reset_time();
                state.initialized = true;
                (state.current, Some(ClockEvent::reset_pair(old, state.current)))
            } else {
                let new = self.source.new_time();
                state.current = new;
                if new < old {
                    tracing::debug!(clock = %self.name, old, new, "Time source ran backwards");
                    (new, Some(ClockEvent::reset_pair(old, new)))
                } else {
                    (new, None)
                }
            }
        };

        if let Some(events) = reset {
            self.emit(&events);
        }
        current
    }

    fn reset(&self) {
        let events = {
            let mut state = self.state.lock();
            let old = state.current;
            state.current = self.source.reset_time();
            state.initialized = true;
            ClockEvent::reset_pair(old, state.current)
        };
        self.emit(&events);
    }

    fn start(&self, sink: Weak<dyn ClockEventSink>) -> Result<(), ClockError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ClockError::AlreadyRunning { name: self.name.clone() });
        }
        self.sink.attach(sink);
        self.state.lock().initialized = false;
        tracing::debug!(clock = %self.name, "Continuous clock started");
        Ok(())
    }

    fn stop(&self) -> Result<(), ClockError> {
        if self.running.swap(false, Ordering::AcqRel) {
            self.sink.detach();
            tracing::debug!(clock = %self.name, "Continuous clock stopped");
        }
        Ok(())
    }
}
