//! Externally driven discrete clock

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;

use crate::clock::{Clock, ClockEvent, ClockEventSink, ClockType, SinkSlot, Timestamp};
use crate::error::ClockError;

#[derive(Debug, Default)]
struct DiscreteState {
    current: Timestamp,
    initialized: bool,
}

/// Clock whose time only changes when [`DiscreteClock::set_new_time`] is called.
///
/// The first update after start, and any update that moves time backwards, is delivered as a
/// reset. Event delivery is serialized, so listeners observe updates in the order they were set.
pub struct DiscreteClock {
    name: String,
    state: Mutex<DiscreteState>,
    sink: SinkSlot,
    emit_lock: Mutex<()>,
    running: AtomicBool,
}

impl DiscreteClock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DiscreteState::default()),
            sink: SinkSlot::default(),
            emit_lock: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    /// Advance to `new`. With `with_begin_end` the update is framed by begin/end notifications.
    pub fn set_new_time(&self, new: Timestamp, with_begin_end: bool) {
        let _guard = self.emit_lock.lock();
        let (old, reset) = {
            let mut state = self.state.lock();
            let old = state.current;
            let reset = !state.initialized || new < old;
            state.current = new;
            state.initialized = true;
            (old, reset)
        };

        if reset {
            self.sink.emit(&ClockEvent::reset_pair(old, new));
        } else if with_begin_end {
            self.sink.emit(&[
                ClockEvent::UpdateBegin { old, new },
                ClockEvent::Updating { new },
                ClockEvent::UpdateEnd { new },
            ]);
        } else {
            self.sink.emit(&[ClockEvent::Updating { new }]);
        }
    }

    /// Jump to `new` and report it as a reset regardless of direction
    pub fn reset_to(&self, new: Timestamp) {
        let _guard = self.emit_lock.lock();
        let old = {
            let mut state = self.state.lock();
            let old = state.current;
            state.current = new;
            state.initialized = true;
            old
        };
        self.sink.emit(&ClockEvent::reset_pair(old, new));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Clock for DiscreteClock {
    fn name(&self) -> &str {
        &self.name
    }

    fn clock_type(&self) -> ClockType {
        ClockType::Discrete
    }

    fn time(&self) -> Timestamp {
        self.state.lock().current
    }

    fn reset(&self) {
        self.reset_to(0);
    }

    fn start(&self, sink: Weak<dyn ClockEventSink>) -> Result<(), ClockError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ClockError::AlreadyRunning { name: self.name.clone() });
        }
        self.state.lock().initialized = false;
        self.sink.attach(sink);
        tracing::debug!(clock = %self.name, "Discrete clock started");
        Ok(())
    }

    fn stop(&self) -> Result<(), ClockError> {
        if self.running.swap(false, Ordering::AcqRel) {
            self.sink.detach();
            tracing::debug!(clock = %self.name, "Discrete clock stopped");
        }
        Ok(())
    }
}
