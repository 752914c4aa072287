//! Clock abstraction shared by every time source

use std::fmt;
use std::sync::Weak;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ClockError;

/// Simulation time in microseconds
pub type Timestamp = i64;

/// How a clock advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockType {
    /// Time is derived from a free-running source and can be queried at any moment
    Continuous,
    /// Time is pushed in explicit steps through the event sink
    Discrete,
}

impl fmt::Display for ClockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockType::Continuous => write!(f, "continuous"),
            ClockType::Discrete => write!(f, "discrete"),
        }
    }
}

/// Receiver of time changes reported by a clock.
///
/// All callbacks default to no-ops so listeners only implement what they need.
pub trait ClockEventSink: Send + Sync {
    /// A regular update from `old` to `new` is about to be applied
    fn time_update_begin(&self, _old: Timestamp, _new: Timestamp) {}

    /// The clock now reports `new`
    fn time_updating(&self, _new: Timestamp) {}

    /// All listeners have seen the update to `new`
    fn time_update_end(&self, _new: Timestamp) {}

    /// The clock jumps from `old` to `new` outside the regular cadence
    fn time_reset_begin(&self, _old: Timestamp, _new: Timestamp) {}

    /// The reset to `new` is complete
    fn time_reset_end(&self, _new: Timestamp) {}
}

/// One notification produced by a clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockEvent {
    UpdateBegin { old: Timestamp, new: Timestamp },
    Updating { new: Timestamp },
    UpdateEnd { new: Timestamp },
    ResetBegin { old: Timestamp, new: Timestamp },
    ResetEnd { new: Timestamp },
}

impl ClockEvent {
    /// Deliver this event to `sink`
    pub fn dispatch(&self, sink: &dyn ClockEventSink) {
        match *self {
            ClockEvent::UpdateBegin { old, new } => sink.time_update_begin(old, new),
            ClockEvent::Updating { new } => sink.time_updating(new),
            ClockEvent::UpdateEnd { new } => sink.time_update_end(new),
            ClockEvent::ResetBegin { old, new } => sink.time_reset_begin(old, new),
            ClockEvent::ResetEnd { new } => sink.time_reset_end(new),
        }
    }

    /// Time the clock reports once this event has been applied
    pub fn new_time(&self) -> Timestamp {
        match *self {
            ClockEvent::UpdateBegin { new, .. }
            | ClockEvent::Updating { new }
            | ClockEvent::UpdateEnd { new }
            | ClockEvent::ResetBegin { new, .. }
            | ClockEvent::ResetEnd { new } => new,
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, ClockEvent::ResetBegin { .. } | ClockEvent::ResetEnd { .. })
    }

    /// The event pair announcing a jump from `old` to `new`
    pub fn reset_pair(old: Timestamp, new: Timestamp) -> [ClockEvent; 2] {
        [ClockEvent::ResetBegin { old, new }, ClockEvent::ResetEnd { new }]
    }
}

/// A named time source
pub trait Clock: Send + Sync {
    fn name(&self) -> &str;

    fn clock_type(&self) -> ClockType;

    /// Current simulation time
    fn time(&self) -> Timestamp;

    /// Jump back to the clock's origin, notifying the attached sink
    fn reset(&self);

    /// Attach `sink` and begin producing time. The clock keeps only a weak reference.
    fn start(&self, sink: Weak<dyn ClockEventSink>) -> Result<(), ClockError>;

    /// Detach the sink and stop producing time. Calling it on a stopped clock is a no-op.
    fn stop(&self) -> Result<(), ClockError>;
}

/// Holds the sink a running clock reports to
#[derive(Default)]
pub struct SinkSlot {
    sink: RwLock<Option<Weak<dyn ClockEventSink>>>,
}

impl SinkSlot {
    pub fn attach(&self, sink: Weak<dyn ClockEventSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn detach(&self) {
        *self.sink.write() = None;
    }

    /// True while a sink is attached and still alive
    pub fn is_attached(&self) -> bool {
        self.sink.read().as_ref().map(|sink| sink.strong_count() > 0).unwrap_or(false)
    }

    /// Deliver `events` in order. Dropped or missing sinks swallow the events.
    pub fn emit(&self, events: &[ClockEvent]) {
        if events.is_empty() {
            return;
        }
        let sink = self.sink.read().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            for event in events {
                event.dispatch(sink.as_ref());
            }
        }
    }
}

impl fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSlot").field("attached", &self.is_attached()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ClockEvent>>,
    }

    impl ClockEventSink for Recorder {
        fn time_updating(&self, new: Timestamp) {
            self.events.lock().push(ClockEvent::Updating { new });
        }

        fn time_reset_begin(&self, old: Timestamp, new: Timestamp) {
            self.events.lock().push(ClockEvent::ResetBegin { old, new });
        }
    }

    #[test]
    fn test_dispatch_routes_to_matching_callback() {
        let recorder = Recorder::default();
        ClockEvent::Updating { new: 42 }.dispatch(&recorder);
        ClockEvent::ResetBegin { old: 42, new: 0 }.dispatch(&recorder);
        ClockEvent::UpdateEnd { new: 7 }.dispatch(&recorder);

        let events = recorder.events.lock();
        assert_eq!(
            *events,
            vec![ClockEvent::Updating { new: 42 }, ClockEvent::ResetBegin { old: 42, new: 0 }]
        );
    }

    #[test]
    fn test_sink_slot_drops_events_without_sink() {
        let slot = SinkSlot::default();
        assert!(!slot.is_attached());
        slot.emit(&[ClockEvent::Updating { new: 1 }]);

        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn ClockEventSink> = recorder.clone();
        slot.attach(Arc::downgrade(&sink));
        assert!(slot.is_attached());
        slot.emit(&[ClockEvent::Updating { new: 2 }]);

        slot.detach();
        slot.emit(&[ClockEvent::Updating { new: 3 }]);
        assert_eq!(*recorder.events.lock(), vec![ClockEvent::Updating { new: 2 }]);
    }

    #[test]
    fn test_event_time_accessors() {
        assert_eq!(ClockEvent::UpdateBegin { old: 1, new: 2 }.new_time(), 2);
        assert!(ClockEvent::ResetEnd { new: 0 }.is_reset());
        assert!(!ClockEvent::Updating { new: 0 }.is_reset());
        assert_eq!(ClockType::Discrete.to_string(), "discrete");
    }
}
