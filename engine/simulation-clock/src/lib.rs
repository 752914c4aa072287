//! # SimulationClock
//!
//! Time sources for a distributed simulation participant.
//!
//! Clocks come in two flavours: continuous clocks derive time from a free-running source and can be
//! queried at any moment, discrete clocks push explicit time steps through a [`ClockEventSink`].
//! The [`ClockService`] owns every named clock of a participant, selects the main clock and fans
//! its events out to the scheduler and, on a timing master, to remote participants.

pub mod clock;
pub mod config;
pub mod continuous;
pub mod deadline;
pub mod discrete;
pub mod error;
pub mod service;
pub mod simtime;



pub use clock::{Clock, ClockEvent, ClockEventSink, ClockType, SinkSlot, Timestamp};
pub use config::ClockServiceConfig;
pub use continuous::{ContinuousClock, SystemTimeSource, TimeSource};
pub use deadline::DeadlineTimer;
pub use discrete::DiscreteClock;
pub use error::ClockError;
pub use service::{ClockService, ClockServiceState};
pub use simtime::SimulationTimeClock;

/// Current version of the SimulationClock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Built-in continuous clock backed by the local system time
pub const LOCAL_SYSTEM_REALTIME: &str = "local_system_realtime";

/// Built-in discrete clock stepped by a local worker thread
pub const LOCAL_SYSTEM_SIMTIME: &str = "local_system_simtime";

/// Main clock used when none is configured or the configured one disappears
pub const DEFAULT_MAIN_CLOCK: &str = LOCAL_SYSTEM_REALTIME;

/// Default step of the simulation time clock (100ms)
pub const DEFAULT_CYCLE_TIME_MS: i64 = 100;

/// Default ratio of simulation time to real time
pub const DEFAULT_TIME_FACTOR: f64 = 1.0;

/// Smallest accepted time factor other than 0.0
pub const MIN_TIME_FACTOR: f64 = 0.1;

/// Default busy-wait tail of a precision wait
pub const DEFAULT_SPIN_THRESHOLD_US: u64 = 1_000;

/// Convert milliseconds to simulation time
pub const fn millis(ms: i64) -> Timestamp {
    ms * 1_000
}

/// Convert milliseconds to simulation time, `None` if the result does not fit a [`Timestamp`]
pub const fn checked_millis(ms: i64) -> Option<Timestamp> {
    ms.checked_mul(1_000)
}
