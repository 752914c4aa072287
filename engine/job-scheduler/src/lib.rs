//! # JobScheduler
//!
//! Periodic job execution driven by the participant's main clock.
//!
//! Jobs declare a temporal contract ([`JobConfiguration`]): a cycle time and first delay in
//! simulation time, a wall-clock runtime budget and per-input freshness windows. The
//! [`SchedulerService`] validates and collects jobs and hands them to the active [`Scheduler`]:
//!
//! - `clock_based_scheduler` runs each job at `first_delay + k * cycle_time`, executing every
//!   elapsed boundary in order;
//! - `locked_step_simtime_scheduler` runs every job once per update of a discrete main clock.
//!
//! Violations of a job's contract are handled by its configured strategy and reported through an
//! [`IncidentReporter`].

pub mod clock_based;
pub mod config;
pub mod data;
pub mod error;
pub mod incident;
pub mod job;
pub mod locked_step;
pub mod metrics;
pub mod runtime;
pub mod scheduler;
pub mod sequence;
pub mod service;
pub mod timer;

#[cfg(test)]
mod tests;


pub use clock_based::ClockBasedScheduler;
pub use config::{
    InputConfig, InputViolationStrategy, JobConfiguration, OutputConfig, SchedulerServiceConfig,
    TimeViolationStrategy,
};
pub use data::{validate_inputs, DataAccess, InputVerdict};
pub use error::{JobError, JobResult, SchedulerError};
pub use incident::{IncidentCode, IncidentReporter, LoggingIncidentReporter, Severity};
pub use job::{FnJob, Job, JobEntry, JobInfo};
pub use locked_step::LockedStepScheduler;
pub use metrics::{JobMetrics, MetricsCollector};
pub use runtime::JobRuntimeCheck;
pub use scheduler::{Scheduler, SchedulerState, SchedulingContext, TaskInfo};
pub use sequence::JobSequence;
pub use service::SchedulerService;

/// Current version of the JobScheduler
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the default scheduler
pub const CLOCK_BASED_SCHEDULER: &str = "clock_based_scheduler";

/// Name of the lock-step scheduler for discrete main clocks
pub const LOCKED_STEP_SCHEDULER: &str = "locked_step_simtime_scheduler";

/// Default maximum number of boundaries executed per pass of the continuous scheduling loop
pub const DEFAULT_MAX_CATCH_UP: usize = 1_000;
