// Error types for job scheduling

use simulation_clock::{ClockError, Timestamp};
use thiserror::Error;

/// Errors returned synchronously by scheduler registration and lifecycle calls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("{kind} {name} is already registered")]
    DuplicateName { kind: &'static str, name: String },

    #[error("{kind} {name} is not registered")]
    NotFound { kind: &'static str, name: String },

    #[error("Operation {operation} is not allowed while {component} is {state}")]
    InvalidState { component: String, operation: &'static str, state: String },

    #[error("Invalid job configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Scheduler {name} cannot be unregistered")]
    DefaultScheduler { name: String },

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a single job invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("Input {input} of job {job} has no valid sample for time {time}")]
    InputViolation { job: String, input: String, time: Timestamp },

    #[error("Job {job} ran {runtime_us}us, exceeding its budget of {budget_us}us")]
    RuntimeViolation { job: String, runtime_us: u64, budget_us: u64 },

    #[error("Job {job} is cancelled")]
    Cancelled { job: String },
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }
}

/// Result of a job hook
pub type JobResult = Result<(), JobError>;
