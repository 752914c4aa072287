//! Error types for the clock layer

use thiserror::Error;

/// Errors that can occur while registering, selecting or driving clocks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Clock {name} is already registered")]
    DuplicateName { name: String },

    #[error("Clock {name} is not registered")]
    NotFound { name: String },

    #[error("Operation {operation} is not allowed while the clock service is {state}")]
    InvalidState { operation: &'static str, state: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Clock {name} is built in and cannot be unregistered")]
    BuiltinClock { name: String },

    #[error("Clock {name} is already running")]
    AlreadyRunning { name: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClockError {
    pub(crate) fn not_found(name: &str) -> Self {
        ClockError::NotFound { name: name.to_string() }
    }

    pub(crate) fn duplicate(name: &str) -> Self {
        ClockError::DuplicateName { name: name.to_string() }
    }
}
