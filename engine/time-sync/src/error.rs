// Error types for time synchronization

use simulation_clock::ClockError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Slave {name} is not registered")]
    NotFound { name: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Slave did not acknowledge the time event within {timeout_ms}ms")]
    AckTimeout { timeout_ms: u64 },

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),
}

impl SyncError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        SyncError::Transport(message.into())
    }
}
