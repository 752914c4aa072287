// Incident reporting collaborator

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Severity of a reported incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// What went wrong during a scheduled execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentCode {
    /// An input had no valid sample when the job became due
    InputViolation,
    /// A job exceeded its wall-clock budget
    RuntimeViolation,
    /// A job's execute hook returned an error
    ExecutionFailure,
    /// Reading inputs failed
    DataInFailure,
    /// Publishing outputs failed
    DataOutFailure,
    /// The scheduler fell behind the clock
    SchedulerOverrun,
}

impl fmt::Display for IncidentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IncidentCode::InputViolation => "input_violation",
            IncidentCode::RuntimeViolation => "runtime_violation",
            IncidentCode::ExecutionFailure => "execution_failure",
            IncidentCode::DataInFailure => "data_in_failure",
            IncidentCode::DataOutFailure => "data_out_failure",
            IncidentCode::SchedulerOverrun => "scheduler_overrun",
        };
        f.write_str(text)
    }
}

/// Sink for incidents raised during scheduled execution.
///
/// `set_error_state` asks the owning participant to move towards its error state; the state
/// transition itself belongs to the participant.
pub trait IncidentReporter: Send + Sync {
    fn publish_incident(&self, code: IncidentCode, severity: Severity, message: &str);

    fn set_error_state(&self);
}

/// Reporter that writes incidents to the log and remembers escalations
#[derive(Debug, Default)]
pub struct LoggingIncidentReporter {
    error_state: AtomicBool,
}

impl LoggingIncidentReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_error_state(&self) -> bool {
        self.error_state.load(Ordering::Acquire)
    }

    pub fn clear_error_state(&self) {
        self.error_state.store(false, Ordering::Release);
    }
}

impl IncidentReporter for LoggingIncidentReporter {
    fn publish_incident(&self, code: IncidentCode, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(incident = %code, "{}", message),
            Severity::Warning => tracing::warn!(incident = %code, "{}", message),
            Severity::Critical => tracing::error!(incident = %code, "{}", message),
        }
    }

    fn set_error_state(&self) {
        if !self.error_state.swap(true, Ordering::AcqRel) {
            tracing::error!("Escalating participant to error state");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Reporter that keeps every incident for assertions
    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        pub incidents: Mutex<Vec<(IncidentCode, Severity, String)>>,
        pub error_state: AtomicBool,
    }

    impl RecordingReporter {
        pub fn codes(&self) -> Vec<(IncidentCode, Severity)> {
            self.incidents.lock().iter().map(|(code, severity, _)| (*code, *severity)).collect()
        }

        pub fn escalated(&self) -> bool {
            self.error_state.load(Ordering::Acquire)
        }
    }

    impl IncidentReporter for RecordingReporter {
        fn publish_incident(&self, code: IncidentCode, severity: Severity, message: &str) {
            self.incidents.lock().push((code, severity, message.to_string()));
        }

        fn set_error_state(&self) {
            self.error_state.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_reporter_remembers_escalation() {
        let reporter = LoggingIncidentReporter::new();
        reporter.publish_incident(IncidentCode::RuntimeViolation, Severity::Warning, "slow");
        assert!(!reporter.is_error_state());

        reporter.set_error_state();
        reporter.set_error_state();
        assert!(reporter.is_error_state());

        reporter.clear_error_state();
        assert!(!reporter.is_error_state());
    }

    #[test]
    fn test_incident_code_display() {
        assert_eq!(IncidentCode::InputViolation.to_string(), "input_violation");
        assert!(Severity::Critical > Severity::Warning);
    }
}
