//! Scheduler contract shared by the scheduling strategies

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use simulation_clock::ClockService;

use crate::config::{JobConfiguration, SchedulerServiceConfig};
use crate::error::SchedulerError;
use crate::incident::IncidentReporter;
use crate::job::JobEntry;
use crate::metrics::JobMetrics;
use crate::runtime::JobRuntimeCheck;

/// Lifecycle of a scheduler and of the scheduler service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// No jobs handed over
    Idle,
    /// Initialized with jobs, not executing
    Ready,
    /// Executing jobs on clock events
    Running,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Ready => write!(f, "ready"),
            SchedulerState::Running => write!(f, "running"),
        }
    }
}

impl SchedulerState {
    /// Fail with InvalidState unless the current state is `expected`
    pub fn require(
        self,
        expected: SchedulerState,
        component: &str,
        operation: &'static str,
    ) -> Result<(), SchedulerError> {
        if self == expected {
            Ok(())
        } else {
            Err(SchedulerError::InvalidState {
                component: component.to_string(),
                operation,
                state: self.to_string(),
            })
        }
    }
}

/// Collaborators a scheduler works with while initialized
#[derive(Clone)]
pub struct SchedulingContext {
    pub clock_service: Arc<ClockService>,
    pub incidents: Arc<dyn IncidentReporter>,
    pub config: SchedulerServiceConfig,
}

impl fmt::Debug for SchedulingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulingContext").field("config", &self.config).finish()
    }
}

/// Introspection record of one scheduled job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub config: JobConfiguration,
    pub metrics: JobMetrics,
    pub cancelled: bool,
}

impl TaskInfo {
    pub(crate) fn from_check(check: &JobRuntimeCheck) -> Self {
        Self {
            name: check.name().to_string(),
            config: check.info().config.clone(),
            metrics: check.metrics(),
            cancelled: check.is_cancelled(),
        }
    }
}

/// Strategy deciding when the jobs of a participant run.
///
/// Lifecycle: `initialize` (Idle to Ready), `start` (Ready to Running), `stop` (Running to Ready,
/// no-op otherwise), `deinitialize` (Ready to Idle). `tasks` may be called in any state.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> SchedulerState;

    fn initialize(
        &self,
        context: SchedulingContext,
        jobs: Vec<JobEntry>,
    ) -> Result<(), SchedulerError>;

    fn start(&self) -> Result<(), SchedulerError>;

    fn stop(&self) -> Result<(), SchedulerError>;

    fn deinitialize(&self) -> Result<(), SchedulerError>;

    fn tasks(&self) -> Vec<TaskInfo>;
}

/// Wrap every job in a runtime check reporting to `incidents`
pub(crate) fn runtime_checks(
    jobs: Vec<JobEntry>,
    incidents: &Arc<dyn IncidentReporter>,
) -> Vec<Arc<JobRuntimeCheck>> {
    jobs.into_iter().map(|entry| Arc::new(JobRuntimeCheck::new(entry, incidents.clone()))).collect()
}
