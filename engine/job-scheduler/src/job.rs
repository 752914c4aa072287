// Job contract and registration records

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use simulation_clock::Timestamp;

use crate::config::JobConfiguration;
use crate::data::DataAccess;
use crate::error::JobResult;

/// A unit of periodic work.
///
/// A scheduler calls the three hooks in order for every due boundary `time`:
/// `execute_data_in`, `execute`, `execute_data_out`. Output publication is skipped when a
/// violation strategy asks for it.
pub trait Job: Send + Sync {
    /// Read inputs for the step at `time`
    fn execute_data_in(&self, _time: Timestamp) -> JobResult {
        Ok(())
    }

    /// Compute the step at `time`
    fn execute(&self, time: Timestamp) -> JobResult;

    /// Publish outputs of the step at `time`
    fn execute_data_out(&self, _time: Timestamp) -> JobResult {
        Ok(())
    }
}

/// Adapter turning a closure into a [`Job`]
pub struct FnJob<F> {
    step: F,
}

impl<F> FnJob<F>
where
    F: Fn(Timestamp) -> JobResult + Send + Sync,
{
    pub fn new(step: F) -> Self {
        Self { step }
    }
}

impl<F> Job for FnJob<F>
where
    F: Fn(Timestamp) -> JobResult + Send + Sync,
{
    fn execute(&self, time: Timestamp) -> JobResult {
        (self.step)(time)
    }
}

/// Name and timing contract of a registered job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub config: JobConfiguration,
}

impl JobInfo {
    pub fn new(name: impl Into<String>, config: JobConfiguration) -> Self {
        Self { name: name.into(), config }
    }
}

/// A job as handed to a scheduler
#[derive(Clone)]
pub struct JobEntry {
    pub info: JobInfo,
    pub job: Arc<dyn Job>,
    /// Data collaborator used to validate the job's inputs
    pub data: Option<Arc<dyn DataAccess>>,
}

impl JobEntry {
    pub fn new(info: JobInfo, job: Arc<dyn Job>) -> Self {
        Self { info, job, data: None }
    }

    pub fn with_data_access(mut self, data: Arc<dyn DataAccess>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

impl fmt::Debug for JobEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobEntry")
            .field("info", &self.info)
            .field("data", &self.data.is_some())
            .finish()
    }
}
