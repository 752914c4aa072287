// Composite job running its members in order

use std::sync::Arc;

use parking_lot::RwLock;
use simulation_clock::Timestamp;

use crate::error::JobResult;
use crate::job::Job;

/// A job that runs an ordered list of member jobs.
///
/// Members are shared with their owners, the sequence only keeps a reference. Execution stops at
/// the first failing member and returns its error; later members do not run for that step.
/// Names are for introspection only and need not be unique.
#[derive(Default)]
pub struct JobSequence {
    members: RwLock<Vec<(String, Arc<dyn Job>)>>,
}

impl JobSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member
    pub fn add_job(&self, name: impl Into<String>, job: Arc<dyn Job>) {
        self.members.write().push((name.into(), job));
    }

    pub fn clear_jobs(&self) {
        self.members.write().clear();
    }

    pub fn job_names(&self) -> Vec<String> {
        self.members.read().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl JobSequence {
    /// Run one phase over the members in order, stopping at the first failure
    fn run_members(
        &self,
        phase: &'static str,
        time: Timestamp,
        run: impl Fn(&dyn Job) -> JobResult,
    ) -> JobResult {
        let members = self.members.read().clone();
        for (name, job) in members {
            if let Err(e) = run(job.as_ref()) {
                tracing::debug!(member = %name, phase, time, error = %e, "Sequence member failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Job for JobSequence {
    fn execute_data_in(&self, time: Timestamp) -> JobResult {
        self.run_members("data_in", time, |job| job.execute_data_in(time))
    }

    fn execute(&self, time: Timestamp) -> JobResult {
        self.run_members("execute", time, |job| job.execute(time))
    }

    fn execute_data_out(&self, time: Timestamp) -> JobResult {
        self.run_members("data_out", time, |job| job.execute_data_out(time))
    }
}
