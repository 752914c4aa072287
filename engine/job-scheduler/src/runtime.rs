// Execution wrapper applying a job's timing contract

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use simulation_clock::Timestamp;

use crate::config::TimeViolationStrategy;
use crate::data::validate_inputs;
use crate::error::{JobError, JobResult};
use crate::incident::{IncidentCode, IncidentReporter, Severity};
use crate::job::{JobEntry, JobInfo};
use crate::metrics::{JobMetrics, MetricsCollector};

/// Runs one job step by step, validating its inputs, timing its execution and applying the
/// configured violation strategies.
///
/// Once cancelled (by an escalating runtime violation) every later step is refused.
pub struct JobRuntimeCheck {
    entry: JobEntry,
    incidents: Arc<dyn IncidentReporter>,
    cancelled: AtomicBool,
    metrics: MetricsCollector,
}

impl JobRuntimeCheck {
    pub fn new(entry: JobEntry, incidents: Arc<dyn IncidentReporter>) -> Self {
        Self {
            entry,
            incidents,
            cancelled: AtomicBool::new(false),
            metrics: MetricsCollector::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn info(&self) -> &JobInfo {
        &self.entry.info
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> JobMetrics {
        self.metrics.get_metrics()
    }

    /// Run the step due at simulation time `time`
    pub fn run(&self, time: Timestamp) -> JobResult {
        if self.is_cancelled() {
            return Err(JobError::Cancelled { job: self.name().to_string() });
        }

        let config = &self.entry.info.config;
        let mut skip_output = false;

        if let Some(data) = &self.entry.data {
            let verdict =
                validate_inputs(self.name(), config, data.as_ref(), time, self.incidents.as_ref());
            if !verdict.missing.is_empty() {
                self.metrics.record_input_violation();
            }
            if let Some(e) = verdict.error {
                return Err(e);
            }
            skip_output = verdict.skip_output;
        }

        if let Err(e) = self.entry.job.execute_data_in(time) {
            self.report(IncidentCode::DataInFailure, Severity::Warning, &e.to_string());
        }

        let started = Instant::now();
        let result = self.entry.job.execute(time);
        let runtime = started.elapsed();
        self.metrics.record_execution(time, runtime);

        if let Err(e) = &result {
            self.metrics.record_failure();
            self.report(IncidentCode::ExecutionFailure, Severity::Warning, &e.to_string());
            skip_output = true;
        }

        if let Some(budget) = config.max_runtime() {
            if runtime > budget {
                self.metrics.record_runtime_violation();
                let message = format!(
                    "{}: step {} took {}us, budget is {}us",
                    self.name(),
                    time,
                    runtime.as_micros(),
                    budget.as_micros()
                );
                match config.runtime_violation_strategy {
                    TimeViolationStrategy::Ignore => {}
                    TimeViolationStrategy::Warn => {
                        self.report(IncidentCode::RuntimeViolation, Severity::Warning, &message);
                    }
                    TimeViolationStrategy::SkipOutputPublish => {
                        self.report(IncidentCode::RuntimeViolation, Severity::Critical, &message);
                        skip_output = true;
                    }
                    TimeViolationStrategy::SetErrorState => {
                        self.report(IncidentCode::RuntimeViolation, Severity::Critical, &message);
                        self.incidents.set_error_state();
                        self.cancelled.store(true, Ordering::Release);
                        self.metrics.record_skipped_output();
                        return Err(JobError::RuntimeViolation {
                            job: self.name().to_string(),
                            runtime_us: runtime.as_micros() as u64,
                            budget_us: budget.as_micros() as u64,
                        });
                    }
                }
            }
        }

        if skip_output {
            self.metrics.record_skipped_output();
            tracing::debug!(job = %self.name(), time, "Skipping output publication");
            return result;
        }

        if let Err(e) = self.entry.job.execute_data_out(time) {
            self.report(IncidentCode::DataOutFailure, Severity::Warning, &e.to_string());
            return Err(e);
        }
        if let Some(data) = &self.entry.data {
            if let Err(e) = data.commit_outputs(time) {
                self.report(IncidentCode::DataOutFailure, Severity::Warning, &e.to_string());
                return Err(e);
            }
        }

        result
    }

    fn report(&self, code: IncidentCode, severity: Severity, message: &str) {
        self.incidents.publish_incident(code, severity, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, InputViolationStrategy, JobConfiguration};
    use crate::data::DataAccess;
    use crate::incident::testing::RecordingReporter;
    use crate::job::Job;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    /// Job recording which hooks ran, optionally slow or failing
    #[derive(Default)]
    struct ScriptedJob {
        calls: Mutex<Vec<&'static str>>,
        sleep: Duration,
        fail: bool,
    }

    impl Job for ScriptedJob {
        fn execute_data_in(&self, _time: Timestamp) -> JobResult {
            self.calls.lock().push("in");
            Ok(())
        }

        fn execute(&self, _time: Timestamp) -> JobResult {
            self.calls.lock().push("exec");
            thread::sleep(self.sleep);
            if self.fail {
                Err(JobError::failed("boom"))
            } else {
                Ok(())
            }
        }

        fn execute_data_out(&self, _time: Timestamp) -> JobResult {
            self.calls.lock().push("out");
            Ok(())
        }
    }

    struct EmptyInputs;

    impl DataAccess for EmptyInputs {
        fn sample_in_window(&self, _input: &str, _earliest: Timestamp, _latest: Timestamp) -> bool {
            false
        }

        fn commit_outputs(&self, _time: Timestamp) -> JobResult {
            Ok(())
        }
    }

    fn runtime_check(
        job: Arc<ScriptedJob>,
        config: JobConfiguration,
    ) -> (JobRuntimeCheck, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        let entry = JobEntry::new(JobInfo::new("budgeted", config), job);
        (JobRuntimeCheck::new(entry, reporter.clone()), reporter)
    }

    #[test]
    fn test_hooks_run_in_order() {
        let job = Arc::new(ScriptedJob::default());
        let (check, reporter) = runtime_check(job.clone(), JobConfiguration::new(100));

        assert!(check.run(0).is_ok());
        assert_eq!(*job.calls.lock(), vec!["in", "exec", "out"]);
        assert!(reporter.codes().is_empty());
        assert_eq!(check.metrics().invocations, 1);
        assert_eq!(check.metrics().last_time, 0);
    }

    #[test]
    fn test_execute_failure_skips_output() {
        let job = Arc::new(ScriptedJob { fail: true, ..Default::default() });
        let (check, reporter) = runtime_check(job.clone(), JobConfiguration::new(100));

        assert_eq!(check.run(0), Err(JobError::failed("boom")));
        assert_eq!(*job.calls.lock(), vec!["in", "exec"]);
        assert_eq!(reporter.codes(), vec![(IncidentCode::ExecutionFailure, Severity::Warning)]);
        assert!(!check.is_cancelled());
        assert_eq!(check.metrics().failures, 1);
    }

    #[test]
    fn test_runtime_violation_warn() {
        let job = Arc::new(ScriptedJob { sleep: Duration::from_millis(5), ..Default::default() });
        let config = JobConfiguration::new(100).with_max_runtime(100, TimeViolationStrategy::Warn);
        let (check, reporter) = runtime_check(job.clone(), config);

        assert!(check.run(0).is_ok());
        assert_eq!(*job.calls.lock(), vec!["in", "exec", "out"]);
        assert_eq!(reporter.codes(), vec![(IncidentCode::RuntimeViolation, Severity::Warning)]);
        assert_eq!(check.metrics().runtime_violations, 1);
    }

    #[test]
    fn test_runtime_violation_skip_output() {
        let job = Arc::new(ScriptedJob { sleep: Duration::from_millis(5), ..Default::default() });
        let config = JobConfiguration::new(100)
            .with_max_runtime(100, TimeViolationStrategy::SkipOutputPublish);
        let (check, reporter) = runtime_check(job.clone(), config);

        assert!(check.run(0).is_ok());
        assert_eq!(*job.calls.lock(), vec!["in", "exec"]);
        assert_eq!(reporter.codes(), vec![(IncidentCode::RuntimeViolation, Severity::Critical)]);
        assert!(!reporter.escalated());
    }

    #[test]
    fn test_runtime_violation_escalates_and_cancels() {
        let job = Arc::new(ScriptedJob { sleep: Duration::from_millis(5), ..Default::default() });
        let config =
            JobConfiguration::new(100).with_max_runtime(100, TimeViolationStrategy::SetErrorState);
        let (check, reporter) = runtime_check(job.clone(), config);

        assert!(matches!(check.run(0), Err(JobError::RuntimeViolation { .. })));
        assert!(reporter.escalated());
        assert!(check.is_cancelled());

        assert_eq!(check.run(100), Err(JobError::Cancelled { job: "budgeted".into() }));
        assert_eq!(*job.calls.lock(), vec!["in", "exec"]);
    }

    #[test]
    fn test_missing_input_with_error_strategy_prevents_execution() {
        let job = Arc::new(ScriptedJob::default());
        let mut config = JobConfiguration::new(100);
        config
            .add_input(
                "position",
                InputConfig::new(0, 100).with_strategy(InputViolationStrategy::SetErrorState),
            )
            .unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let entry = JobEntry::new(JobInfo::new("budgeted", config), job.clone())
            .with_data_access(Arc::new(EmptyInputs));
        let check = JobRuntimeCheck::new(entry, reporter.clone());

        assert!(matches!(check.run(0), Err(JobError::InputViolation { .. })));
        assert!(job.calls.lock().is_empty());
        assert!(reporter.escalated());
        assert_eq!(check.metrics().input_violations, 1);
    }

    #[test]
    fn test_missing_input_with_skip_strategy_runs_without_output() {
        let job = Arc::new(ScriptedJob::default());
        let mut config = JobConfiguration::new(100);
        config
            .add_input(
                "position",
                InputConfig::new(0, 100).with_strategy(InputViolationStrategy::SkipOutputPublish),
            )
            .unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let entry = JobEntry::new(JobInfo::new("budgeted", config), job.clone())
            .with_data_access(Arc::new(EmptyInputs));
        let check = JobRuntimeCheck::new(entry, reporter);

        assert!(check.run(0).is_ok());
        assert_eq!(*job.calls.lock(), vec!["in", "exec"]);
        assert_eq!(check.metrics().skipped_outputs, 1);
    }
}
