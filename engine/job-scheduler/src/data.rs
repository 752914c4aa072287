// Data access collaborator and input validation

use std::thread;
use std::time::{Duration, Instant};

use simulation_clock::Timestamp;

use crate::config::{InputViolationStrategy, JobConfiguration};
use crate::error::{JobError, JobResult};
use crate::incident::{IncidentCode, IncidentReporter, Severity};

const INPUT_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Thread-safe access to a job's input and output buffers
pub trait DataAccess: Send + Sync {
    /// Whether `input` holds a sample stamped within `[earliest, latest]`
    fn sample_in_window(&self, input: &str, earliest: Timestamp, latest: Timestamp) -> bool;

    /// Publish everything the job wrote for the step at `time`
    fn commit_outputs(&self, time: Timestamp) -> JobResult;
}

/// What input validation decided for one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputVerdict {
    /// Names of inputs without a valid sample
    pub missing: Vec<String>,
    /// Outputs of this step must not be published
    pub skip_output: bool,
    /// The step must not run
    pub error: Option<JobError>,
}

/// Wait until every configured input of `job` has a valid sample for `time`, or until the input
/// wait budget is spent, and apply each input's violation strategy to what is still missing.
pub fn validate_inputs(
    job: &str,
    config: &JobConfiguration,
    data: &dyn DataAccess,
    time: Timestamp,
    incidents: &dyn IncidentReporter,
) -> InputVerdict {
    let mut verdict = InputVerdict::default();
    let wait_end = Instant::now() + config.max_input_wait();

    for (name, input) in &config.inputs {
        let (earliest, latest) = input.window(time);
        if wait_for_sample(data, name, earliest, latest, wait_end) {
            continue;
        }

        verdict.missing.push(name.clone());
        let message = format!(
            "{}: input {} has no sample in [{}, {}] for step {}",
            job, name, earliest, latest, time
        );
        let report = |severity| {
            incidents.publish_incident(IncidentCode::InputViolation, severity, &message)
        };
        match input.violation_strategy {
            InputViolationStrategy::Ignore => {}
            InputViolationStrategy::Warn => report(Severity::Warning),
            InputViolationStrategy::SkipOutputPublish => {
                report(Severity::Critical);
                verdict.skip_output = true;
            }
            InputViolationStrategy::SetErrorState => {
                report(Severity::Critical);
                incidents.set_error_state();
                verdict.error = Some(JobError::InputViolation {
                    job: job.to_string(),
                    input: name.clone(),
                    time,
                });
                break;
            }
        }
    }

    verdict
}

fn wait_for_sample(
    data: &dyn DataAccess,
    input: &str,
    earliest: Timestamp,
    latest: Timestamp,
    wait_end: Instant,
) -> bool {
    loop {
        if data.sample_in_window(input, earliest, latest) {
            return true;
        }
        let now = Instant::now();
        if now >= wait_end {
            return false;
        }
        let remaining = wait_end - now;
        if remaining < Duration::from_millis(1) {
            thread::yield_now();
        } else {
            thread::sleep(remaining.min(INPUT_POLL_INTERVAL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputConfig;
    use crate::incident::testing::RecordingReporter;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Buffers keyed by input name, each holding sample timestamps
    #[derive(Default)]
    struct SampleStore {
        samples: Mutex<BTreeMap<String, Vec<Timestamp>>>,
    }

    impl SampleStore {
        fn push(&self, input: &str, time: Timestamp) {
            self.samples.lock().entry(input.to_string()).or_default().push(time);
        }
    }

    impl DataAccess for SampleStore {
        fn sample_in_window(&self, input: &str, earliest: Timestamp, latest: Timestamp) -> bool {
            self.samples
                .lock()
                .get(input)
                .map(|times| times.iter().any(|t| *t >= earliest && *t <= latest))
                .unwrap_or(false)
        }

        fn commit_outputs(&self, _time: Timestamp) -> JobResult {
            Ok(())
        }
    }

    fn config_with(strategy: InputViolationStrategy) -> JobConfiguration {
        let mut config = JobConfiguration::new(100);
        config.add_input("speed", InputConfig::new(0, 50).with_strategy(strategy)).unwrap();
        config
    }

    #[test]
    fn test_sample_within_valid_age_passes() {
        let store = SampleStore::default();
        store.push("speed", 60);
        let reporter = RecordingReporter::default();

        let verdict = validate_inputs(
            "job",
            &config_with(InputViolationStrategy::SetErrorState),
            &store,
            100,
            &reporter,
        );
        assert_eq!(verdict, InputVerdict::default());
        assert!(reporter.codes().is_empty());
    }

    #[test]
    fn test_stale_sample_is_a_violation() {
        let store = SampleStore::default();
        store.push("speed", 10);
        let reporter = RecordingReporter::default();

        let config = config_with(InputViolationStrategy::Warn);
        let verdict = validate_inputs("job", &config, &store, 100, &reporter);
        assert_eq!(verdict.missing, vec!["speed".to_string()]);
        assert!(!verdict.skip_output);
        assert!(verdict.error.is_none());
        assert_eq!(reporter.codes(), vec![(IncidentCode::InputViolation, Severity::Warning)]);
    }

    #[test]
    fn test_strategies() {
        let store = SampleStore::default();

        let reporter = RecordingReporter::default();
        let config = config_with(InputViolationStrategy::Ignore);
        let verdict = validate_inputs("job", &config, &store, 0, &reporter);
        assert_eq!(verdict.missing.len(), 1);
        assert!(reporter.codes().is_empty());

        let reporter = RecordingReporter::default();
        let verdict = validate_inputs(
            "job",
            &config_with(InputViolationStrategy::SkipOutputPublish),
            &store,
            0,
            &reporter,
        );
        assert!(verdict.skip_output);
        assert_eq!(reporter.codes(), vec![(IncidentCode::InputViolation, Severity::Critical)]);
        assert!(!reporter.escalated());

        let reporter = RecordingReporter::default();
        let verdict = validate_inputs(
            "job",
            &config_with(InputViolationStrategy::SetErrorState),
            &store,
            0,
            &reporter,
        );
        assert_eq!(
            verdict.error,
            Some(JobError::InputViolation { job: "job".into(), input: "speed".into(), time: 0 })
        );
        assert!(reporter.escalated());
    }

    #[test]
    fn test_waits_for_late_sample() {
        let store = std::sync::Arc::new(SampleStore::default());
        let config = config_with(InputViolationStrategy::Warn).with_max_input_wait(500_000);
        let reporter = RecordingReporter::default();

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                store.push("speed", 100);
            })
        };

        let start = Instant::now();
        let verdict = validate_inputs("job", &config, store.as_ref(), 100, &reporter);
        writer.join().unwrap();

        assert!(verdict.missing.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_zero_wait_checks_once() {
        let store = SampleStore::default();
        let reporter = RecordingReporter::default();
        let config = config_with(InputViolationStrategy::Ignore);
        let start = Instant::now();
        let verdict = validate_inputs("job", &config, &store, 0, &reporter);
        assert_eq!(verdict.missing.len(), 1);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
