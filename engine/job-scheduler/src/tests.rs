//! Unit tests for job configuration, errors and scheduling invariants

use crate::{
    InputConfig, InputViolationStrategy, JobConfiguration, SchedulerError, SchedulerServiceConfig,
    TimeViolationStrategy, CLOCK_BASED_SCHEDULER, DEFAULT_MAX_CATCH_UP,
};

fn create_test_job_config() -> JobConfiguration {
    let mut config = JobConfiguration::new(10_000)
        .with_first_delay(2_000)
        .with_max_runtime(500, TimeViolationStrategy::Warn)
        .with_max_input_wait(1_000);
    let position = InputConfig::new(100, 20_000).with_strategy(InputViolationStrategy::Warn);
    config.add_input("position", position).unwrap();
    config.add_output("command").unwrap();
    config
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_job_configuration_defaults() {
        let config = JobConfiguration::default();
        assert_eq!(config.cycle_time_sim_us, 0);
        assert_eq!(config.first_delay_sim_us, 0);
        assert_eq!(config.max_runtime(), None);
        assert_eq!(config.max_input_wait(), Duration::ZERO);
        assert_eq!(config.runtime_violation_strategy, TimeViolationStrategy::Ignore);
        assert!(config.inputs.is_empty());
    }

    #[test]
    fn test_zero_cycle_time_is_rejected() {
        let err = JobConfiguration::new(0).validate().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfiguration(_)));
        assert!(JobConfiguration::new(-10).validate().is_err());
        assert!(JobConfiguration::new(1).validate().is_ok());
    }

    #[test]
    fn test_negative_offsets_are_rejected() {
        assert!(JobConfiguration::new(100).with_first_delay(-1).validate().is_err());

        let mut config = JobConfiguration::new(100);
        config.add_input("late", InputConfig::new(-5, 0)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_ports_are_rejected() {
        let mut config = create_test_job_config();
        assert_eq!(
            config.add_input("position", InputConfig::default()),
            Err(SchedulerError::DuplicateName { kind: "Input", name: "position".to_string() })
        );
        assert!(config.add_output("command").is_err());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_input_window() {
        let input = InputConfig::new(100, 20_000);
        assert_eq!(input.window(50_000), (30_000, 50_100));
    }

    #[test]
    fn test_job_configuration_toml() {
        let config = create_test_job_config();
        let text = toml::to_string(&config).unwrap();
        let parsed: JobConfiguration = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);

        let parsed: JobConfiguration = toml::from_str(
            "cycle_time_sim_us = 500\nruntime_violation_strategy = \"skip_output_publish\"",
        )
        .unwrap();
        assert_eq!(parsed.cycle_time_sim_us, 500);
        assert_eq!(parsed.runtime_violation_strategy, TimeViolationStrategy::SkipOutputPublish);
    }

    #[test]
    fn test_scheduler_service_config_default() {
        let config = SchedulerServiceConfig::default();
        assert_eq!(config.scheduler, CLOCK_BASED_SCHEDULER);
        assert_eq!(config.max_catch_up, DEFAULT_MAX_CATCH_UP);
        assert_eq!(config.spin_threshold(), Duration::from_micros(1_000));
    }

    #[test]
    fn test_scheduler_service_config_from_file() {
        let temp_file = std::env::temp_dir().join("job_scheduler_test_config.toml");
        std::fs::write(&temp_file, "scheduler = \"locked_step_simtime_scheduler\"\n").unwrap();

        let config = SchedulerServiceConfig::from_file(temp_file.to_str().unwrap()).unwrap();
        assert_eq!(config.scheduler, "locked_step_simtime_scheduler");
        assert_eq!(config.max_catch_up, DEFAULT_MAX_CATCH_UP);

        let _ = std::fs::remove_file(&temp_file);
    }
}

#[cfg(test)]
mod error_handling_tests {
    use crate::{JobError, SchedulerError};
    use simulation_clock::ClockError;

    #[test]
    fn test_scheduler_error_display() {
        let error = SchedulerError::DuplicateName { kind: "Job", name: "guidance".to_string() };
        assert_eq!(error.to_string(), "Job guidance is already registered");

        let error = SchedulerError::InvalidState {
            component: "SchedulerService".to_string(),
            operation: "add_job",
            state: "running".to_string(),
        };
        assert!(error.to_string().contains("add_job"));
        assert!(error.to_string().contains("running"));
    }

    #[test]
    fn test_clock_error_conversion() {
        let error: SchedulerError = ClockError::NotFound { name: "tc".to_string() }.into();
        assert!(matches!(error, SchedulerError::Clock(ClockError::NotFound { .. })));
    }

    #[test]
    fn test_job_error_display() {
        let error = JobError::RuntimeViolation { job: "j".into(), runtime_us: 900, budget_us: 500 };
        assert!(error.to_string().contains("900us"));
        assert_eq!(JobError::failed("sensor offline").to_string(), "sensor offline");
    }
}

#[cfg(test)]
mod property_tests {
    use crate::incident::testing::RecordingReporter;
    use crate::{FnJob, JobConfiguration, SchedulerService, SchedulerServiceConfig};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use simulation_clock::{ClockService, DiscreteClock, Timestamp};
    use std::sync::Arc;

    proptest! {
        #[test]
        fn prop_every_boundary_runs_once_in_order(
            cycle in 1i64..500,
            first_delay in 0i64..500,
            step in 1i64..200,
            updates in 1usize..40,
        ) {
            let clock_service = Arc::new(ClockService::default());
            let clock = Arc::new(DiscreteClock::new("tc"));
            clock_service.register_clock(clock.clone()).unwrap();
            clock_service.set_main_clock("tc").unwrap();

            let service = SchedulerService::new(
                SchedulerServiceConfig::default(),
                clock_service.clone(),
                Arc::new(RecordingReporter::default()),
            );
            let log = Arc::new(Mutex::new(Vec::new()));
            let sink = log.clone();
            let job = Arc::new(FnJob::new(move |time: Timestamp| {
                sink.lock().push(time);
                Ok(())
            }));
            let config = JobConfiguration::new(cycle).with_first_delay(first_delay);
            service.add_job("j", job, config, None).unwrap();
            service.ready().unwrap();
            service.start().unwrap();
            clock_service.start().unwrap();

            clock.set_new_time(0, false);
            for k in 1..=updates {
                clock.set_new_time(k as i64 * step, false);
            }
            service.stop().unwrap();
            clock_service.stop().unwrap();

            let last = updates as i64 * step;
            let expected: Vec<Timestamp> =
                (0..).map(|k| first_delay + k * cycle).take_while(|t| *t <= last).collect();
            prop_assert_eq!(log.lock().clone(), expected);
        }
    }
}
