//! Execution metrics of scheduled jobs

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use simulation_clock::Timestamp;

/// Number of execution durations kept for percentile statistics
pub const DEFAULT_RUNTIME_HISTORY: usize = 256;

/// Snapshot of one job's execution metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Simulation time of the last invocation, -1 before the first one
    pub last_time: Timestamp,

    /// Number of invocations
    pub invocations: u64,

    /// Invocations whose execute hook failed
    pub failures: u64,

    /// Invocations that exceeded the runtime budget
    pub runtime_violations: u64,

    /// Invocations with at least one missing input
    pub input_violations: u64,

    /// Invocations whose outputs were not published
    pub skipped_outputs: u64,

    /// Wall-clock duration of the last invocation in microseconds
    pub last_runtime_us: u64,

    /// Average duration over the recent history in microseconds
    pub avg_runtime_us: u64,

    /// Maximum duration since the last reset in microseconds
    pub max_runtime_us: u64,

    /// 95th percentile duration over the recent history in microseconds
    pub p95_runtime_us: u64,

    /// 99th percentile duration over the recent history in microseconds
    pub p99_runtime_us: u64,
}

/// Lock-free collector written by the executing thread and read by introspection
pub struct MetricsCollector {
    last_time: AtomicI64,
    invocations: AtomicU64,
    failures: AtomicU64,
    runtime_violations: AtomicU64,
    input_violations: AtomicU64,
    skipped_outputs: AtomicU64,
    max_runtime: AtomicU64,
    runtimes: Vec<AtomicU64>,
}

impl MetricsCollector {
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            last_time: AtomicI64::new(-1),
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            runtime_violations: AtomicU64::new(0),
            input_violations: AtomicU64::new(0),
            skipped_outputs: AtomicU64::new(0),
            max_runtime: AtomicU64::new(0),
            runtimes: (0..history_size).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Record a completed invocation at simulation time `time`
    pub fn record_execution(&self, time: Timestamp, runtime: Duration) {
        let runtime_us = (runtime.as_micros() as u64).max(1);
        let invocation = self.invocations.fetch_add(1, Ordering::Relaxed);
        let index = (invocation as usize) % self.runtimes.len();

        self.last_time.store(time, Ordering::Relaxed);
        self.runtimes[index].store(runtime_us, Ordering::Relaxed);
        self.max_runtime.fetch_max(runtime_us, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_runtime_violation(&self) {
        self.runtime_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_input_violation(&self) {
        self.input_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_output(&self) {
        self.skipped_outputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> JobMetrics {
        let invocations = self.invocations.load(Ordering::Relaxed);
        let last_runtime_us = if invocations > 0 {
            let last_index = ((invocations - 1) as usize) % self.runtimes.len();
            self.runtimes[last_index].load(Ordering::Relaxed)
        } else {
            0
        };

        let mut runtimes: Vec<u64> = self
            .runtimes
            .iter()
            .map(|r| r.load(Ordering::Relaxed))
            .filter(|&r| r > 0)
            .collect();
        runtimes.sort_unstable();

        let avg_runtime_us = if runtimes.is_empty() {
            0
        } else {
            runtimes.iter().sum::<u64>() / runtimes.len() as u64
        };

        JobMetrics {
            last_time: self.last_time.load(Ordering::Relaxed),
            invocations,
            failures: self.failures.load(Ordering::Relaxed),
            runtime_violations: self.runtime_violations.load(Ordering::Relaxed),
            input_violations: self.input_violations.load(Ordering::Relaxed),
            skipped_outputs: self.skipped_outputs.load(Ordering::Relaxed),
            last_runtime_us,
            avg_runtime_us,
            max_runtime_us: self.max_runtime.load(Ordering::Relaxed),
            p95_runtime_us: percentile(&runtimes, 0.95),
            p99_runtime_us: percentile(&runtimes, 0.99),
        }
    }

    pub fn reset(&self) {
        self.last_time.store(-1, Ordering::Relaxed);
        self.invocations.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.runtime_violations.store(0, Ordering::Relaxed);
        self.input_violations.store(0, Ordering::Relaxed);
        self.skipped_outputs.store(0, Ordering::Relaxed);
        self.max_runtime.store(0, Ordering::Relaxed);
        for runtime in &self.runtimes {
            runtime.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME_HISTORY)
    }
}

fn percentile(sorted: &[u64], quantile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = (sorted.len() as f64 * quantile) as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_collector() {
        let metrics = MetricsCollector::default().get_metrics();
        assert_eq!(metrics.invocations, 0);
        assert_eq!(metrics.last_time, -1);
        assert_eq!(metrics.avg_runtime_us, 0);
        assert_eq!(metrics.p99_runtime_us, 0);
    }

    #[test]
    fn test_statistics() {
        let collector = MetricsCollector::new(100);
        for i in 1..=100u64 {
            collector.record_execution(i as Timestamp * 10, Duration::from_micros(i));
        }
        collector.record_failure();
        collector.record_runtime_violation();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.invocations, 100);
        assert_eq!(metrics.last_time, 1000);
        assert_eq!(metrics.last_runtime_us, 100);
        assert_eq!(metrics.max_runtime_us, 100);
        assert_eq!(metrics.avg_runtime_us, 50);
        assert_eq!(metrics.p95_runtime_us, 96);
        assert_eq!(metrics.p99_runtime_us, 100);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.runtime_violations, 1);
    }

    #[test]
    fn test_history_wraps_and_reset() {
        let collector = MetricsCollector::new(4);
        for i in 1..=6u64 {
            collector.record_execution(0, Duration::from_micros(i * 100));
        }
        let metrics = collector.get_metrics();
        assert_eq!(metrics.last_runtime_us, 600);
        // history holds 300..=600
        assert_eq!(metrics.avg_runtime_us, 450);

        collector.reset();
        assert_eq!(collector.get_metrics(), JobMetrics { last_time: -1, ..Default::default() });
    }
}
