//! Precision single-shot deadline timer
//!
//! OS sleeps are only accurate to a scheduler quantum, so the timer sleeps for the bulk of the
//! requested duration and spin-polls a monotonic clock for the remainder.
//!
//! A `DeadlineTimer` is not reentrant: it holds at most one outstanding deadline and all methods
//! take `&mut self`. Sharing one instance between threads is the caller's responsibility; the usual
//! arrangement is one timer per worker thread.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;

use crate::DEFAULT_SPIN_THRESHOLD_US;

/// Single-shot wait primitive with microsecond accuracy
#[derive(Debug)]
pub struct DeadlineTimer {
    pending: Option<Instant>,
    spin_threshold: Duration,
}

impl DeadlineTimer {
    /// Create a timer with the default spin threshold
    pub fn new() -> Self {
        Self::with_spin_threshold(Duration::from_micros(DEFAULT_SPIN_THRESHOLD_US))
    }

    /// Create a timer that busy-waits for the last `spin_threshold` of every wait
    pub fn with_spin_threshold(spin_threshold: Duration) -> Self {
        Self { pending: None, spin_threshold }
    }

    /// Arm the timer `deadline_from_now` into the future.
    ///
    /// Any deadline still outstanding is awaited first, so `reset` doubles as a barrier.
    pub fn reset(&mut self, deadline_from_now: Duration) {
        self.wait();
        self.pending = Some(Instant::now() + deadline_from_now);
    }

    /// Block until the armed deadline has passed, then disarm.
    ///
    /// Returns at once when nothing is armed.
    pub fn wait(&mut self) {
        let Some(deadline) = self.pending.take() else {
            return;
        };

        let now = Instant::now();
        if deadline <= now {
            return;
        }

        let remaining = deadline - now;
        if remaining > self.spin_threshold {
            thread::sleep(remaining - self.spin_threshold);
        }

        let backoff = Backoff::new();
        while Instant::now() < deadline {
            backoff.spin();
        }
    }

    /// Whether a deadline is armed and has not been awaited yet
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Time left until the armed deadline, if any
    pub fn remaining(&self) -> Option<Duration> {
        self.pending.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn spin_threshold(&self) -> Duration {
        self.spin_threshold
    }
}

impl Default for DeadlineTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_deadline_does_not_block() {
        let mut timer = DeadlineTimer::new();
        let start = Instant::now();
        timer.reset(Duration::ZERO);
        timer.wait();
        assert!(start.elapsed() < Duration::from_millis(5));
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_wait_without_reset_returns_immediately() {
        let mut timer = DeadlineTimer::new();
        let start = Instant::now();
        timer.wait();
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_wait_honours_deadline() {
        let mut timer = DeadlineTimer::new();
        let start = Instant::now();
        timer.reset(Duration::from_micros(2_500));
        assert!(timer.is_pending());
        timer.wait();
        assert!(start.elapsed() >= Duration::from_micros(2_500));
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_reset_waits_for_outstanding_deadline() {
        let mut timer = DeadlineTimer::with_spin_threshold(Duration::from_micros(200));
        let start = Instant::now();
        timer.reset(Duration::from_millis(3));
        timer.reset(Duration::from_millis(1));
        assert!(start.elapsed() >= Duration::from_millis(3));
        timer.wait();
        assert!(start.elapsed() >= Duration::from_millis(4));
    }

    #[test]
    fn test_remaining_is_bounded_by_deadline() {
        let mut timer = DeadlineTimer::new();
        assert_eq!(timer.remaining(), None);
        timer.reset(Duration::from_millis(50));
        let remaining = timer.remaining().unwrap();
        assert!(remaining <= Duration::from_millis(50));
    }
}
