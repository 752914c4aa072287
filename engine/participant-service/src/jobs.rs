// Jobs hosted by the service binary

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use job_scheduler::{Job, JobResult};
use simulation_clock::Timestamp;

/// Job reporting every invocation it receives
#[derive(Debug)]
pub struct HeartbeatJob {
    participant: String,
    name: String,
    beats: AtomicU64,
    last_time: AtomicI64,
}

impl HeartbeatJob {
    pub fn new(participant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            name: name.into(),
            beats: AtomicU64::new(0),
            last_time: AtomicI64::new(-1),
        }
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    /// Simulation time of the last beat, -1 before the first one
    pub fn last_time(&self) -> Timestamp {
        self.last_time.load(Ordering::Relaxed)
    }
}

impl Job for HeartbeatJob {
    fn execute(&self, time: Timestamp) -> JobResult {
        let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_time.store(time, Ordering::Relaxed);
        tracing::debug!(participant = %self.participant, job = %self.name, time, beat, "Heartbeat");
        Ok(())
    }
}
