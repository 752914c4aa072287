//! Signal handling for graceful shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam::channel::{self, RecvTimeoutError};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info, warn};

use crate::participant::ParticipantHost;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why the service stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Elapsed,
}

/// Raise the returned flag on SIGINT or SIGTERM
pub fn setup_signal_handlers() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, shutdown.clone())
            .with_context(|| format!("Failed to register handler for signal {}", signal))?;
    }
    Ok(shutdown)
}

/// Block until `shutdown` is raised or `run_for` has elapsed, calling `on_status` every
/// `status_interval`
pub fn wait_for_shutdown(
    shutdown: &AtomicBool,
    run_for: Option<Duration>,
    status_interval: Option<Duration>,
    mut on_status: impl FnMut(),
) -> ShutdownReason {
    let started = Instant::now();
    let mut last_status = started;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown signal received");
            return ShutdownReason::Signal;
        }
        if run_for.map(|limit| started.elapsed() >= limit).unwrap_or(false) {
            info!("Configured run time elapsed");
            return ShutdownReason::Elapsed;
        }
        if let Some(interval) = status_interval {
            if last_status.elapsed() >= interval {
                on_status();
                last_status = Instant::now();
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Stop and tear down every participant, giving up after `timeout`
pub fn graceful_shutdown(host: Arc<ParticipantHost>, timeout: Duration) -> Result<()> {
    info!("Starting graceful shutdown...");

    let (done_tx, done_rx) = channel::bounded(1);
    let worker = host.clone();
    thread::Builder::new()
        .name("shutdown".to_string())
        .spawn(move || {
            let _ = done_tx.send(worker.shutdown());
        })
        .context("Failed to spawn shutdown thread")?;

    match done_rx.recv_timeout(timeout) {
        Ok(Ok(())) => info!("Graceful shutdown complete"),
        Ok(Err(e)) => error!("Failed to shutdown participants: {:#}", e),
        Err(RecvTimeoutError::Timeout) => {
            warn!(timeout_secs = timeout.as_secs(), "Participants did not stop within timeout")
        }
        Err(RecvTimeoutError::Disconnected) => error!("Shutdown thread terminated abnormally"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_returns_on_flag() {
        let shutdown = AtomicBool::new(true);
        assert_eq!(wait_for_shutdown(&shutdown, None, None, || {}), ShutdownReason::Signal);
    }

    #[test]
    fn test_wait_returns_after_run_time() {
        let shutdown = AtomicBool::new(false);
        let mut reports = 0;
        let reason = wait_for_shutdown(
            &shutdown,
            Some(Duration::from_millis(350)),
            Some(Duration::from_millis(100)),
            || reports += 1,
        );
        assert_eq!(reason, ShutdownReason::Elapsed);
        assert!(reports >= 1);
    }
}
