//! Participant-level clock synchronization

use std::sync::Arc;

use parking_lot::Mutex;
use simulation_clock::{Clock, ClockService};

use crate::config::{ClockSyncConfig, SyncMode};
use crate::error::SyncError;
use crate::master::ClockMaster;
use crate::slave::{DiscreteSlaveClock, InterpolatingSlaveClock};
use crate::transport::MasterLink;

#[derive(Clone)]
enum SlaveProxy {
    Interpolating(Arc<InterpolatingSlaveClock>),
    Discrete(Arc<DiscreteSlaveClock>),
}

impl SlaveProxy {
    fn clock(&self) -> Arc<dyn Clock> {
        match self {
            SlaveProxy::Interpolating(clock) => clock.clone(),
            SlaveProxy::Discrete(clock) => clock.clone(),
        }
    }

    fn connect(&self) -> Result<(), SyncError> {
        match self {
            SlaveProxy::Interpolating(clock) => clock.connect(),
            SlaveProxy::Discrete(clock) => clock.connect(),
        }
    }

    fn disconnect(&self) -> Result<(), SyncError> {
        match self {
            SlaveProxy::Interpolating(clock) => clock.disconnect(),
            SlaveProxy::Discrete(clock) => clock.disconnect(),
        }
    }
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    running: bool,
    slave: Option<SlaveProxy>,
    master: Option<Arc<ClockMaster>>,
}

/// Wires a participant into master/slave time distribution.
///
/// The participant named as timing master gets a [`ClockMaster`] in the trailing sink slot of
/// its ClockService. In an on-demand mode the matching slave clock is registered and selected as
/// main clock; `start` and `stop` connect it to and disconnect it from the master.
pub struct ClockSyncService {
    participant: String,
    config: ClockSyncConfig,
    clock_service: Arc<ClockService>,
    link: Option<Arc<dyn MasterLink>>,
    inner: Mutex<Inner>,
}

impl ClockSyncService {
    pub fn new(
        participant: impl Into<String>,
        config: ClockSyncConfig,
        clock_service: Arc<ClockService>,
        link: Option<Arc<dyn MasterLink>>,
    ) -> Self {
        Self {
            participant: participant.into(),
            config,
            clock_service,
            link,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.config.mode
    }

    pub fn is_timing_master(&self) -> bool {
        !self.config.timing_master.is_empty() && self.config.timing_master == self.participant
    }

    /// The master sink while this participant is initialized as timing master
    pub fn clock_master(&self) -> Option<Arc<ClockMaster>> {
        self.inner.lock().master.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn initialize(&self) -> Result<(), SyncError> {
        let mut inner = self.inner.lock();
        if inner.initialized {
            return Ok(());
        }
        self.config.validate()?;

        let slave = match self.config.mode {
            SyncMode::NoSync => None,
            _ if self.is_timing_master() => {
                return Err(SyncError::InvalidArgument(format!(
                    "{} is timing master and cannot follow itself",
                    self.participant
                )));
            }
            mode => {
                let link = self.link.clone().ok_or_else(|| {
                    SyncError::InvalidArgument(format!("sync mode {:?} needs a master link", mode))
                })?;
                Some(self.create_slave(mode, link))
            }
        };

        if let Some(slave) = &slave {
            let clock = slave.clock();
            self.clock_service.register_clock(clock.clone())?;
            if let Err(e) = self.clock_service.set_main_clock(clock.name()) {
                let _ = self.clock_service.unregister_clock(clock.name());
                return Err(e.into());
            }
        }

        if self.is_timing_master() {
            let master = Arc::new(ClockMaster::new());
            self.clock_service.set_master_sink(Some(master.clone()));
            inner.master = Some(master);
        }

        inner.slave = slave;
        inner.initialized = true;
        tracing::info!(
            participant = %self.participant,
            mode = ?self.config.mode,
            timing_master = %self.config.timing_master,
            "Clock sync initialized"
        );
        Ok(())
    }

    fn create_slave(&self, mode: SyncMode, link: Arc<dyn MasterLink>) -> SlaveProxy {
        let cycle = self.config.sync_cycle();
        match mode {
            SyncMode::OnDemandDiscrete => SlaveProxy::Discrete(Arc::new(DiscreteSlaveClock::new(
                &self.participant,
                link,
                cycle,
                self.config.ack_timeout(),
            ))),
            _ => SlaveProxy::Interpolating(Arc::new(InterpolatingSlaveClock::new(
                &self.participant,
                link,
                cycle,
            ))),
        }
    }

    /// Register with the timing master
    pub fn start(&self) -> Result<(), SyncError> {
        let slave = {
            let mut inner = self.inner.lock();
            if !inner.initialized {
                return Err(SyncError::InvalidArgument(
                    "clock sync is not initialized".to_string(),
                ));
            }
            if inner.running {
                return Ok(());
            }
            inner.running = true;
            inner.slave.clone()
        };

        if let Some(slave) = slave {
            if let Err(e) = slave.connect() {
                self.inner.lock().running = false;
                return Err(e);
            }
        }
        tracing::info!(participant = %self.participant, "Clock sync started");
        Ok(())
    }

    /// Unregister from the timing master. Stopping a stopped service is a no-op.
    pub fn stop(&self) -> Result<(), SyncError> {
        let slave = {
            let mut inner = self.inner.lock();
            if !inner.running {
                return Ok(());
            }
            inner.running = false;
            inner.slave.clone()
        };

        if let Some(slave) = slave {
            slave.disconnect()?;
        }
        tracing::info!(participant = %self.participant, "Clock sync stopped");
        Ok(())
    }

    /// Remove the slave clock and the master sink. The ClockService must be stopped.
    pub fn deinitialize(&self) -> Result<(), SyncError> {
        self.stop()?;
        let mut inner = self.inner.lock();
        if !inner.initialized {
            return Ok(());
        }

        if let Some(slave) = &inner.slave {
            self.clock_service.unregister_clock(slave.clock().name())?;
        }
        if inner.master.take().is_some() {
            self.clock_service.set_master_sink(None);
        }
        inner.slave = None;
        inner.initialized = false;
        tracing::info!(participant = %self.participant, "Clock sync deinitialized");
        Ok(())
    }
}

impl Drop for ClockSyncService {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Failed to stop clock sync on drop: {}", e);
        }
    }
}
