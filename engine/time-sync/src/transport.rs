//! Contracts between a timing master and its slaves, plus an in-process transport

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use simulation_clock::{ClockService, ClockType, Timestamp};

use crate::error::SyncError;
use crate::master::ClockMaster;

/// Time change forwarded from the master's main clock to a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEvent {
    UpdateBefore { new: Timestamp, old: Timestamp },
    Updating { new: Timestamp },
    UpdateAfter { new: Timestamp },
    Reset { new: Timestamp, old: Timestamp },
}

/// Which events a slave wants to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub update_before: bool,
    pub updating: bool,
    pub update_after: bool,
    pub reset: bool,
}

impl EventSubscription {
    /// Updating and reset are always delivered; begin/end framing only on request
    pub fn for_events(before_and_after: bool) -> Self {
        Self {
            update_before: before_and_after,
            updating: true,
            update_after: before_and_after,
            reset: true,
        }
    }

    pub fn matches(&self, event: &SyncEvent) -> bool {
        match event {
            SyncEvent::UpdateBefore { .. } => self.update_before,
            SyncEvent::Updating { .. } => self.updating,
            SyncEvent::UpdateAfter { .. } => self.update_after,
            SyncEvent::Reset { .. } => self.reset,
        }
    }
}

impl Default for EventSubscription {
    fn default() -> Self {
        Self::for_events(false)
    }
}

/// Master to slave: delivery of one time event
pub trait SlaveLink: Send + Sync {
    fn sync_time_event(&self, event: SyncEvent) -> Result<(), SyncError>;
}

/// Slave to master requests
pub trait MasterLink: Send + Sync {
    /// Ask the master to forward events matching `subscription` to `endpoint`
    fn register_slave(
        &self,
        slave: &str,
        subscription: EventSubscription,
        endpoint: Arc<dyn SlaveLink>,
    ) -> Result<(), SyncError>;

    fn unregister_slave(&self, slave: &str) -> Result<(), SyncError>;

    fn master_time(&self) -> Result<Timestamp, SyncError>;

    fn master_clock_type(&self) -> Result<ClockType, SyncError>;
}

#[derive(Clone)]
struct MasterEndpoint {
    master: Arc<ClockMaster>,
    clock_service: Arc<ClockService>,
}

/// Connects participants living in the same process.
///
/// Timing masters attach under their participant name; slaves obtain a [`MasterLink`] for the
/// master they follow. Requests to a master that is not attached fail with a transport error,
/// so a slave may be created before its master shows up.
#[derive(Default)]
pub struct LocalTimingBus {
    masters: RwLock<HashMap<String, MasterEndpoint>>,
}

impl LocalTimingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_master(
        &self,
        participant: &str,
        master: Arc<ClockMaster>,
        clock_service: Arc<ClockService>,
    ) {
        self.masters
            .write()
            .insert(participant.to_string(), MasterEndpoint { master, clock_service });
        tracing::info!(master = %participant, "Timing master attached to bus");
    }

    pub fn detach_master(&self, participant: &str) {
        if self.masters.write().remove(participant).is_some() {
            tracing::info!(master = %participant, "Timing master detached from bus");
        }
    }

    /// Link to the master attached under `participant`, resolved on every request
    pub fn master_link(self: &Arc<Self>, participant: &str) -> Arc<dyn MasterLink> {
        Arc::new(BusMasterLink { bus: self.clone(), master: participant.to_string() })
    }

    fn endpoint(&self, participant: &str) -> Result<MasterEndpoint, SyncError> {
        self.masters.read().get(participant).cloned().ok_or_else(|| {
            SyncError::transport(format!("timing master {} is not reachable", participant))
        })
    }
}

struct BusMasterLink {
    bus: Arc<LocalTimingBus>,
    master: String,
}

impl MasterLink for BusMasterLink {
    fn register_slave(
        &self,
        slave: &str,
        subscription: EventSubscription,
        endpoint: Arc<dyn SlaveLink>,
    ) -> Result<(), SyncError> {
        self.bus.endpoint(&self.master)?.master.register_slave(slave, subscription, endpoint);
        Ok(())
    }

    fn unregister_slave(&self, slave: &str) -> Result<(), SyncError> {
        self.bus.endpoint(&self.master)?.master.unregister_slave(slave)
    }

    fn master_time(&self) -> Result<Timestamp, SyncError> {
        Ok(self.bus.endpoint(&self.master)?.clock_service.time())
    }

    fn master_clock_type(&self) -> Result<ClockType, SyncError> {
        Ok(self.bus.endpoint(&self.master)?.clock_service.clock_type()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_filters_framing_events() {
        let plain = EventSubscription::for_events(false);
        assert!(plain.matches(&SyncEvent::Updating { new: 1 }));
        assert!(plain.matches(&SyncEvent::Reset { new: 0, old: 5 }));
        assert!(!plain.matches(&SyncEvent::UpdateBefore { new: 1, old: 0 }));
        assert!(!plain.matches(&SyncEvent::UpdateAfter { new: 1 }));

        let framed = EventSubscription::for_events(true);
        assert!(framed.matches(&SyncEvent::UpdateBefore { new: 1, old: 0 }));
        assert_eq!(EventSubscription::default(), plain);
    }

    #[test]
    fn test_unattached_master_is_unreachable() {
        let bus = Arc::new(LocalTimingBus::new());
        let link = bus.master_link("hub");
        assert!(matches!(link.master_time(), Err(SyncError::Transport(_))));
        assert!(matches!(link.unregister_slave("s"), Err(SyncError::Transport(_))));
    }

    #[test]
    fn test_attached_master_answers_queries() {
        let bus = Arc::new(LocalTimingBus::new());
        let clock_service = Arc::new(ClockService::default());
        bus.attach_master("hub", Arc::new(ClockMaster::new()), clock_service);

        let link = bus.master_link("hub");
        assert_eq!(link.master_time().unwrap(), 0);
        assert_eq!(link.master_clock_type().unwrap(), ClockType::Continuous);
        assert_eq!(
            link.unregister_slave("ghost"),
            Err(SyncError::NotFound { name: "ghost".to_string() })
        );

        bus.detach_master("hub");
        assert!(link.master_clock_type().is_err());
    }
}
