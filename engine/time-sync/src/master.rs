//! Timing master forwarding the main clock's events to registered slaves

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use simulation_clock::{ClockEventSink, Timestamp};

use crate::error::SyncError;
use crate::transport::{EventSubscription, SlaveLink, SyncEvent};

struct SlaveEntry {
    active: bool,
    subscription: EventSubscription,
    link: Arc<dyn SlaveLink>,
}

/// Event sink installed in the trailing slot of the master's ClockService.
///
/// Slaves are never removed, only deactivated, so a reconnecting slave keeps its place.
#[derive(Default)]
pub struct ClockMaster {
    slaves: RwLock<BTreeMap<String, SlaveEntry>>,
}

impl ClockMaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slave, or reactivate it with a new subscription and endpoint
    pub fn register_slave(
        &self,
        name: &str,
        subscription: EventSubscription,
        link: Arc<dyn SlaveLink>,
    ) {
        let mut slaves = self.slaves.write();
        let reactivated = slaves
            .insert(name.to_string(), SlaveEntry { active: true, subscription, link })
            .is_some();
        tracing::info!(slave = %name, ?subscription, reactivated, "Slave registered");
    }

    pub fn unregister_slave(&self, name: &str) -> Result<(), SyncError> {
        let mut slaves = self.slaves.write();
        let entry =
            slaves.get_mut(name).ok_or_else(|| SyncError::NotFound { name: name.to_string() })?;
        entry.active = false;
        tracing::info!(slave = %name, "Slave unregistered");
        Ok(())
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.slaves.read().get(name).map(|entry| entry.active).unwrap_or(false)
    }

    pub fn active_slaves(&self) -> Vec<String> {
        self.slaves
            .read()
            .iter()
            .filter(|(_, entry)| entry.active)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn forward(&self, event: SyncEvent) {
        let targets: Vec<(String, Arc<dyn SlaveLink>)> = self
            .slaves
            .read()
            .iter()
            .filter(|(_, entry)| entry.active && entry.subscription.matches(&event))
            .map(|(name, entry)| (name.clone(), entry.link.clone()))
            .collect();

        for (name, link) in targets {
            if let Err(e) = link.sync_time_event(event) {
                tracing::warn!(slave = %name, ?event, error = %e, "Deactivating unreachable slave");
                if let Some(entry) = self.slaves.write().get_mut(&name) {
                    entry.active = false;
                }
            }
        }
    }
}

impl ClockEventSink for ClockMaster {
    fn time_update_begin(&self, old: Timestamp, new: Timestamp) {
        self.forward(SyncEvent::UpdateBefore { new, old });
    }

    fn time_updating(&self, new: Timestamp) {
        self.forward(SyncEvent::Updating { new });
    }

    fn time_update_end(&self, new: Timestamp) {
        self.forward(SyncEvent::UpdateAfter { new });
    }

    fn time_reset_begin(&self, old: Timestamp, new: Timestamp) {
        self.forward(SyncEvent::Reset { new, old });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSlave {
        events: Mutex<Vec<SyncEvent>>,
        broken: AtomicBool,
    }

    impl SlaveLink for RecordingSlave {
        fn sync_time_event(&self, event: SyncEvent) -> Result<(), SyncError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(SyncError::Transport("connection lost".to_string()));
            }
            self.events.lock().push(event);
            Ok(())
        }
    }

    fn drive(master: &ClockMaster) {
        master.time_reset_begin(0, 10);
        master.time_reset_end(10);
        master.time_update_begin(10, 20);
        master.time_updating(20);
        master.time_update_end(20);
    }

    #[test]
    fn test_events_follow_subscription() {
        let master = ClockMaster::new();
        let plain = Arc::new(RecordingSlave::default());
        let framed = Arc::new(RecordingSlave::default());
        master.register_slave("plain", EventSubscription::for_events(false), plain.clone());
        master.register_slave("framed", EventSubscription::for_events(true), framed.clone());

        drive(&master);

        assert_eq!(
            *plain.events.lock(),
            vec![SyncEvent::Reset { new: 10, old: 0 }, SyncEvent::Updating { new: 20 }]
        );
        assert_eq!(
            *framed.events.lock(),
            vec![
                SyncEvent::Reset { new: 10, old: 0 },
                SyncEvent::UpdateBefore { new: 20, old: 10 },
                SyncEvent::Updating { new: 20 },
                SyncEvent::UpdateAfter { new: 20 },
            ]
        );
    }

    #[test]
    fn test_failed_delivery_deactivates_slave() {
        let master = ClockMaster::new();
        let slave = Arc::new(RecordingSlave::default());
        master.register_slave("s", EventSubscription::default(), slave.clone());

        slave.broken.store(true, Ordering::SeqCst);
        master.time_updating(1);
        assert!(!master.is_active("s"));

        slave.broken.store(false, Ordering::SeqCst);
        master.time_updating(2);
        assert!(slave.events.lock().is_empty());

        master.register_slave("s", EventSubscription::default(), slave.clone());
        master.time_updating(3);
        assert_eq!(*slave.events.lock(), vec![SyncEvent::Updating { new: 3 }]);
    }

    #[test]
    fn test_unregister() {
        let master = ClockMaster::new();
        assert_eq!(
            master.unregister_slave("s"),
            Err(SyncError::NotFound { name: "s".to_string() })
        );

        let slave = Arc::new(RecordingSlave::default());
        master.register_slave("s", EventSubscription::default(), slave.clone());
        assert_eq!(master.active_slaves(), vec!["s".to_string()]);
        master.unregister_slave("s").unwrap();
        assert!(master.active_slaves().is_empty());

        master.time_updating(5);
        assert!(slave.events.lock().is_empty());
        // Unregistering again still finds the inactive entry.
        assert!(master.unregister_slave("s").is_ok());
    }
}
