//! Registry of named clocks and main clock selection

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::{Clock, ClockEventSink, ClockType, Timestamp};
use crate::config::ClockServiceConfig;
use crate::continuous::ContinuousClock;
use crate::error::ClockError;
use crate::simtime::SimulationTimeClock;
use crate::{DEFAULT_MAIN_CLOCK, LOCAL_SYSTEM_REALTIME, LOCAL_SYSTEM_SIMTIME};

/// Lifecycle of the clock service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockServiceState {
    Idle,
    Running,
}

impl fmt::Display for ClockServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockServiceState::Idle => write!(f, "idle"),
            ClockServiceState::Running => write!(f, "running"),
        }
    }
}

/// Fans clock events out to every registered listener.
///
/// The master slot is always served last so remote participants only hear about a time change
/// after every local listener has processed it.
#[derive(Default)]
struct EventDispatcher {
    sinks: RwLock<Vec<Arc<dyn ClockEventSink>>>,
    master: RwLock<Option<Arc<dyn ClockEventSink>>>,
}

impl EventDispatcher {
    fn snapshot(&self) -> Vec<Arc<dyn ClockEventSink>> {
        let mut sinks = self.sinks.read().clone();
        if let Some(master) = self.master.read().as_ref() {
            sinks.push(master.clone());
        }
        sinks
    }
}

impl ClockEventSink for EventDispatcher {
    fn time_update_begin(&self, old: Timestamp, new: Timestamp) {
        for sink in self.snapshot() {
            sink.time_update_begin(old, new);
        }
    }

    fn time_updating(&self, new: Timestamp) {
        for sink in self.snapshot() {
            sink.time_updating(new);
        }
    }

    fn time_update_end(&self, new: Timestamp) {
        for sink in self.snapshot() {
            sink.time_update_end(new);
        }
    }

    fn time_reset_begin(&self, old: Timestamp, new: Timestamp) {
        for sink in self.snapshot() {
            sink.time_reset_begin(old, new);
        }
    }

    fn time_reset_end(&self, new: Timestamp) {
        for sink in self.snapshot() {
            sink.time_reset_end(new);
        }
    }
}

struct Inner {
    clocks: BTreeMap<String, Arc<dyn Clock>>,
    main_clock: String,
    state: ClockServiceState,
}

impl Inner {
    fn ensure_idle(&self, operation: &'static str) -> Result<(), ClockError> {
        match self.state {
            ClockServiceState::Idle => Ok(()),
            state => Err(ClockError::InvalidState { operation, state: state.to_string() }),
        }
    }

    fn clock(&self, name: &str) -> Result<Arc<dyn Clock>, ClockError> {
        self.clocks.get(name).cloned().ok_or_else(|| ClockError::not_found(name))
    }
}

/// Owns the participant's clocks and forwards the main clock's events to its listeners
pub struct ClockService {
    inner: RwLock<Inner>,
    dispatcher: Arc<EventDispatcher>,
}

impl ClockService {
    /// Create a service with the built-in clocks registered
    pub fn new(config: ClockServiceConfig) -> Self {
        let mut clocks: BTreeMap<String, Arc<dyn Clock>> = BTreeMap::new();
        clocks.insert(
            LOCAL_SYSTEM_REALTIME.to_string(),
            Arc::new(ContinuousClock::new(LOCAL_SYSTEM_REALTIME)),
        );
        clocks.insert(
            LOCAL_SYSTEM_SIMTIME.to_string(),
            Arc::new(SimulationTimeClock::new(
                LOCAL_SYSTEM_SIMTIME,
                config.effective_cycle_time(),
                config.effective_time_factor(),
            )),
        );

        tracing::info!(main_clock = %config.main_clock, "Creating ClockService");

        Self {
            inner: RwLock::new(Inner {
                clocks,
                main_clock: config.main_clock,
                state: ClockServiceState::Idle,
            }),
            dispatcher: Arc::new(EventDispatcher::default()),
        }
    }

    /// Register a clock under its own name
    pub fn register_clock(&self, clock: Arc<dyn Clock>) -> Result<(), ClockError> {
        let mut inner = self.inner.write();
        inner.ensure_idle("register_clock")?;

        let name = clock.name().to_string();
        if inner.clocks.contains_key(&name) {
            return Err(ClockError::duplicate(&name));
        }

        tracing::info!(clock = %name, clock_type = %clock.clock_type(), "Registered clock");
        inner.clocks.insert(name, clock);
        Ok(())
    }

    /// Remove a clock. Removing the current main clock selects the default main clock.
    pub fn unregister_clock(&self, name: &str) -> Result<(), ClockError> {
        let mut inner = self.inner.write();
        inner.ensure_idle("unregister_clock")?;

        if is_builtin(name) {
            return Err(ClockError::BuiltinClock { name: name.to_string() });
        }
        if inner.clocks.remove(name).is_none() {
            return Err(ClockError::not_found(name));
        }

        if inner.main_clock == name {
            tracing::warn!(
                clock = %name,
                fallback = DEFAULT_MAIN_CLOCK,
                "Unregistered the main clock, falling back to default"
            );
            inner.main_clock = DEFAULT_MAIN_CLOCK.to_string();
        }
        tracing::info!(clock = %name, "Unregistered clock");
        Ok(())
    }

    /// Select the main clock.
    ///
    /// Rejected while running. An unknown name selects the default main clock and reports NotFound.
    pub fn set_main_clock(&self, name: &str) -> Result<(), ClockError> {
        let mut inner = self.inner.write();
        inner.ensure_idle("set_main_clock")?;

        if !inner.clocks.contains_key(name) {
            tracing::warn!(
                clock = %name,
                fallback = DEFAULT_MAIN_CLOCK,
                "Main clock not found, falling back to default"
            );
            inner.main_clock = DEFAULT_MAIN_CLOCK.to_string();
            return Err(ClockError::not_found(name));
        }

        inner.main_clock = name.to_string();
        tracing::info!(clock = %name, "Main clock selected");
        Ok(())
    }

    pub fn main_clock_name(&self) -> String {
        self.inner.read().main_clock.clone()
    }

    pub fn main_clock(&self) -> Result<Arc<dyn Clock>, ClockError> {
        let inner = self.inner.read();
        inner.clock(&inner.main_clock)
    }

    /// Current time of the main clock, 0 while the service is not running
    pub fn time(&self) -> Timestamp {
        let clock = {
            let inner = self.inner.read();
            if inner.state != ClockServiceState::Running {
                return 0;
            }
            match inner.clock(&inner.main_clock) {
                Ok(clock) => clock,
                Err(_) => return 0,
            }
        };
        clock.time()
    }

    /// Current time of a specific clock
    pub fn time_of(&self, name: &str) -> Result<Timestamp, ClockError> {
        let clock = self.inner.read().clock(name)?;
        Ok(clock.time())
    }

    pub fn clock_type(&self) -> Result<ClockType, ClockError> {
        Ok(self.main_clock()?.clock_type())
    }

    pub fn clock_type_of(&self, name: &str) -> Result<ClockType, ClockError> {
        Ok(self.inner.read().clock(name)?.clock_type())
    }

    pub fn clock_names(&self) -> Vec<String> {
        self.inner.read().clocks.keys().cloned().collect()
    }

    pub fn state(&self) -> ClockServiceState {
        self.inner.read().state
    }

    /// Add a listener for the main clock's events
    pub fn register_event_sink(&self, sink: Arc<dyn ClockEventSink>) {
        self.dispatcher.sinks.write().push(sink);
    }

    pub fn unregister_event_sink(&self, sink: &Arc<dyn ClockEventSink>) -> Result<(), ClockError> {
        let mut sinks = self.dispatcher.sinks.write();
        let before = sinks.len();
        sinks.retain(|registered| !Arc::ptr_eq(registered, sink));
        if sinks.len() == before {
            return Err(ClockError::InvalidArgument("event sink is not registered".to_string()));
        }
        Ok(())
    }

    /// Install or clear the listener that is always notified after every other listener
    pub fn set_master_sink(&self, sink: Option<Arc<dyn ClockEventSink>>) {
        *self.dispatcher.master.write() = sink;
    }

    /// Start the main clock. Its events are forwarded to the registered listeners from now on.
    pub fn start(&self) -> Result<(), ClockError> {
        let clock = {
            let mut inner = self.inner.write();
            inner.ensure_idle("start")?;
            if !inner.clocks.contains_key(&inner.main_clock) {
                let missing =
                    std::mem::replace(&mut inner.main_clock, DEFAULT_MAIN_CLOCK.to_string());
                tracing::error!(
                    clock = %missing,
                    fallback = DEFAULT_MAIN_CLOCK,
                    "Configured main clock is not registered"
                );
                return Err(ClockError::NotFound { name: missing });
            }
            inner.state = ClockServiceState::Running;
            inner.clock(&inner.main_clock)?
        };

        // Listeners may query the service while the clock reports its initial reset.
        let sink: Arc<dyn ClockEventSink> = self.dispatcher.clone();
        if let Err(e) = clock.start(Arc::downgrade(&sink)) {
            self.inner.write().state = ClockServiceState::Idle;
            return Err(e);
        }

        tracing::info!(
            clock = %clock.name(),
            clock_type = %clock.clock_type(),
            "ClockService started"
        );
        Ok(())
    }

    /// Stop the main clock. Stopping an idle service is a no-op.
    pub fn stop(&self) -> Result<(), ClockError> {
        let clock = {
            let mut inner = self.inner.write();
            if inner.state == ClockServiceState::Idle {
                return Ok(());
            }
            inner.state = ClockServiceState::Idle;
            inner.clock(&inner.main_clock)?
        };

        clock.stop()?;
        tracing::info!(clock = %clock.name(), "ClockService stopped");
        Ok(())
    }
}

impl Default for ClockService {
    fn default() -> Self {
        Self::new(ClockServiceConfig::default())
    }
}

impl Drop for ClockService {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Failed to stop ClockService on drop: {}", e);
        }
    }
}

fn is_builtin(name: &str) -> bool {
    name == LOCAL_SYSTEM_REALTIME || name == LOCAL_SYSTEM_SIMTIME
}
