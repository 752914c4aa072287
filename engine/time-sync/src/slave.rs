//! Slave clocks following a remote timing master

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, select, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use simulation_clock::{
    Clock, ClockError, ClockEventSink, ClockType, ContinuousClock, DiscreteClock, TimeSource,
    Timestamp,
};

use crate::error::SyncError;
use crate::transport::{EventSubscription, MasterLink, SlaveLink, SyncEvent};
use crate::{SLAVE_MASTER_ON_DEMAND, SLAVE_MASTER_ON_DEMAND_DISCRETE};

type TimeUpdate = Box<dyn Fn(Timestamp, Duration) + Send + Sync>;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn is_set(&self) -> bool {
        *self.stopped.lock()
    }

    fn set(&self, value: bool) {
        *self.stopped.lock() = value;
        self.condvar.notify_all();
    }

    fn wait(&self, timeout: Duration) {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.condvar.wait_for(&mut stopped, timeout);
        }
    }
}

struct ConnectionShared {
    participant: String,
    link: Arc<dyn MasterLink>,
    endpoint: Arc<dyn SlaveLink>,
    subscription: EventSubscription,
    sync_cycle: Duration,
    update: TimeUpdate,
    registered: AtomicBool,
    master_type: Mutex<Option<ClockType>>,
    stop: StopSignal,
}

impl ConnectionShared {
    fn register(&self) -> Result<ClockType, SyncError> {
        self.link.register_slave(&self.participant, self.subscription, self.endpoint.clone())?;
        self.registered.store(true, Ordering::Release);
        let master_type = self.link.master_clock_type()?;
        *self.master_type.lock() = Some(master_type);
        tracing::info!(
            participant = %self.participant,
            master_clock_type = %master_type,
            "Registered with timing master"
        );
        Ok(master_type)
    }

    fn poll(&self) -> Result<(), SyncError> {
        let sent = Instant::now();
        let time = self.link.master_time()?;
        (self.update)(time, sent.elapsed());
        Ok(())
    }

    fn run(&self) {
        tracing::debug!(participant = %self.participant, "Master poller started");
        while !self.stop.is_set() {
            if !self.registered.load(Ordering::Acquire) {
                if let Err(e) = self.register() {
                    tracing::debug!(
                        participant = %self.participant,
                        error = %e,
                        "Master unreachable"
                    );
                }
            }
            let continuous = *self.master_type.lock() == Some(ClockType::Continuous);
            if self.registered.load(Ordering::Acquire) && continuous {
                if let Err(e) = self.poll() {
                    tracing::warn!(
                        participant = %self.participant,
                        error = %e,
                        "Time request failed"
                    );
                    self.registered.store(false, Ordering::Release);
                }
            }
            self.stop.wait(self.sync_cycle);
        }
        tracing::debug!(participant = %self.participant, "Master poller stopped");
    }
}

/// Registration with the master plus the thread polling its time
struct SlaveConnection {
    shared: Arc<ConnectionShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SlaveConnection {
    fn new(
        participant: &str,
        link: Arc<dyn MasterLink>,
        endpoint: Arc<dyn SlaveLink>,
        subscription: EventSubscription,
        sync_cycle: Duration,
        update: TimeUpdate,
    ) -> Self {
        Self {
            shared: Arc::new(ConnectionShared {
                participant: participant.to_string(),
                link,
                endpoint,
                subscription,
                sync_cycle,
                update,
                registered: AtomicBool::new(false),
                master_type: Mutex::new(None),
                stop: StopSignal::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Register with the master. Polling starts unless the master is known to be discrete;
    /// an unreachable master is retried from the poller.
    fn connect(&self) -> Result<(), SyncError> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shared.registered.load(Ordering::Acquire) {
            return Ok(());
        }

        let master_type = match self.shared.register() {
            Ok(master_type) => Some(master_type),
            Err(e) => {
                tracing::warn!(
                    participant = %self.shared.participant,
                    error = %e,
                    "Timing master not reachable yet"
                );
                None
            }
        };
        if master_type == Some(ClockType::Discrete) {
            return Ok(());
        }

        self.shared.stop.set(false);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("time-sync-{}", self.shared.participant))
            .spawn(move || shared.run())
            .map_err(|e| SyncError::transport(format!("failed to spawn master poller: {}", e)))?;
        *worker = Some(handle);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), SyncError> {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            self.shared.stop.set(true);
            if handle.join().is_err() {
                tracing::error!(participant = %self.shared.participant, "Master poller panicked");
            }
        }

        if self.shared.registered.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.shared.link.unregister_slave(&self.shared.participant) {
                tracing::warn!(
                    participant = %self.shared.participant,
                    error = %e,
                    "Failed to unregister from timing master"
                );
            }
        }
        Ok(())
    }

    fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::Acquire)
    }
}

impl Drop for SlaveConnection {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[derive(Debug)]
struct InterpolationState {
    base: Timestamp,
    received_at: Instant,
    last: Timestamp,
    reset_target: Option<Timestamp>,
}

/// Master time extrapolated with the local monotonic clock since the last poll.
///
/// Never runs backwards: a poll behind the last reported time holds the time until the
/// extrapolation catches up.
#[derive(Debug)]
pub struct InterpolationTime {
    state: Mutex<InterpolationState>,
}

impl InterpolationTime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InterpolationState {
                base: 0,
                received_at: Instant::now(),
                last: 0,
                reset_target: None,
            }),
        }
    }

    /// Apply a master time sampled `round_trip` ago, crediting half the round trip as latency
    pub fn set_time(&self, master_time: Timestamp, round_trip: Duration) {
        let mut state = self.state.lock();
        state.base = master_time + round_trip.as_micros() as Timestamp / 2;
        state.received_at = Instant::now();
    }

    /// The next source reset lands on `time` instead of the interpolated time
    fn prepare_reset(&self, time: Timestamp) {
        self.state.lock().reset_target = Some(time);
    }
}

impl Default for InterpolationTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for InterpolationTime {
    fn new_time(&self) -> Timestamp {
        let mut state = self.state.lock();
        let time = state.base + state.received_at.elapsed().as_micros() as Timestamp;
        state.last = state.last.max(time);
        state.last
    }

    fn reset_time(&self) -> Timestamp {
        let mut state = self.state.lock();
        let now = Instant::now();
        let time = match state.reset_target.take() {
            Some(target) => target,
            None => state.base + now.duration_since(state.received_at).as_micros() as Timestamp,
        };
        state.base = time;
        state.received_at = now;
        state.last = time;
        time
    }
}

/// Master resets reach the interpolating clock immediately; updates are polled
struct ResetForwarder {
    clock: Weak<ContinuousClock<InterpolationTime>>,
}

impl SlaveLink for ResetForwarder {
    fn sync_time_event(&self, event: SyncEvent) -> Result<(), SyncError> {
        let clock = self
            .clock
            .upgrade()
            .ok_or_else(|| SyncError::transport("slave clock no longer exists"))?;
        if let SyncEvent::Reset { new, .. } = event {
            clock.source().prepare_reset(new);
            clock.reset();
        }
        Ok(())
    }
}

/// Continuous clock interpolating the time of a continuous master between periodic polls
pub struct InterpolatingSlaveClock {
    clock: Arc<ContinuousClock<InterpolationTime>>,
    connection: SlaveConnection,
}

impl InterpolatingSlaveClock {
    pub fn new(participant: &str, link: Arc<dyn MasterLink>, sync_cycle: Duration) -> Self {
        let clock = Arc::new(ContinuousClock::with_source(
            SLAVE_MASTER_ON_DEMAND,
            InterpolationTime::new(),
        ));
        let endpoint = Arc::new(ResetForwarder { clock: Arc::downgrade(&clock) });
        let target = Arc::downgrade(&clock);
        let update: TimeUpdate = Box::new(move |time, round_trip| {
            if let Some(clock) = target.upgrade() {
                clock.source().set_time(time, round_trip);
            }
        });
        let connection = SlaveConnection::new(
            participant,
            link,
            endpoint,
            EventSubscription::for_events(false),
            sync_cycle,
            update,
        );
        Self { clock, connection }
    }

    pub fn connect(&self) -> Result<(), SyncError> {
        self.connection.connect()
    }

    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.connection.disconnect()
    }

    pub fn is_registered(&self) -> bool {
        self.connection.is_registered()
    }
}

impl Clock for InterpolatingSlaveClock {
    fn name(&self) -> &str {
        self.clock.name()
    }

    fn clock_type(&self) -> ClockType {
        ClockType::Continuous
    }

    fn time(&self) -> Timestamp {
        self.clock.time()
    }

    fn reset(&self) {
        self.clock.reset()
    }

    fn start(&self, sink: Weak<dyn ClockEventSink>) -> Result<(), ClockError> {
        self.clock.start(sink)
    }

    fn stop(&self) -> Result<(), ClockError> {
        self.clock.stop()
    }
}

/// A master event plus the channel acknowledging its application
struct Delivery {
    event: SyncEvent,
    ack: Sender<()>,
}

/// Hands master events to the receiver thread and waits until they are applied.
///
/// The master's call returns once the slave clock, and every job it drives, has processed the
/// event, so a discrete slave never falls behind its master. A slave that does not answer within
/// `ack_timeout` fails the delivery and is deactivated by the master.
struct ChannelSlaveLink {
    sender: Sender<Delivery>,
    accepting: Arc<Mutex<bool>>,
    ack_timeout: Duration,
}

impl ChannelSlaveLink {
    fn timeout(&self) -> SyncError {
        SyncError::AckTimeout { timeout_ms: self.ack_timeout.as_millis() as u64 }
    }
}

impl SlaveLink for ChannelSlaveLink {
    fn sync_time_event(&self, event: SyncEvent) -> Result<(), SyncError> {
        let (ack, acknowledged) = channel::bounded(1);
        {
            // Held while queueing so `stop` cannot drain the queue between check and send.
            let accepting = self.accepting.lock();
            if !*accepting {
                return Ok(());
            }
            self.sender.send_timeout(Delivery { event, ack }, self.ack_timeout).map_err(
                |e| match e {
                    SendTimeoutError::Timeout(_) => self.timeout(),
                    SendTimeoutError::Disconnected(_) => {
                        SyncError::transport("slave receiver is gone")
                    }
                },
            )?;
        }

        match acknowledged.recv_timeout(self.ack_timeout) {
            Ok(()) => Ok(()),
            // Dropped unapplied because the slave clock stopped.
            Err(RecvTimeoutError::Disconnected) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(self.timeout()),
        }
    }
}

fn receive_events(clock: Arc<DiscreteClock>, events: Receiver<Delivery>, shutdown: Receiver<()>) {
    // The first reset after start always applies so the slave adopts the master's time base.
    let mut synced = false;
    loop {
        let delivery = select! {
            recv(shutdown) -> _ => break,
            recv(events) -> delivery => match delivery {
                Ok(delivery) => delivery,
                Err(_) => break,
            },
        };
        match delivery.event {
            SyncEvent::Reset { new, old } => {
                if new != old || !synced {
                    clock.reset_to(new);
                    synced = true;
                }
            }
            SyncEvent::Updating { new } => {
                clock.set_new_time(new, true);
                synced = true;
            }
            // Begin/end framing is produced by the local clock.
            SyncEvent::UpdateBefore { .. } | SyncEvent::UpdateAfter { .. } => {}
        }
        // The master may have given up waiting.
        let _ = delivery.ack.send(());
    }
    tracing::debug!(clock = %clock.name(), "Slave receiver stopped");
}

struct Receiving {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Discrete clock stepped by the events of a timing master.
///
/// Events are applied on a receiver thread in delivery order, each acknowledged to the master
/// once applied. A continuous master is polled instead, each poll becoming one step.
pub struct DiscreteSlaveClock {
    clock: Arc<DiscreteClock>,
    receiver: Receiver<Delivery>,
    accepting: Arc<Mutex<bool>>,
    receiving: Mutex<Option<Receiving>>,
    connection: SlaveConnection,
}

impl DiscreteSlaveClock {
    pub fn new(
        participant: &str,
        link: Arc<dyn MasterLink>,
        sync_cycle: Duration,
        ack_timeout: Duration,
    ) -> Self {
        let clock = Arc::new(DiscreteClock::new(SLAVE_MASTER_ON_DEMAND_DISCRETE));
        let (sender, receiver) = channel::bounded(1);
        let accepting = Arc::new(Mutex::new(false));
        let endpoint =
            Arc::new(ChannelSlaveLink { sender, accepting: accepting.clone(), ack_timeout });
        let target = Arc::downgrade(&clock);
        let update: TimeUpdate = Box::new(move |time, _round_trip| {
            if let Some(clock) = target.upgrade() {
                clock.set_new_time(time, true);
            }
        });
        let connection = SlaveConnection::new(
            participant,
            link,
            endpoint,
            EventSubscription::for_events(false),
            sync_cycle,
            update,
        );
        Self { clock, receiver, accepting, receiving: Mutex::new(None), connection }
    }

    pub fn connect(&self) -> Result<(), SyncError> {
        self.connection.connect()
    }

    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.connection.disconnect()
    }

    pub fn is_registered(&self) -> bool {
        self.connection.is_registered()
    }

    /// Drop queued deliveries, releasing a master waiting on them
    fn drain(&self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

impl Clock for DiscreteSlaveClock {
    fn name(&self) -> &str {
        self.clock.name()
    }

    fn clock_type(&self) -> ClockType {
        ClockType::Discrete
    }

    fn time(&self) -> Timestamp {
        self.clock.time()
    }

    fn reset(&self) {
        self.clock.reset()
    }

    fn start(&self, sink: Weak<dyn ClockEventSink>) -> Result<(), ClockError> {
        self.clock.start(sink)?;

        self.drain();
        let (shutdown, shutdown_rx) = channel::bounded(1);
        let clock = self.clock.clone();
        let events = self.receiver.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-receiver", self.clock.name()))
            .spawn(move || receive_events(clock, events, shutdown_rx));
        match spawned {
            Ok(handle) => {
                *self.receiving.lock() = Some(Receiving { shutdown, handle });
                *self.accepting.lock() = true;
                Ok(())
            }
            Err(e) => {
                self.clock.stop()?;
                Err(ClockError::Internal(format!("failed to spawn slave receiver: {}", e)))
            }
        }
    }

    fn stop(&self) -> Result<(), ClockError> {
        *self.accepting.lock() = false;
        if let Some(Receiving { shutdown, handle }) = self.receiving.lock().take() {
            drop(shutdown);
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!(clock = %self.clock.name(), "Slave receiver panicked");
            }
        }
        self.drain();
        self.clock.stop()
    }
}

impl Drop for DiscreteSlaveClock {
    fn drop(&mut self) {
        let _ = Clock::stop(self);
    }
}
