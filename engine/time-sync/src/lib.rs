//! # TimeSync
//!
//! Master/slave time distribution between simulation participants.
//!
//! One participant is the timing master: a [`ClockMaster`] listens to its main clock and forwards
//! every change to the registered slaves. Slaves follow through a proxy clock selected as their
//! main clock, either interpolating a continuous master between periodic time requests or
//! stepping along with each update of a discrete one. Transports implement [`MasterLink`] and
//! [`SlaveLink`]; [`LocalTimingBus`] connects participants inside one process.

pub mod config;
pub mod error;
pub mod master;
pub mod service;
pub mod slave;
pub mod transport;



pub use config::{ClockSyncConfig, SyncMode};
pub use error::SyncError;
pub use master::ClockMaster;
pub use service::ClockSyncService;
pub use slave::{DiscreteSlaveClock, InterpolatingSlaveClock, InterpolationTime};
pub use transport::{EventSubscription, LocalTimingBus, MasterLink, SlaveLink, SyncEvent};

/// Current version of the TimeSync
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Slave clock interpolating a continuous master
pub const SLAVE_MASTER_ON_DEMAND: &str = "slave_master_on_demand";

/// Slave clock stepped by a discrete master
pub const SLAVE_MASTER_ON_DEMAND_DISCRETE: &str = "slave_master_on_demand_discrete";

/// Default interval between time requests to a continuous master (1s)
pub const DEFAULT_SYNC_CYCLE_TIME_MS: u64 = 1_000;

/// Default time a master waits for a discrete slave to apply an event (10s)
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;
