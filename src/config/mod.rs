//! Configuration module for the dispatcher.
//!
//! Handles loading and validation of scheduler tunables, the identity
//! roster, and dry-run workload files.

mod roster;
mod settings;
mod workload;

pub use roster::{IdentityRoster, RosterEntry, RosterError};
pub use settings::{
    BatchTuning, BreakerTuning, ConfigError, RateSettings, RetryTuning, SchedulerSettings,
};
pub use workload::{Workload, WorkloadEntry, WorkloadError};
