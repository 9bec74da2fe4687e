//! Debounced, clock-driven trigger that runs only while its client owns the object's baton.
//!
//! [`TriggerScheduler`] composes two pieces:
//! - [`TriggerState`], the pure `Inactive -> Active -> Suppressed` machine, and
//! - the async driver that ticks it from a Tokio interval and re-enables firing from a
//!   cancellable refractory timer.
//!
//! Side effects go through the [`ActionSink`]; object metadata comes from an
//! [`ObjectDirectory`]. Both are external collaborators supplied by the host.

#![forbid(unsafe_code)]

mod config;
mod directory;
mod predicate;
mod scheduler;
mod sink;
mod state;

pub use config::{
    ConfigError, TriggerConfig, DEFAULT_REFRACTORY_PERIOD, DEFAULT_TICK_INTERVAL,
    MIN_REFRACTORY_PERIOD,
};
pub use directory::{ObjectDirectory, ObjectId, ObjectRecord, Position, StaticDirectory};
pub use predicate::FirePredicate;
pub use scheduler::{FireTarget, TickOutcome, TriggerScheduler, TriggerSnapshot};
pub use sink::{ActionSink, CueHandle, RecordingSink, SinkCall, SinkError};
pub use state::{TriggerPhase, TriggerState};
