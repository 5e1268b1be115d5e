//! Live-notification scheduling.
//!
//! - [`TimerRegistry`]: at most one pending notification per channel
//! - [`Scheduler`]: periodic sweeps that probe and arm
//! - [`supervise_forever`] / [`supervise_bounded`]: crash recovery for loops

mod failure_tracker;
mod query;
mod registry;
mod service;
mod supervisor;

pub use failure_tracker::FailureTracker;
pub use query::when_live;
pub use registry::{ArmOutcome, TimerRegistry};
pub use service::{DeliveryReport, Scheduler, SweepReport};
pub use supervisor::{BoundedPolicy, Progress, supervise_bounded, supervise_forever};
