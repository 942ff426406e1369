//! Execution Infrastructure
//!
//! The worker pool that drives asynchronous step continuations.

pub mod scheduler;

pub use scheduler::{Scheduler, SchedulerConfig};
