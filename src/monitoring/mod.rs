//! Monitoring Module
//!
//! Provides instrumentation of coroutine runs.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Step event timing per run

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
