//! Coroutine Engine
//!
//! Core types of cooperative coroutines composed from steps:
//!
//! - [`Step`]: reusable unit of work from an input to an output value
//! - [`StepChain`]: two steps run in sequence, itself a step
//! - [`Continuation`]: context and outcome of a single run
//! - [`Suspension`]: single-use token of a paused step
//! - [`Coroutine`]: named, startable definition of a step chain
//! - [`CoroutineScope`]: tracks, awaits and cancels a group of runs

pub mod chain;
pub mod continuation;
pub mod definition;
pub mod scope;
pub mod step;
pub mod suspension;


pub use chain::StepChain;
pub use continuation::{Continuation, ExecutionMode};
pub use definition::Coroutine;
pub use scope::CoroutineScope;
pub use step::{failed, ready, short_type_name, NextStep, Step, StepFuture, Value};
pub use suspension::{Suspension, SuspensionState};
