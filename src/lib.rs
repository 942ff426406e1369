//! CoRunner - Cooperative Coroutine Engine
//!
//! Composes reusable, stateless steps into coroutines that run either
//! blocking on the calling thread or as chains of asynchronous
//! continuations on a shared worker pool. Steps waiting for external events
//! suspend without occupying a worker thread and are resumed exactly once
//! by whoever observes the event.
//!
//! # Architecture
//!
//! - [`coroutine`]: Steps, chains, continuations, suspensions and scopes
//! - [`steps`]: Built-in step variants (code, condition, I/O, ...)
//! - [`execution`]: The worker pool scheduling step continuations
//! - [`monitoring`]: Per-run execution timeline
//! - [`config`]: YAML engine configuration
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```rust
//! use corunner::coroutine::{Coroutine, CoroutineScope};
//! use corunner::steps::CodeExecution;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coroutine = Coroutine::first("Arithmetic", CodeExecution::apply(|x: i32| x * 2))
//!         .then(CodeExecution::apply(|x: i32| x + 1));
//!
//!     let scope = CoroutineScope::new("main")?;
//!     assert_eq!(coroutine.run_blocking(3, &scope)?, Some(7));
//!
//!     let run = coroutine.start(5, &scope);
//!     scope.await_all()?;
//!     assert_eq!(run.result::<i32>()?, Some(11));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coroutine;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod steps;

// Re-export commonly used types
pub use config::{load_config, EngineConfig};
pub use coroutine::{Continuation, Coroutine, CoroutineScope, Step, Suspension};
pub use error::{CoroutineError, ScopeFailure, StepResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "CoRunner";
