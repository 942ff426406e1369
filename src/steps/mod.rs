//! Built-in Steps
//!
//! Ready-made step variants:
//!
//! - [`CodeExecution`]: wraps a closure
//! - [`Condition`]: branches by a predicate
//! - [`WithFallback`]: converts execution failures into a value
//! - [`TransactionalStep`]: commit or rollback around the work
//! - [`IoStep`]: request/response over an [`Endpoint`], suspending in
//!   asynchronous mode
//! - [`Delay`]: timer based pause

pub mod code;
pub mod condition;
pub mod delay;
pub mod fallback;
pub mod io;
pub mod transactional;

pub use code::CodeExecution;
pub use condition::Condition;
pub use delay::Delay;
pub use fallback::WithFallback;
pub use io::{Connection, Endpoint, IoStep, LoopbackEndpoint, ResponseCallback};
pub use transactional::{Transactional, TransactionalStep};
