//! Error Types
//!
//! Every step operation returns [`StepResult`]. The error enum is `Clone`
//! because a single failure is stored in the run's continuation and also
//! travels down the remaining future chain.

use std::error::Error;
use std::sync::Arc;

/// Result type of all step and continuation operations.
pub type StepResult<T> = Result<T, CoroutineError>;

/// Boxed error of user code wrapped into steps and I/O collaborators.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors raised while building, running or resuming coroutines.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoroutineError {
    /// A step's `execute` failed.
    #[error("step '{step}' failed: {source}")]
    Execution {
        step: String,
        #[source]
        source: Arc<dyn Error + Send + Sync>,
    },

    /// A suspension was resumed a second time.
    #[error("suspension of step '{step}' has already been resumed")]
    AlreadyResumed { step: String },

    /// A suspension was resumed after it (or its run) had been cancelled.
    #[error("suspension of step '{step}' has been cancelled")]
    SuspensionCancelled { step: String },

    /// `resume()` was called on a suspension that captured no input value.
    #[error("suspension of step '{step}' holds no value to resume with")]
    MissingInput { step: String },

    /// A finish or fail transition on a run that already ended.
    #[error("run {run} of coroutine '{coroutine}' is already {state}")]
    AlreadyTerminated {
        coroutine: String,
        run: u64,
        state: &'static str,
    },

    /// A step tried to suspend while its run executes in blocking mode.
    #[error("step '{step}' cannot suspend a coroutine running in blocking mode")]
    BlockingSuspension { step: String },

    /// The run was cancelled through its scope or a suspension.
    #[error("coroutine run was cancelled")]
    Cancelled,

    /// Signals that the run already ended before a step could execute.
    #[error("coroutine run has already ended")]
    Terminated,

    #[error("coroutine run has not finished yet")]
    NotFinished,

    /// The finished result is not of the requested type.
    #[error("result of run {run} is not of type {expected}")]
    ResultType { run: u64, expected: &'static str },

    /// A scheduled step task did not complete (panic or runtime shutdown).
    #[error("task of step '{step}' did not complete: {message}")]
    Scheduler { step: String, message: String },

    #[error("failed to start scheduler: {0}")]
    SchedulerStart(#[source] Arc<std::io::Error>),
}

impl CoroutineError {
    /// Wraps an arbitrary error as the execution failure of a step.
    pub fn execution(
        step: impl Into<String>,
        error: impl Into<BoxError>,
    ) -> Self {
        CoroutineError::Execution {
            step: step.into(),
            source: Arc::from(error.into()),
        }
    }

    /// Returns true for the internal signal of a run that already ended.
    ///
    /// Such errors are never recorded as the run's failure.
    pub fn is_termination(&self) -> bool {
        matches!(self, CoroutineError::Terminated)
    }

    /// Returns true if the error reports a misuse of a suspension.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            CoroutineError::AlreadyResumed { .. }
                | CoroutineError::SuspensionCancelled { .. }
                | CoroutineError::MissingInput { .. }
        )
    }
}

/// Failure of a coroutine scope: the first failed run plus all later ones.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} coroutine run(s) failed, first: {error}", .suppressed.len() + 1)]
pub struct ScopeFailure {
    #[source]
    pub error: CoroutineError,
    pub suppressed: Vec<CoroutineError>,
}

impl ScopeFailure {
    /// Builds a failure from errors in the order they were captured.
    ///
    /// Returns `None` for an empty list.
    pub fn from_errors(mut errors: Vec<CoroutineError>) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let error = errors.remove(0);
        Some(Self {
            error,
            suppressed: errors,
        })
    }
}
