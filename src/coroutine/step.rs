//! Coroutine Steps
//!
//! A [`Step`] is the reusable unit of execution of a coroutine. Simple steps
//! only implement [`Step::execute`]; the provided [`Step::run_blocking`] and
//! [`Step::run_async`] build the two execution strategies on top of it.
//!
//! Steps that need to wait for an external event override `run_async`,
//! create a [`Suspension`] through [`Step::suspend`] or
//! [`Step::suspend_with`] and hand it to whoever will observe the event.
//! Resuming the suspension is then the only way the run continues.
//!
//! Steps hold no per-run state; everything run-scoped lives in the
//! [`Continuation`] or the [`Suspension`], so one step instance can serve
//! any number of concurrent runs.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{Continuation, Suspension};
use crate::error::{CoroutineError, StepResult};

/// Bound of all values flowing between steps.
pub trait Value: Send + 'static {}

impl<T: Send + 'static> Value for T {}

/// Future of the value produced by an asynchronously executed step.
pub type StepFuture<T> = Pin<Box<dyn Future<Output = StepResult<T>> + Send + 'static>>;

/// Returns a step future that is already completed with `value`.
pub fn ready<T: Value>(value: T) -> StepFuture<T> {
    Box::pin(std::future::ready(Ok(value)))
}

/// Returns a step future that is already completed with `error`.
pub fn failed<T: Value>(error: CoroutineError) -> StepFuture<T> {
    Box::pin(std::future::ready(Err(error)))
}

/// Returns the type name of `T` without module path and generic arguments.
pub fn short_type_name<T: ?Sized>() -> String {
    let name = type_name::<T>();
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// An execution step that transforms an input value into an output value.
pub trait Step<I: Value, O: Value>: Send + Sync + 'static {
    /// Performs the actual work of this step.
    ///
    /// Must only have side effects visible through the returned value or
    /// the continuation.
    fn execute(&self, input: I, continuation: &Continuation) -> StepResult<O>;

    /// Returns the label that identifies this step in its coroutine.
    fn label(&self) -> String {
        short_type_name::<Self>()
    }

    /// Runs this step on the calling thread and returns its result.
    fn run_blocking(&self, input: I, continuation: &Continuation) -> StepResult<O> {
        continuation.run_step(&self.label(), |continuation| {
            self.execute(input, continuation)
        })
    }

    /// Schedules this step as continuation of a previous execution and
    /// continues with `next` afterwards.
    ///
    /// Without a next step this is the final step of the chain and its
    /// value becomes the result of the run.
    fn run_async(
        self: Arc<Self>,
        previous: StepFuture<I>,
        next: Option<NextStep<O>>,
        continuation: &Continuation,
    ) {
        let label = self.label();
        let execution = continuation.then_execute(previous, label, move |input, continuation| {
            self.execute(input, continuation)
        });

        continuation.continue_with(execution, next);
    }

    /// Suspends the run until the value of this step is supplied by the
    /// party that resumes the returned suspension.
    ///
    /// Fails (and fails the run) if the run executes in blocking mode.
    fn suspend(
        &self,
        next: Option<NextStep<O>>,
        continuation: &Continuation,
    ) -> StepResult<Suspension<O>> {
        Suspension::new(self.label(), None, next, continuation)
    }

    /// Suspends the run with a value that is already known and will be
    /// passed on by [`Suspension::resume`].
    fn suspend_with(
        &self,
        value: O,
        next: Option<NextStep<O>>,
        continuation: &Continuation,
    ) -> StepResult<Suspension<O>> {
        Suspension::new(self.label(), Some(value), next, continuation)
    }

    /// Ends the run regularly with an absent result.
    ///
    /// Steps that are still scheduled after this call are skipped.
    fn terminate_coroutine(&self, continuation: &Continuation) -> StepResult<()> {
        continuation.finish::<()>(None)
    }
}

/// The remainder of a step chain that consumes values of type `I`.
///
/// Built from a step and the step's own successor, so a chain is run by
/// handing each step the `NextStep` of everything behind it.
pub struct NextStep<I> {
    label: String,
    run: Arc<dyn Fn(StepFuture<I>, &Continuation) + Send + Sync>,
}

impl<I: Value> NextStep<I> {
    /// Creates the successor that runs `step` and then `next`.
    pub fn new<O, S>(step: Arc<S>, next: Option<NextStep<O>>) -> Self
    where
        O: Value,
        S: Step<I, O> + ?Sized,
    {
        let label = step.label();
        let run = move |previous: StepFuture<I>, continuation: &Continuation| {
            Arc::clone(&step).run_async(previous, next.clone(), continuation)
        };

        Self {
            label,
            run: Arc::new(run),
        }
    }

    /// Creates a successor from a function that takes over the value of the
    /// previous execution.
    ///
    /// The function is responsible for continuing the run, typically through
    /// [`Continuation::continue_with`].
    pub fn from_fn<F>(label: impl Into<String>, run: F) -> Self
    where
        F: Fn(StepFuture<I>, &Continuation) + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    /// Returns the label of the first step of this successor.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs this successor on the value of `previous`.
    pub fn run_async(&self, previous: StepFuture<I>, continuation: &Continuation) {
        (self.run)(previous, continuation)
    }
}

impl<I> Clone for NextStep<I> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<I> fmt::Debug for NextStep<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NextStep").field(&self.label).finish()
    }
}
