//! Conditional Steps
//!
//! Branching between two steps by a predicate on the input.

use std::sync::Arc;

use log::debug;

use crate::coroutine::{ready, Continuation, NextStep, Step, StepFuture, Value};
use crate::error::{CoroutineError, StepResult};

type Predicate<I> = dyn Fn(&I) -> bool + Send + Sync;

/// Executes `then` if the predicate holds for the input and `otherwise`
/// if not.
///
/// Without an `otherwise` branch a failed predicate ends the run with an
/// absent result. Branch steps may suspend.
///
/// # Example
///
/// ```rust
/// use corunner::steps::{CodeExecution, Condition};
///
/// let classify = Condition::when(
///     |x: &i32| *x >= 0,
///     CodeExecution::apply(|_: i32| "positive"),
/// )
/// .otherwise(CodeExecution::apply(|_: i32| "negative"));
/// ```
pub struct Condition<I: Value, O: Value> {
    label: Option<String>,
    predicate: Box<Predicate<I>>,
    then: Arc<dyn Step<I, O>>,
    otherwise: Option<Arc<dyn Step<I, O>>>,
}

impl<I: Value, O: Value> Condition<I, O> {
    /// Creates a condition with only a `then` branch.
    pub fn when<P>(predicate: P, then: impl Step<I, O>) -> Self
    where
        P: Fn(&I) -> bool + Send + Sync + 'static,
    {
        Self {
            label: None,
            predicate: Box::new(predicate),
            then: Arc::new(then),
            otherwise: None,
        }
    }

    /// Sets the branch executed if the predicate does not hold.
    pub fn otherwise(mut self, step: impl Step<I, O>) -> Self {
        self.otherwise = Some(Arc::new(step));
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn select(&self, input: &I) -> Option<&Arc<dyn Step<I, O>>> {
        if (self.predicate)(input) {
            Some(&self.then)
        } else {
            self.otherwise.as_ref()
        }
    }

    fn stop(&self, continuation: &Continuation) -> StepResult<O> {
        debug!(
            "[run {}] Condition '{}' not met, terminating",
            continuation.id(),
            self.label()
        );
        self.terminate_coroutine(continuation)?;
        Err(CoroutineError::Terminated)
    }
}

impl<I: Value, O: Value> Step<I, O> for Condition<I, O> {
    fn execute(&self, input: I, continuation: &Continuation) -> StepResult<O> {
        match self.select(&input) {
            Some(branch) => branch.execute(input, continuation),
            None => self.stop(continuation),
        }
    }

    fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("Condition({})", self.then.label()))
    }

    fn run_blocking(&self, input: I, continuation: &Continuation) -> StepResult<O> {
        continuation.ensure_running()?;

        match self.select(&input) {
            Some(branch) => branch.run_blocking(input, continuation),
            None => self.stop(continuation),
        }
    }

    // The branch is scheduled on the evaluated input so it can suspend.
    fn run_async(
        self: Arc<Self>,
        previous: StepFuture<I>,
        next: Option<NextStep<O>>,
        continuation: &Continuation,
    ) {
        let label = self.label();

        continuation.when_ready(previous, label, move |input, continuation| {
            match self.select(&input) {
                Some(branch) => {
                    Arc::clone(branch).run_async(ready(input), next, continuation);
                    Ok(())
                }
                None => self.stop(continuation).map(|_| ()),
            }
        });
    }
}
