//! Step Chains
//!
//! A [`StepChain`] sequences two steps and is itself a step, so chains of
//! chains form the body of a coroutine.

use std::sync::Arc;

use super::step::{NextStep, Step, StepFuture, Value};
use super::Continuation;
use crate::error::StepResult;

/// Composite step feeding the output of `first` into `second`.
pub struct StepChain<I: Value, M: Value, O: Value> {
    first: Arc<dyn Step<I, M>>,
    second: Arc<dyn Step<M, O>>,
}

impl<I: Value, M: Value, O: Value> StepChain<I, M, O> {
    pub fn new(first: Arc<dyn Step<I, M>>, second: Arc<dyn Step<M, O>>) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &Arc<dyn Step<I, M>> {
        &self.first
    }

    pub fn second(&self) -> &Arc<dyn Step<M, O>> {
        &self.second
    }
}

impl<I: Value, M: Value, O: Value> Step<I, O> for StepChain<I, M, O> {
    fn execute(&self, input: I, continuation: &Continuation) -> StepResult<O> {
        let intermediate = self.first.execute(input, continuation)?;
        self.second.execute(intermediate, continuation)
    }

    fn label(&self) -> String {
        format!("{} -> {}", self.first.label(), self.second.label())
    }

    // Each sub-step records and checks the run state on its own.
    fn run_blocking(&self, input: I, continuation: &Continuation) -> StepResult<O> {
        let intermediate = self.first.run_blocking(input, continuation)?;
        self.second.run_blocking(intermediate, continuation)
    }

    fn run_async(
        self: Arc<Self>,
        previous: StepFuture<I>,
        next: Option<NextStep<O>>,
        continuation: &Continuation,
    ) {
        let second = NextStep::new(Arc::clone(&self.second), next);
        Arc::clone(&self.first).run_async(previous, Some(second), continuation);
    }
}
