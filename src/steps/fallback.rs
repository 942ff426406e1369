//! Fallback Steps

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::coroutine::{Continuation, NextStep, Step, StepFuture, Value};
use crate::error::{CoroutineError, StepResult};

type Fallback<O> = dyn Fn(&CoroutineError) -> O + Send + Sync;

/// Converts an execution failure of the wrapped step into a value.
///
/// Only [`CoroutineError::Execution`] failures are caught; cancellation,
/// termination and protocol errors pass through unchanged. In asynchronous
/// mode the wrapped step keeps its own scheduling, so a suspending step
/// still suspends.
pub struct WithFallback<I: Value, O: Value> {
    step: Arc<dyn Step<I, O>>,
    fallback: Box<Fallback<O>>,
}

impl<I: Value, O: Value> WithFallback<I, O> {
    pub fn new<F>(step: impl Step<I, O>, fallback: F) -> Self
    where
        F: Fn(&CoroutineError) -> O + Send + Sync + 'static,
    {
        Self {
            step: Arc::new(step),
            fallback: Box::new(fallback),
        }
    }

    /// Falls back to a fixed value.
    pub fn or_value(step: impl Step<I, O>, value: O) -> Self
    where
        O: Clone + Sync,
    {
        Self::new(step, move |_| value.clone())
    }

    fn recover(&self, error: CoroutineError, continuation: &Continuation) -> StepResult<O> {
        match error {
            CoroutineError::Execution { .. } => {
                debug!(
                    "[run {}] Using fallback of '{}': {}",
                    continuation.id(),
                    self.step.label(),
                    error
                );
                Ok((self.fallback)(&error))
            }
            error => Err(error),
        }
    }
}

impl<I: Value, O: Value> Step<I, O> for WithFallback<I, O> {
    fn execute(&self, input: I, continuation: &Continuation) -> StepResult<O> {
        self.step
            .execute(input, continuation)
            .or_else(|error| self.recover(error, continuation))
    }

    fn label(&self) -> String {
        format!("WithFallback({})", self.step.label())
    }

    fn run_async(
        self: Arc<Self>,
        previous: StepFuture<I>,
        next: Option<NextStep<O>>,
        continuation: &Continuation,
    ) {
        // Failures of earlier steps pass through the wrapped step and must
        // not be recovered.
        let upstream_failed = Arc::new(AtomicBool::new(false));
        let marker = Arc::clone(&upstream_failed);
        let previous: StepFuture<I> = Box::pin(async move {
            previous.await.map_err(|error| {
                marker.store(true, Ordering::Release);
                error
            })
        });

        let step = Arc::clone(&self.step);
        let recovery = NextStep::from_fn(
            self.label(),
            move |execution: StepFuture<O>, continuation: &Continuation| {
                let fallback = Arc::clone(&self);
                let upstream_failed = Arc::clone(&upstream_failed);
                let run = continuation.clone();
                let recovered: StepFuture<O> = Box::pin(async move {
                    execution.await.or_else(|error| {
                        if upstream_failed.load(Ordering::Acquire) {
                            Err(error)
                        } else {
                            fallback.recover(error, &run)
                        }
                    })
                });
                continuation.continue_with(recovered, next.clone());
            },
        );

        step.run_async(previous, Some(recovery), continuation);
    }
}
