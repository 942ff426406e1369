//! Delay Steps

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::coroutine::{Continuation, NextStep, Step, StepFuture, Value};
use crate::error::StepResult;
use crate::monitoring::EventType;

/// Passes its input on after a delay.
///
/// In asynchronous mode the step suspends and a timer of the scheduler
/// resumes it, so no worker thread is occupied while waiting. In blocking
/// mode the calling thread sleeps.
pub struct Delay<T> {
    duration: Duration,
    _value: PhantomData<fn(T) -> T>,
}

impl<T: Value> Delay<T> {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            _value: PhantomData,
        }
    }

    pub fn millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl<T: Value> Step<T, T> for Delay<T> {
    fn execute(&self, input: T, _: &Continuation) -> StepResult<T> {
        thread::sleep(self.duration);
        Ok(input)
    }

    fn label(&self) -> String {
        format!("Delay({}ms)", self.duration.as_millis())
    }

    fn run_async(
        self: Arc<Self>,
        previous: StepFuture<T>,
        next: Option<NextStep<T>>,
        continuation: &Continuation,
    ) {
        let label = self.label();

        continuation.when_ready(previous, label.clone(), move |input, continuation| {
            continuation.record(&label, EventType::Started);
            let suspension = self.suspend_with(input, next, continuation)?;
            let duration = self.duration;

            continuation.spawn(async move {
                tokio::time::sleep(duration).await;
                if let Err(error) = suspension.resume() {
                    debug!("Delay of '{}' expired without effect: {}", label, error);
                }
            });
            Ok(())
        });
    }
}
