//! Coroutine Suspensions
//!
//! A [`Suspension`] is the single-use token of a paused step. The party that
//! observes the awaited event resumes it exactly once; the first claim on the
//! token wins atomically and every later attempt fails with a protocol
//! violation reported to the caller.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use super::step::{failed, ready, NextStep, StepFuture, Value};
use super::{Continuation, ExecutionMode};
use crate::error::{CoroutineError, StepResult};
use crate::monitoring::EventType;

const PENDING: u8 = 0;
const RESUMED: u8 = 1;
const CANCELLED: u8 = 2;

/// State of a suspension token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionState {
    Pending,
    Resumed,
    Cancelled,
}

struct Inner<V> {
    step: String,
    state: AtomicU8,
    value: Mutex<Option<V>>,
    next: Option<NextStep<V>>,
    continuation: Continuation,
}

/// Pause point of a step, resumed at most once by external code.
///
/// Resuming with a value continues the chain exactly as if the suspended
/// step had returned that value. A suspension without a next step belongs
/// to the final step of the chain and finishes the run with the value.
///
/// Clones share the same token.
pub struct Suspension<V> {
    inner: Arc<Inner<V>>,
}

impl<V: Value> Suspension<V> {
    /// Creates a pending suspension of the run of `continuation`.
    ///
    /// A run in blocking mode has no scheduler to resume it, so suspending
    /// it fails the run with [`CoroutineError::BlockingSuspension`].
    pub(crate) fn new(
        step: String,
        value: Option<V>,
        next: Option<NextStep<V>>,
        continuation: &Continuation,
    ) -> StepResult<Self> {
        if continuation.mode() == ExecutionMode::Blocking {
            let error = CoroutineError::BlockingSuspension { step };
            continuation.propagate_failure(&error);
            return Err(error);
        }
        continuation.ensure_running()?;

        continuation.record(&step, EventType::Suspended);
        debug!("[run {}] Step '{}' suspended", continuation.id(), step);

        Ok(Self {
            inner: Arc::new(Inner {
                step,
                state: AtomicU8::new(PENDING),
                value: Mutex::new(value),
                next,
                continuation: continuation.clone(),
            }),
        })
    }

    /// Returns the label of the suspended step.
    pub fn step(&self) -> &str {
        &self.inner.step
    }

    pub fn continuation(&self) -> &Continuation {
        &self.inner.continuation
    }

    pub fn state(&self) -> SuspensionState {
        decode_state(self.inner.state.load(Ordering::Acquire))
    }

    /// Resumes with the value captured when the step suspended.
    ///
    /// Fails with [`CoroutineError::MissingInput`] if no value was captured
    /// and with [`CoroutineError::SuspensionCancelled`] if the run already
    /// ended.
    pub fn resume(&self) -> StepResult<()> {
        if !self.inner.continuation.is_running() {
            self.claim()?;
        }

        let mut slot = self
            .inner
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if slot.is_none() && self.state() == SuspensionState::Pending {
            return Err(CoroutineError::MissingInput {
                step: self.inner.step.clone(),
            });
        }
        self.claim()?;
        let value = slot.take();
        drop(slot);

        match value {
            Some(value) => {
                self.continue_run(ready(value));
                Ok(())
            }
            None => Err(CoroutineError::MissingInput {
                step: self.inner.step.clone(),
            }),
        }
    }

    /// Resumes with the value the suspended step was waiting for.
    pub fn resume_with(&self, value: V) -> StepResult<()> {
        self.claim()?;
        self.continue_run(ready(value));
        Ok(())
    }

    /// Resumes with a failure.
    ///
    /// The failure continues the chain exactly as if the suspended step had
    /// returned it, so it fails the run unless a later step recovers it.
    pub fn fail(&self, error: CoroutineError) -> StepResult<()> {
        self.claim()?;
        let continuation = &self.inner.continuation;

        continuation.record(&self.inner.step, EventType::Failed);
        debug!(
            "[run {}] Step '{}' failed while suspended: {}",
            continuation.id(),
            self.inner.step,
            error
        );
        continuation.continue_with(failed(error), self.inner.next.clone());
        Ok(())
    }

    /// Cancels the suspension and with it the suspended run.
    pub fn cancel(&self) -> StepResult<()> {
        self.transition(CANCELLED)?;
        debug!(
            "[run {}] Suspension of step '{}' cancelled",
            self.inner.continuation.id(),
            self.inner.step
        );
        self.inner
            .continuation
            .propagate_failure(&CoroutineError::Cancelled);
        Ok(())
    }

    /// Atomically claims the token for resumption.
    ///
    /// A run that ended in the meantime (e.g. cancelled by its scope)
    /// leaves the token cancelled.
    fn claim(&self) -> StepResult<()> {
        self.transition(RESUMED)?;

        if !self.inner.continuation.is_running() {
            self.inner.state.store(CANCELLED, Ordering::Release);
            return Err(CoroutineError::SuspensionCancelled {
                step: self.inner.step.clone(),
            });
        }
        Ok(())
    }

    fn transition(&self, target: u8) -> StepResult<()> {
        match self
            .inner
            .state
            .compare_exchange(PENDING, target, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(RESUMED) => Err(CoroutineError::AlreadyResumed {
                step: self.inner.step.clone(),
            }),
            Err(_) => Err(CoroutineError::SuspensionCancelled {
                step: self.inner.step.clone(),
            }),
        }
    }

    fn continue_run(&self, execution: StepFuture<V>) {
        let continuation = &self.inner.continuation;

        continuation.record(&self.inner.step, EventType::Resumed);
        debug!(
            "[run {}] Step '{}' resumed",
            continuation.id(),
            self.inner.step
        );
        continuation.continue_with(execution, self.inner.next.clone());
    }
}

fn decode_state(state: u8) -> SuspensionState {
    match state {
        PENDING => SuspensionState::Pending,
        RESUMED => SuspensionState::Resumed,
        _ => SuspensionState::Cancelled,
    }
}

impl<V> Clone for Suspension<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Suspension<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("step", &self.inner.step)
            .field("state", &decode_state(self.inner.state.load(Ordering::Acquire)))
            .field("continuation", &self.inner.continuation)
            .finish()
    }
}
