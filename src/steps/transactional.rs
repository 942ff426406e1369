//! Transactional Steps
//!
//! A [`TransactionalStep`] opens a transactional resource for each
//! execution, commits it when the work succeeds and rolls it back before
//! any failure is propagated into the run.

use log::{debug, warn};

use crate::coroutine::{short_type_name, Continuation, Step, Value};
use crate::error::{BoxError, CoroutineError, StepResult};

/// A resource whose changes are made permanent or reverted as a whole.
pub trait Transactional: Send {
    /// Makes all changes permanent.
    fn commit(&mut self) -> Result<(), BoxError>;

    /// Reverts all changes.
    fn rollback(&mut self) -> Result<(), BoxError>;
}

type Begin<I, T> = dyn Fn(&I) -> Result<T, BoxError> + Send + Sync;
type Work<I, O, T> = dyn Fn(I, &mut T, &Continuation) -> StepResult<O> + Send + Sync;

/// Executes work on a transactional resource opened per execution.
///
/// # Arguments
///
/// * `begin` - Opens the resource for the input
/// * `work` - Performs the step's work with the open resource
pub struct TransactionalStep<I, O, T> {
    label: Option<String>,
    begin: Box<Begin<I, T>>,
    work: Box<Work<I, O, T>>,
}

impl<I: Value, O: Value, T: Transactional + 'static> TransactionalStep<I, O, T> {
    pub fn new<B, W>(begin: B, work: W) -> Self
    where
        B: Fn(&I) -> Result<T, BoxError> + Send + Sync + 'static,
        W: Fn(I, &mut T, &Continuation) -> StepResult<O> + Send + Sync + 'static,
    {
        Self {
            label: None,
            begin: Box::new(begin),
            work: Box::new(work),
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn rollback(&self, resource: &mut T, cause: &CoroutineError) {
        debug!("Rolling back '{}' after: {}", self.label(), cause);
        if let Err(error) = resource.rollback() {
            warn!("Rollback of '{}' failed: {}", self.label(), error);
        }
    }
}

impl<I: Value, O: Value, T: Transactional + 'static> Step<I, O> for TransactionalStep<I, O, T> {
    fn execute(&self, input: I, continuation: &Continuation) -> StepResult<O> {
        let mut resource =
            (self.begin)(&input).map_err(|error| CoroutineError::execution(self.label(), error))?;

        let output = match (self.work)(input, &mut resource, continuation) {
            Ok(output) => output,
            Err(error) => {
                self.rollback(&mut resource, &error);
                return Err(error);
            }
        };

        if let Err(error) = resource.commit() {
            let error = CoroutineError::execution(self.label(), error);
            self.rollback(&mut resource, &error);
            return Err(error);
        }
        Ok(output)
    }

    fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(short_type_name::<Self>)
    }
}
