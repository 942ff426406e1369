//! Code Execution Steps
//!
//! Wraps plain closures as steps.

use crate::coroutine::{short_type_name, Continuation, Step, Value};
use crate::error::{BoxError, CoroutineError, StepResult};

type StepFunction<I, O> = dyn Fn(I, &Continuation, &str) -> StepResult<O> + Send + Sync;

/// A step that executes a closure.
///
/// # Example
///
/// ```rust
/// use corunner::steps::CodeExecution;
///
/// let parse = CodeExecution::try_apply(|text: String| text.trim().parse::<i64>())
///     .labeled("ParseNumber");
/// let greet = CodeExecution::supply(|| "hello".to_string());
/// let log = CodeExecution::consume(|value: i64| println!("{}", value));
/// ```
pub struct CodeExecution<I, O> {
    label: Option<String>,
    function: Box<StepFunction<I, O>>,
}

impl<I: Value, O: Value> CodeExecution<I, O> {
    fn from_fn<F>(function: F) -> Self
    where
        F: Fn(I, &Continuation, &str) -> StepResult<O> + Send + Sync + 'static,
    {
        Self {
            label: None,
            function: Box::new(function),
        }
    }

    /// Executes an infallible function of the input.
    pub fn apply<F>(function: F) -> Self
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        Self::from_fn(move |input, _, _| Ok(function(input)))
    }

    /// Executes a fallible function; its error fails the run as an
    /// execution failure of this step.
    pub fn try_apply<F, E>(function: F) -> Self
    where
        F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::from_fn(move |input, _, label| {
            function(input).map_err(|error| CoroutineError::execution(label, error))
        })
    }

    /// Executes a function with access to the run's continuation.
    pub fn apply_with<F>(function: F) -> Self
    where
        F: Fn(I, &Continuation) -> StepResult<O> + Send + Sync + 'static,
    {
        Self::from_fn(move |input, continuation, _| function(input, continuation))
    }

    /// Sets the label of this step.
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl<O: Value> CodeExecution<(), O> {
    /// Executes a function that ignores the input.
    pub fn supply<F>(function: F) -> Self
    where
        F: Fn() -> O + Send + Sync + 'static,
    {
        Self::apply(move |_| function())
    }
}

impl<I: Value> CodeExecution<I, ()> {
    /// Executes a function that consumes the input without a result.
    pub fn consume<F>(function: F) -> Self
    where
        F: Fn(I) + Send + Sync + 'static,
    {
        Self::apply(function)
    }
}

impl CodeExecution<(), ()> {
    /// Executes a function without input and result.
    pub fn run<F>(function: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::apply(move |_| function())
    }
}

impl<I: Value, O: Value> Step<I, O> for CodeExecution<I, O> {
    fn execute(&self, input: I, continuation: &Continuation) -> StepResult<O> {
        (self.function)(input, continuation, &self.label())
    }

    fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(short_type_name::<Self>)
    }
}
