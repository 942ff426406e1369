//! Coroutine Definitions
//!
//! A [`Coroutine`] is an immutable, named step chain that can be started any
//! number of times. Every start creates a fresh [`Continuation`], so
//! concurrent runs of one definition never share mutable state.

use std::sync::Arc;

use log::debug;

use super::chain::StepChain;
use super::step::{ready, Step, Value};
use super::{Continuation, CoroutineScope, ExecutionMode};
use crate::error::StepResult;

/// Named definition of a coroutine from input `I` to result `O`.
///
/// # Example
///
/// ```rust
/// use corunner::coroutine::{Coroutine, CoroutineScope};
/// use corunner::steps::CodeExecution;
///
/// let coroutine = Coroutine::first("Arithmetic", CodeExecution::apply(|x: i32| x * 2))
///     .then(CodeExecution::apply(|x: i32| x + 1));
///
/// let scope = CoroutineScope::new("example").unwrap();
/// let run = coroutine.start(3, &scope);
///
/// scope.await_all().unwrap();
/// assert_eq!(run.result::<i32>().unwrap(), Some(7));
/// ```
pub struct Coroutine<I: Value, O: Value> {
    name: String,
    entry: Arc<dyn Step<I, O>>,
}

impl<I: Value, O: Value> Coroutine<I, O> {
    /// Creates a coroutine that starts with the given step.
    pub fn first(name: impl Into<String>, step: impl Step<I, O>) -> Self {
        Self::with_entry(name, Arc::new(step))
    }

    /// Creates a coroutine from an already shared entry step.
    pub fn with_entry(name: impl Into<String>, entry: Arc<dyn Step<I, O>>) -> Self {
        Self {
            name: name.into(),
            entry,
        }
    }

    /// Returns a new coroutine that continues this one with `step`.
    pub fn then<T: Value>(self, step: impl Step<O, T>) -> Coroutine<I, T> {
        self.then_shared(Arc::new(step))
    }

    /// Like [`then`](Self::then) for a step that is shared with others.
    pub fn then_shared<T: Value>(self, step: Arc<dyn Step<O, T>>) -> Coroutine<I, T> {
        Coroutine {
            name: self.name,
            entry: Arc::new(StepChain::new(self.entry, step)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entry step, typically a [`StepChain`].
    pub fn entry(&self) -> &Arc<dyn Step<I, O>> {
        &self.entry
    }

    /// Starts a run whose steps execute asynchronously on the scope's
    /// scheduler.
    ///
    /// Returns immediately; the continuation reports the outcome.
    pub fn start(&self, input: I, scope: &CoroutineScope) -> Continuation {
        let continuation = Continuation::new(scope, &self.name, ExecutionMode::Async);
        debug!(
            "Starting coroutine '{}' run {} ({})",
            self.name,
            continuation.id(),
            self.entry.label()
        );

        Arc::clone(&self.entry).run_async(ready(input), None, &continuation);
        continuation
    }

    /// Runs all steps on the calling thread and returns the terminated
    /// continuation.
    ///
    /// Steps that suspend fail the run in this mode.
    pub fn start_blocking(&self, input: I, scope: &CoroutineScope) -> Continuation {
        let continuation = Continuation::new(scope, &self.name, ExecutionMode::Blocking);
        debug!(
            "Running coroutine '{}' run {} blocking",
            self.name,
            continuation.id()
        );

        match self.entry.run_blocking(input, &continuation) {
            Ok(result) => continuation.finish_quietly(Some(result)),
            Err(error) => continuation.propagate_failure(&error),
        }
        continuation
    }
}

impl<I: Value, O: Value + Clone> Coroutine<I, O> {
    /// Runs the coroutine in blocking mode and returns its result.
    pub fn run_blocking(&self, input: I, scope: &CoroutineScope) -> StepResult<Option<O>> {
        self.start_blocking(input, scope).result()
    }
}

impl<I: Value, O: Value> Clone for Coroutine<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            entry: Arc::clone(&self.entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoroutineError;
    use crate::execution::{Scheduler, SchedulerConfig};
    use crate::steps::CodeExecution;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_scope() -> CoroutineScope {
        let scheduler = Scheduler::new(&SchedulerConfig::default().with_worker_threads(2)).unwrap();
        CoroutineScope::with_scheduler("definitions", scheduler)
    }

    fn double_then_add_one() -> Coroutine<i32, i32> {
        Coroutine::first("DoubleAddOne", CodeExecution::apply(|x: i32| x * 2).labeled("Double"))
            .then(CodeExecution::apply(|x: i32| x + 1).labeled("AddOne"))
    }

    #[test]
    fn test_blocking_double_add_one() {
        let scope = test_scope();
        assert_eq!(double_then_add_one().run_blocking(3, &scope).unwrap(), Some(7));
    }

    #[test]
    fn test_async_double_add_one() {
        let scope = test_scope();
        let continuation = double_then_add_one().start(3, &scope);

        assert_eq!(continuation.await_result::<i32>().unwrap(), Some(7));
        assert_eq!(continuation.mode(), ExecutionMode::Async);
        assert_eq!(continuation.coroutine(), "DoubleAddOne");
    }

    #[test]
    fn test_then_changes_result_type() {
        let scope = test_scope();
        let coroutine = double_then_add_one().then(CodeExecution::apply(|x: i32| format!("<{}>", x)));

        assert_eq!(
            coroutine.run_blocking(4, &scope).unwrap().as_deref(),
            Some("<9>")
        );
    }

    #[test]
    fn test_entry_label_describes_chain() {
        assert_eq!(double_then_add_one().entry().label(), "Double -> AddOne");
    }

    #[test]
    fn test_concurrent_runs_do_not_share_state() {
        let scope = test_scope();
        let coroutine = double_then_add_one();

        let runs: Vec<_> = (0..50).map(|i| (i, coroutine.start(i, &scope))).collect();
        scope.await_all().unwrap();

        for (input, run) in runs {
            assert_eq!(run.result::<i32>().unwrap(), Some(input * 2 + 1));
        }
    }

    #[test]
    fn test_failing_step_stops_run() {
        let scope = test_scope();
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executed);

        let coroutine = Coroutine::first(
            "Failing",
            CodeExecution::try_apply(|_: i32| Err::<i32, _>("no such record")).labeled("Lookup"),
        )
        .then(CodeExecution::apply(move |x: i32| {
            counter.fetch_add(1, Ordering::SeqCst);
            x
        }));

        let run = coroutine.start(1, &scope);
        run.await_termination();

        let error = run.error().unwrap();
        assert!(matches!(error, CoroutineError::Execution { ref step, .. } if step == "Lookup"));
        assert_eq!(error.to_string(), "step 'Lookup' failed: no such record");
        assert_eq!(executed.load(Ordering::SeqCst), 0);

        let blocking = coroutine.start_blocking(1, &scope);
        assert!(blocking.is_failed());
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clone_shares_definition() {
        let scope = test_scope();
        let original = double_then_add_one();
        let copy = original.clone();

        assert_eq!(copy.name(), original.name());
        assert_eq!(copy.run_blocking(10, &scope).unwrap(), Some(21));
    }
}
