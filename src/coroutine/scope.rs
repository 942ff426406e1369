//! Coroutine Scopes
//!
//! A [`CoroutineScope`] tracks every run started within it until the run
//! terminates. It is the
//! boundary used to wait for a group of concurrent runs, to cancel them
//! together and to aggregate their failures. Runs never fail each other;
//! only the outcome of the scope as a whole reflects a failed run.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::Continuation;
use crate::config::EngineConfig;
use crate::error::{CoroutineError, ScopeFailure, StepResult};
use crate::execution::Scheduler;

#[derive(Default)]
struct ScopeState {
    runs: HashMap<u64, Continuation>,
    started: usize,
    failures: Vec<CoroutineError>,
    cancelled: bool,
}

pub(crate) struct ScopeInner {
    name: String,
    scheduler: Scheduler,
    record_timeline: AtomicBool,
    state: Mutex<ScopeState>,
    changed: Condvar,
}

/// Execution boundary of a group of coroutine runs.
///
/// Cloning yields another handle on the same scope.
///
/// # Example
///
/// ```rust
/// use corunner::coroutine::{Coroutine, CoroutineScope};
/// use corunner::steps::CodeExecution;
///
/// let scope = CoroutineScope::new("batch").unwrap();
/// let square = Coroutine::first("Square", CodeExecution::apply(|x: u64| x * x));
///
/// let runs: Vec<_> = (1..=3).map(|i| square.start(i, &scope)).collect();
/// scope.await_all().unwrap();
///
/// let results: Vec<_> = runs.iter().map(|run| run.result::<u64>().unwrap()).collect();
/// assert_eq!(results, vec![Some(1), Some(4), Some(9)]);
/// ```
#[derive(Clone)]
pub struct CoroutineScope {
    inner: Arc<ScopeInner>,
}

fn lock(state: &Mutex<ScopeState>) -> MutexGuard<'_, ScopeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CoroutineScope {
    /// Creates a scope that runs its coroutines on the global scheduler.
    pub fn new(name: impl Into<String>) -> StepResult<Self> {
        let scheduler = Scheduler::global()?.clone();
        Ok(Self::with_scheduler(name, scheduler))
    }

    /// Creates a scope on the given scheduler.
    pub fn with_scheduler(name: impl Into<String>, scheduler: Scheduler) -> Self {
        let name = name.into();
        debug!("Opened coroutine scope '{}'", name);

        Self {
            inner: Arc::new(ScopeInner {
                name,
                scheduler,
                record_timeline: AtomicBool::new(true),
                state: Mutex::new(ScopeState::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Creates a scope with its own scheduler built from `config`.
    pub fn with_config(name: impl Into<String>, config: &EngineConfig) -> StepResult<Self> {
        let scope = Self::with_scheduler(name, Scheduler::new(&config.scheduler)?);
        scope.set_record_timeline(config.record_timeline);
        Ok(scope)
    }

    /// Runs `block` in a child scope on the same scheduler and waits for all
    /// runs it started.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the child scope, appended to this scope's name
    /// * `block` - Starts the coroutines of the child scope
    ///
    /// # Returns
    ///
    /// The value of `block`, or the failure of the child scope
    pub fn launch<R, F>(&self, name: &str, block: F) -> Result<R, ScopeFailure>
    where
        F: FnOnce(&CoroutineScope) -> R,
    {
        let child = Self::with_scheduler(
            format!("{}/{}", self.inner.name, name),
            self.inner.scheduler.clone(),
        );
        child.set_record_timeline(self.records_timeline());

        let value = block(&child);
        child.await_all()?;
        Ok(value)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Enables or disables timeline recording for runs started afterwards.
    pub fn set_record_timeline(&self, enabled: bool) {
        self.inner.record_timeline.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn records_timeline(&self) -> bool {
        self.inner.record_timeline.load(Ordering::Relaxed)
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<ScopeInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Starts tracking a new run.
    ///
    /// A run registered with a cancelled scope fails immediately.
    pub(crate) fn register(&self, continuation: &Continuation) {
        let cancelled = {
            let mut state = lock(&self.inner.state);
            state.runs.insert(continuation.id(), continuation.clone());
            state.started += 1;
            state.cancelled
        };

        debug!(
            "Scope '{}' tracks run {} of '{}'",
            self.inner.name,
            continuation.id(),
            continuation.coroutine()
        );

        if cancelled {
            let _ = continuation.fail(CoroutineError::Cancelled);
        }
    }

    /// Called exactly once per tracked run when it reaches a terminal state.
    ///
    /// Stops tracking the run; only its failure, if any, is kept.
    pub(crate) fn run_terminated(&self, run: u64, failure: Option<CoroutineError>) {
        let mut state = lock(&self.inner.state);
        if state.runs.remove(&run).is_none() {
            debug!("Scope '{}' does not track run {}", self.inner.name, run);
        }
        if let Some(error) = failure {
            state.failures.push(error);
        }
        self.inner.changed.notify_all();
    }

    /// Blocks until every tracked run has terminated.
    ///
    /// Returns the first captured failure with all later ones suppressed.
    /// Must not be called from a step or a worker thread of the scheduler.
    pub fn await_all(&self) -> Result<(), ScopeFailure> {
        let mut state = lock(&self.inner.state);
        while !state.runs.is_empty() {
            state = self
                .inner
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        self.outcome(&state)
    }

    /// Like [`await_all`](Self::await_all), but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` if runs are still in progress.
    pub fn await_all_timeout(&self, timeout: Duration) -> Result<bool, ScopeFailure> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);

        while !state.runs.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            state = self
                .inner
                .changed
                .wait_timeout(state, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }

        self.outcome(&state).map(|_| true)
    }

    /// Fails every tracked run that is still running with
    /// [`CoroutineError::Cancelled`].
    ///
    /// Runs observe the cancellation at their next scheduling point; runs
    /// started after this call fail right away.
    pub fn cancel(&self) {
        let runs = {
            let mut state = lock(&self.inner.state);
            state.cancelled = true;
            state.runs.values().cloned().collect::<Vec<_>>()
        };

        let mut cancelled = 0;
        for run in &runs {
            if run.fail(CoroutineError::Cancelled).is_ok() {
                cancelled += 1;
            }
        }

        info!(
            "Cancelled scope '{}' ({} running run(s) cancelled)",
            self.inner.name, cancelled
        );
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.inner.state).cancelled
    }

    /// Returns the number of tracked runs, i.e. runs that have not
    /// terminated yet.
    pub fn running_count(&self) -> usize {
        lock(&self.inner.state).runs.len()
    }

    /// Returns the number of runs ever started within this scope.
    pub fn run_count(&self) -> usize {
        lock(&self.inner.state).started
    }

    /// Returns handles on all tracked runs in start order.
    pub fn continuations(&self) -> Vec<Continuation> {
        let mut runs: Vec<_> = lock(&self.inner.state).runs.values().cloned().collect();
        runs.sort_by_key(Continuation::id);
        runs
    }

    fn outcome(&self, state: &ScopeState) -> Result<(), ScopeFailure> {
        match ScopeFailure::from_errors(state.failures.clone()) {
            Some(failure) => {
                warn!("Scope '{}': {}", self.inner.name, failure);
                Err(failure)
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CoroutineScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("CoroutineScope")
            .field("name", &self.inner.name)
            .field("started", &state.started)
            .field("running", &state.runs.len())
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::Coroutine;
    use crate::execution::SchedulerConfig;
    use crate::steps::{CodeExecution, Delay};

    fn test_scope() -> CoroutineScope {
        let scheduler = Scheduler::new(&SchedulerConfig::default().with_worker_threads(2)).unwrap();
        CoroutineScope::with_scheduler("scopes", scheduler)
    }

    fn succeeding() -> Coroutine<i32, i32> {
        Coroutine::first("Succeeding", CodeExecution::apply(|x: i32| x + 1))
    }

    fn failing() -> Coroutine<i32, i32> {
        Coroutine::first(
            "Failing",
            CodeExecution::try_apply(|x: i32| Err::<i32, _>(format!("rejected {}", x)))
                .labeled("Reject"),
        )
    }

    fn sleeping() -> Coroutine<i32, i32> {
        Coroutine::first("Sleeping", Delay::new(Duration::from_secs(30)))
    }

    #[test]
    fn test_empty_scope_completes() {
        let scope = test_scope();
        assert!(scope.await_all().is_ok());
        assert_eq!(scope.run_count(), 0);
    }

    #[test]
    fn test_failure_does_not_affect_sibling() {
        let scope = test_scope();

        let ok = succeeding().start(1, &scope);
        let failed = failing().start(2, &scope);
        let result = scope.await_all();

        let failure = result.unwrap_err();
        assert!(matches!(
            failure.error,
            CoroutineError::Execution { ref step, .. } if step == "Reject"
        ));
        assert!(failure.suppressed.is_empty());
        assert!(failed.is_failed());
        assert_eq!(ok.result::<i32>().unwrap(), Some(2));
    }

    #[test]
    fn test_failures_are_aggregated() {
        let scope = test_scope();
        for i in 0..3 {
            failing().start(i, &scope);
        }
        succeeding().start(0, &scope);

        let failure = scope.await_all().unwrap_err();
        assert_eq!(failure.suppressed.len(), 2);
        assert!(failure.to_string().starts_with("3 coroutine run(s) failed"));
    }

    #[test]
    fn test_blocking_runs_are_tracked() {
        let scope = test_scope();
        succeeding().start_blocking(1, &scope);
        failing().start_blocking(1, &scope);

        assert_eq!(scope.run_count(), 2);
        assert_eq!(scope.running_count(), 0);
        assert!(scope.await_all().is_err());
    }

    #[test]
    fn test_cancel_fails_running_runs() {
        let scope = test_scope();
        let finished = succeeding().start(1, &scope);
        finished.await_termination();

        let suspended = sleeping().start(1, &scope);
        assert!(!scope.await_all_timeout(Duration::from_millis(50)).unwrap());
        assert_eq!(scope.running_count(), 1);

        scope.cancel();

        let failure = scope.await_all().unwrap_err();
        assert!(matches!(failure.error, CoroutineError::Cancelled));
        assert!(matches!(suspended.error(), Some(CoroutineError::Cancelled)));
        assert_eq!(finished.result::<i32>().unwrap(), Some(2));
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_runs_started_after_cancel_fail() {
        let scope = test_scope();
        scope.cancel();

        let run = succeeding().start(1, &scope);
        run.await_termination();

        assert!(matches!(run.error(), Some(CoroutineError::Cancelled)));
        assert!(run.timeline().is_empty());
    }

    #[test]
    fn test_await_all_timeout_completes() {
        let scope = test_scope();
        succeeding().start(1, &scope);

        assert!(scope.await_all_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_launch_waits_for_child_runs() {
        let scope = test_scope();

        let runs = scope
            .launch("batch", |child| {
                assert_eq!(child.name(), "scopes/batch");
                (0..10).map(|i| succeeding().start(i, child)).collect::<Vec<_>>()
            })
            .unwrap();

        assert!(runs.iter().all(Continuation::is_finished));
        assert_eq!(scope.run_count(), 0);
    }

    #[test]
    fn test_launch_reports_child_failure() {
        let scope = test_scope();
        let result = scope.launch("batch", |child| {
            failing().start(1, child);
        });

        assert!(result.is_err());
    }

    #[test]
    fn test_timeline_recording_can_be_disabled() {
        let scope = test_scope();
        scope.set_record_timeline(false);

        let run = succeeding().start(1, &scope);
        assert_eq!(run.await_result::<i32>().unwrap(), Some(2));
        assert!(run.timeline().is_empty());
    }

    #[test]
    fn test_with_config() {
        let mut config = EngineConfig::default();
        config.scheduler.worker_threads = 1;
        config.record_timeline = false;

        let scope = CoroutineScope::with_config("configured", &config).unwrap();
        assert!(scope.scheduler().owns_runtime());
        assert!(!scope.records_timeline());
        assert_eq!(succeeding().run_blocking(1, &scope).unwrap(), Some(2));
    }

    #[test]
    fn test_continuations_in_start_order() {
        let scope = test_scope();
        let first = sleeping().start(1, &scope);
        let done = succeeding().start_blocking(1, &scope);
        let second = sleeping().start(2, &scope);

        let ids: Vec<_> = scope.continuations().iter().map(Continuation::id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
        assert!(done.is_finished());

        scope.cancel();
        assert!(scope.await_all().is_err());
    }

    #[test]
    fn test_terminated_runs_are_released() {
        let scope = test_scope();
        let runs: Vec<_> = (0..1000).map(|i| succeeding().start(i, &scope)).collect();

        scope.await_all().unwrap();

        assert_eq!(scope.running_count(), 0);
        assert!(scope.continuations().is_empty());
        assert_eq!(scope.run_count(), 1000);
        assert_eq!(runs[999].result::<i32>().unwrap(), Some(1000));
    }
}
