//! Coroutine Continuation
//!
//! The per-run execution context. A [`Continuation`] is the scheduling
//! point of all asynchronous step executions of one run and the sink of
//! the run's final result or failure.
//!
//! State machine: `Running` -> `Finished(result)` | `Failed(error)`.
//! Both terminal states are final; the first transition wins and every
//! later attempt is rejected.

use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::scope::ScopeInner;
use super::step::{NextStep, StepFuture, Value};
use super::CoroutineScope;
use crate::error::{CoroutineError, StepResult};
use crate::monitoring::{EventType, ExecutionTimeline};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// How the steps of a run are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Steps run synchronously on the starting thread
    Blocking,
    /// Steps run as scheduled continuations on the worker pool
    Async,
}

/// Lifecycle state of a run.
enum RunState {
    Running,
    Finished(Option<Box<dyn Any + Send>>),
    Failed(CoroutineError),
}

impl RunState {
    fn name(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Finished(_) => "finished",
            RunState::Failed(_) => "failed",
        }
    }
}

struct Inner {
    id: u64,
    coroutine: String,
    mode: ExecutionMode,
    handle: Handle,
    scope: Weak<ScopeInner>,
    state: Mutex<RunState>,
    terminated: Condvar,
    timeline: Option<Mutex<ExecutionTimeline>>,
}

/// Execution context of a single coroutine run.
///
/// Cloning yields another handle on the same run.
#[derive(Clone)]
pub struct Continuation {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Continuation {
    /// Creates the context of a new run and registers it with the scope.
    pub(crate) fn new(scope: &CoroutineScope, coroutine: &str, mode: ExecutionMode) -> Self {
        let timeline = scope
            .records_timeline()
            .then(|| Mutex::new(ExecutionTimeline::new()));

        let continuation = Self {
            inner: Arc::new(Inner {
                id: NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed),
                coroutine: coroutine.to_string(),
                mode,
                handle: scope.scheduler().handle().clone(),
                scope: scope.downgrade(),
                state: Mutex::new(RunState::Running),
                terminated: Condvar::new(),
                timeline,
            }),
        };

        scope.register(&continuation);
        continuation
    }

    /// Returns the unique id of this run.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the name of the coroutine this run executes.
    pub fn coroutine(&self) -> &str {
        &self.inner.coroutine
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.mode
    }

    /// Returns the owning scope if it still exists.
    pub fn scope(&self) -> Option<CoroutineScope> {
        CoroutineScope::upgrade(&self.inner.scope)
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.inner.state), RunState::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(*lock(&self.inner.state), RunState::Finished(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*lock(&self.inner.state), RunState::Failed(_))
    }

    /// Returns the failure of the run, if it failed.
    pub fn error(&self) -> Option<CoroutineError> {
        match &*lock(&self.inner.state) {
            RunState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns the result of a finished run.
    ///
    /// `Ok(None)` means the run finished without a result, e.g. after
    /// [`Step::terminate_coroutine`](super::Step::terminate_coroutine).
    pub fn result<T: Clone + 'static>(&self) -> StepResult<Option<T>> {
        match &*lock(&self.inner.state) {
            RunState::Running => Err(CoroutineError::NotFinished),
            RunState::Failed(error) => Err(error.clone()),
            RunState::Finished(None) => Ok(None),
            RunState::Finished(Some(value)) => value
                .downcast_ref::<T>()
                .map(|value| Some(value.clone()))
                .ok_or(CoroutineError::ResultType {
                    run: self.inner.id,
                    expected: type_name::<T>(),
                }),
        }
    }

    /// Blocks until the run has terminated.
    ///
    /// Must not be called from a step or a worker thread of the run's
    /// scheduler.
    pub fn await_termination(&self) {
        let mut state = lock(&self.inner.state);
        while matches!(*state, RunState::Running) {
            state = self
                .inner
                .terminated
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Blocks until the run has terminated or the timeout elapsed.
    ///
    /// Returns true if the run terminated.
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);

        while matches!(*state, RunState::Running) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .inner
                .terminated
                .wait_timeout(state, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        true
    }

    /// Blocks until the run has terminated and returns its result.
    pub fn await_result<T: Clone + 'static>(&self) -> StepResult<Option<T>> {
        self.await_termination();
        self.result()
    }

    /// Marks the run as finished with the given result.
    ///
    /// Fails with [`CoroutineError::AlreadyTerminated`] if the run already
    /// finished or failed.
    pub fn finish<T: Send + 'static>(&self, result: Option<T>) -> StepResult<()> {
        let result = result.map(|value| Box::new(value) as Box<dyn Any + Send>);
        self.transition(RunState::Finished(result))
    }

    /// Marks the run as failed.
    ///
    /// Fails with [`CoroutineError::AlreadyTerminated`] if the run already
    /// finished or failed.
    pub fn fail(&self, error: CoroutineError) -> StepResult<()> {
        self.transition(RunState::Failed(error))
    }

    /// Returns a copy of the run's timeline.
    ///
    /// Empty if timeline recording is disabled for the scope.
    pub fn timeline(&self) -> ExecutionTimeline {
        self.inner
            .timeline
            .as_ref()
            .map(|timeline| lock(timeline).clone())
            .unwrap_or_default()
    }

    /// Schedules a callable for asynchronous execution within this run.
    ///
    /// A failure of the callable fails the run.
    pub fn execute<T, F>(&self, label: impl Into<String>, task: F) -> StepFuture<T>
    where
        T: Value,
        F: FnOnce(&Continuation) -> StepResult<T> + Send + 'static,
    {
        let label = label.into();
        let continuation = self.clone();
        let task_label = label.clone();

        let task = self
            .inner
            .handle
            .spawn(async move {
                continuation.run_step(&task_label, task).map_err(|error| {
                    continuation.propagate_failure(&error);
                    error
                })
            });

        self.join(task, label)
    }

    /// Schedules a step function as continuation of a previous execution.
    ///
    /// The function runs after `previous` produced its value; a failure of
    /// `previous` skips it and is passed on unchanged. Failures are left to
    /// whoever consumes the returned future.
    pub fn then_execute<I, O, F>(
        &self,
        previous: StepFuture<I>,
        label: impl Into<String>,
        step: F,
    ) -> StepFuture<O>
    where
        I: Value,
        O: Value,
        F: FnOnce(I, &Continuation) -> StepResult<O> + Send + 'static,
    {
        let label = label.into();
        let continuation = self.clone();
        let task_label = label.clone();

        let task = self.inner.handle.spawn(async move {
            let input = previous.await?;
            continuation.run_step(&task_label, |continuation| step(input, continuation))
        });

        self.join(task, label)
    }

    /// Runs an action once `previous` produced its value without producing
    /// a value of its own.
    ///
    /// Used by suspending steps: the action hands a suspension to some
    /// collaborator and the chain only continues when it is resumed. A
    /// failure of `previous` or of the action fails the run.
    pub fn when_ready<I, F>(&self, previous: StepFuture<I>, label: impl Into<String>, action: F)
    where
        I: Value,
        F: FnOnce(I, &Continuation) -> StepResult<()> + Send + 'static,
    {
        let label = label.into();
        let continuation = self.clone();
        let task_label = label.clone();

        let task = self.inner.handle.spawn(async move {
            let result = match previous.await {
                Ok(input) => continuation.ensure_running().and_then(|_| {
                    debug!("[run {}] Running '{}'", continuation.id(), task_label);
                    action(input, &continuation)
                }),
                Err(error) => Err(error),
            };
            result.map_err(|error| {
                continuation.propagate_failure(&error);
                error
            })
        });

        let watched = self.join(task, label);
        self.spawn(async move {
            let _ = watched.await;
        });
    }

    /// Continues the chain with `next` or, if there is no next step, makes
    /// the execution's value the final result of the run.
    pub fn continue_with<T: Value>(&self, execution: StepFuture<T>, next: Option<NextStep<T>>) {
        match next {
            Some(next) => next.run_async(execution, self),
            None => self.finish_with(execution),
        }
    }

    /// Finishes the run with the value of the final execution of a chain.
    pub fn finish_with<T: Value>(&self, execution: StepFuture<T>) {
        let continuation = self.clone();

        self.spawn(async move {
            match execution.await {
                Ok(result) => continuation.finish_quietly(Some(result)),
                Err(error) => continuation.propagate_failure(&error),
            }
        });
    }

    /// Schedules a future on the run's worker pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// Executes a single step invocation with instrumentation.
    ///
    /// Short-circuits with [`CoroutineError::Terminated`] if the run already
    /// ended. A failure is recorded and returned; the run fails once the
    /// failure reaches the end of the chain unrecovered.
    pub(crate) fn run_step<O, F>(&self, label: &str, step: F) -> StepResult<O>
    where
        F: FnOnce(&Continuation) -> StepResult<O>,
    {
        self.ensure_running()?;
        self.record(label, EventType::Started);
        debug!("[run {}] Executing step '{}'", self.inner.id, label);

        match step(self) {
            Ok(output) => {
                self.record(label, EventType::Completed);
                Ok(output)
            }
            Err(error) if error.is_termination() => {
                self.record(label, EventType::Completed);
                Err(error)
            }
            Err(error) => {
                self.record(label, EventType::Failed);
                debug!("[run {}] Step '{}' failed: {}", self.inner.id, label, error);
                Err(error)
            }
        }
    }

    /// Returns [`CoroutineError::Terminated`] if the run already ended.
    pub(crate) fn ensure_running(&self) -> StepResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(CoroutineError::Terminated)
        }
    }

    /// Fails the run unless it already ended.
    ///
    /// Used for failures travelling through the chain, which are recorded
    /// by the first party that observes them.
    pub(crate) fn propagate_failure(&self, error: &CoroutineError) {
        if error.is_termination() {
            return;
        }
        if let Err(rejected) = self.fail(error.clone()) {
            debug!("Ignoring failure '{}': {}", error, rejected);
        }
    }

    /// Finishes the run unless it already ended.
    pub(crate) fn finish_quietly<T: Send + 'static>(&self, result: Option<T>) {
        if let Err(rejected) = self.finish(result) {
            debug!("Discarding result of run {}: {}", self.inner.id, rejected);
        }
    }

    pub(crate) fn record(&self, step: &str, event_type: EventType) {
        if let Some(timeline) = &self.inner.timeline {
            lock(timeline).add_event(step, event_type);
        }
    }

    /// Converts a scheduled task into a step future, failing the run if the
    /// task panicked or was aborted.
    fn join<T: Value>(&self, task: JoinHandle<StepResult<T>>, label: String) -> StepFuture<T> {
        let continuation = self.clone();

        Box::pin(async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    let error = CoroutineError::Scheduler {
                        step: label,
                        message: join_error.to_string(),
                    };
                    continuation.propagate_failure(&error);
                    Err(error)
                }
            }
        })
    }

    fn transition(&self, target: RunState) -> StepResult<()> {
        let failure = {
            let mut state = lock(&self.inner.state);

            if !matches!(*state, RunState::Running) {
                return Err(CoroutineError::AlreadyTerminated {
                    coroutine: self.inner.coroutine.clone(),
                    run: self.inner.id,
                    state: state.name(),
                });
            }

            let failure = match &target {
                RunState::Failed(error) => Some(error.clone()),
                _ => None,
            };
            *state = target;
            self.inner.terminated.notify_all();
            failure
        };

        match &failure {
            None => info!(
                "Coroutine '{}' run {} finished",
                self.inner.coroutine, self.inner.id
            ),
            Some(CoroutineError::Cancelled) => warn!(
                "Coroutine '{}' run {} cancelled",
                self.inner.coroutine, self.inner.id
            ),
            Some(error) => warn!(
                "Coroutine '{}' run {} failed: {}",
                self.inner.coroutine, self.inner.id, error
            ),
        }

        if let Some(scope) = self.scope() {
            scope.run_terminated(self.inner.id, failure);
        }
        Ok(())
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("id", &self.inner.id)
            .field("coroutine", &self.inner.coroutine)
            .field("mode", &self.inner.mode)
            .field("state", &lock(&self.inner.state).name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{Scheduler, SchedulerConfig};

    fn test_scope() -> CoroutineScope {
        let scheduler = Scheduler::new(&SchedulerConfig::default().with_worker_threads(2)).unwrap();
        CoroutineScope::with_scheduler("test", scheduler)
    }

    #[test]
    fn test_new_run_is_running() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Async);

        assert!(continuation.is_running());
        assert!(!continuation.is_finished());
        assert!(!continuation.is_failed());
        assert_eq!(continuation.coroutine(), "Sample");
        assert_eq!(continuation.mode(), ExecutionMode::Async);
        assert!(matches!(
            continuation.result::<i32>(),
            Err(CoroutineError::NotFinished)
        ));
    }

    #[test]
    fn test_run_ids_are_unique() {
        let scope = test_scope();
        let first = Continuation::new(&scope, "A", ExecutionMode::Async);
        let second = Continuation::new(&scope, "A", ExecutionMode::Async);

        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_finish_once() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Blocking);

        continuation.finish(Some(42)).unwrap();
        assert!(continuation.is_finished());
        assert_eq!(continuation.result::<i32>().unwrap(), Some(42));

        let second = continuation.finish(Some(7));
        assert!(matches!(
            second,
            Err(CoroutineError::AlreadyTerminated { state: "finished", .. })
        ));
        assert!(continuation.fail(CoroutineError::Cancelled).is_err());
        assert_eq!(continuation.result::<i32>().unwrap(), Some(42));
    }

    #[test]
    fn test_fail_once() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Blocking);

        continuation
            .fail(CoroutineError::execution("Parse", "bad"))
            .unwrap();
        assert!(continuation.is_failed());

        assert!(matches!(
            continuation.finish(Some(1)),
            Err(CoroutineError::AlreadyTerminated { state: "failed", .. })
        ));
        assert!(matches!(
            continuation.error(),
            Some(CoroutineError::Execution { ref step, .. }) if step == "Parse"
        ));
        assert!(continuation.result::<i32>().is_err());
    }

    #[test]
    fn test_concurrent_terminations_single_winner() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Racing", ExecutionMode::Async);

        let racers: Vec<_> = (0..8)
            .map(|i| {
                let continuation = continuation.clone();
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        continuation.finish(Some(i)).is_ok()
                    } else {
                        continuation
                            .fail(CoroutineError::execution("Race", format!("racer {}", i)))
                            .is_ok()
                    }
                })
            })
            .collect();
        let winners = racers
            .into_iter()
            .map(|racer| racer.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(!continuation.is_running());
        assert_ne!(continuation.is_finished(), continuation.is_failed());
        assert_eq!(scope.running_count(), 0);
        match continuation.result::<i32>() {
            Ok(Some(value)) => assert_eq!(value % 2, 0),
            Err(CoroutineError::Execution { step, .. }) => assert_eq!(step, "Race"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_chained_failure_fails_run() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Async);

        let first = continuation.execute("First", |_| Ok(1));
        let failing = continuation.then_execute(first, "Fail", |_: i32, _| {
            Err::<i32, _>(CoroutineError::execution("Fail", "boom"))
        });
        let last = continuation.then_execute(failing, "Never", |value: i32, _| Ok(value));
        continuation.finish_with(last);

        continuation.await_termination();
        assert!(matches!(
            continuation.error(),
            Some(CoroutineError::Execution { ref step, .. }) if step == "Fail"
        ));
        assert_eq!(continuation.timeline().executed_steps(), vec!["First", "Fail"]);
    }

    #[test]
    fn test_result_type_mismatch() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Blocking);
        continuation.finish(Some("text".to_string())).unwrap();

        assert!(matches!(
            continuation.result::<i32>(),
            Err(CoroutineError::ResultType { .. })
        ));
        assert_eq!(
            continuation.result::<String>().unwrap().as_deref(),
            Some("text")
        );
    }

    #[test]
    fn test_finish_without_result() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Blocking);
        continuation.finish::<()>(None).unwrap();

        assert_eq!(continuation.result::<i32>().unwrap(), None);
    }

    #[test]
    fn test_execute_schedules_callable() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Async);

        let execution = continuation.execute("Answer", |_| Ok(42));
        continuation.finish_with(execution);

        assert_eq!(continuation.await_result::<i32>().unwrap(), Some(42));
        assert_eq!(continuation.timeline().executed_steps(), vec!["Answer"]);
    }

    #[test]
    fn test_then_execute_skips_after_failure() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Async);

        let failing: StepFuture<i32> =
            continuation.execute("Fail", |_| Err(CoroutineError::execution("Fail", "boom")));
        let next = continuation.then_execute(failing, "Never", |value: i32, _| Ok(value + 1));
        continuation.finish_with(next);

        continuation.await_termination();
        assert!(continuation.is_failed());
        assert_eq!(continuation.timeline().executed_steps(), vec!["Fail"]);
    }

    #[test]
    fn test_panicking_task_fails_run() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Async);

        let execution: StepFuture<i32> = continuation.execute("Panic", |_| panic!("step panicked"));
        continuation.finish_with(execution);

        continuation.await_termination();
        assert!(matches!(
            continuation.error(),
            Some(CoroutineError::Scheduler { ref step, .. }) if step == "Panic"
        ));
    }

    #[test]
    fn test_await_timeout_on_running() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Async);

        assert!(!continuation.await_timeout(Duration::from_millis(20)));
        continuation.finish::<()>(None).unwrap();
        assert!(continuation.await_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_scope_back_reference() {
        let scope = test_scope();
        let continuation = Continuation::new(&scope, "Sample", ExecutionMode::Async);

        assert_eq!(continuation.scope().unwrap().name(), "test");
        drop(scope);
        assert!(continuation.scope().is_none());
    }
}
