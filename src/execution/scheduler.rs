//! Task Scheduler
//!
//! The shared worker pool that executes asynchronous step continuations.
//! A [`Scheduler`] owns a multi-threaded tokio runtime (or borrows the
//! handle of an existing one); continuations only keep the runtime handle
//! as their scheduling point.

use std::future::Future;
use std::sync::Arc;

use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::{CoroutineError, StepResult};

/// Default name prefix of worker threads.
pub const DEFAULT_THREAD_NAME: &str = "corunner-worker";

/// Default limit of the runtime's blocking thread pool.
const DEFAULT_MAX_BLOCKING_THREADS: usize = 64;

static GLOBAL_SCHEDULER: OnceCell<Scheduler> = OnceCell::new();

/// Worker pool configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads executing step continuations
    pub worker_threads: usize,

    /// Name prefix of the worker threads
    pub thread_name: String,

    /// Upper bound of threads for blocking operations
    pub max_blocking_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
        }
    }
}

impl SchedulerConfig {
    /// Sets the number of worker threads.
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Sets the worker thread name prefix.
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

/// Shuts the runtime down without blocking when the last owner is dropped,
/// which keeps the drop legal inside asynchronous contexts.
struct RuntimeOwner(Option<Runtime>);

impl Drop for RuntimeOwner {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            debug!("Shutting down scheduler runtime");
            runtime.shutdown_background();
        }
    }
}

/// Shared asynchronous task-scheduling facility.
///
/// # Example
///
/// ```rust
/// use corunner::execution::{Scheduler, SchedulerConfig};
///
/// let scheduler = Scheduler::new(&SchedulerConfig::default().with_worker_threads(2)).unwrap();
/// let task = scheduler.spawn(async { 21 * 2 });
/// assert_eq!(scheduler.block_on(task).unwrap(), 42);
/// ```
#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
    runtime: Option<Arc<RuntimeOwner>>,
}

impl Scheduler {
    /// Creates a scheduler with its own worker pool.
    pub fn new(config: &SchedulerConfig) -> StepResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .max_blocking_threads(config.max_blocking_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| CoroutineError::SchedulerStart(Arc::new(e)))?;

        info!(
            "Started scheduler with {} worker threads",
            config.worker_threads.max(1)
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(Arc::new(RuntimeOwner(Some(runtime)))),
        })
    }

    /// Creates a scheduler on top of an existing tokio runtime.
    ///
    /// The runtime must have its time driver enabled for delay steps.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
        }
    }

    /// Returns the process-wide default scheduler, creating it on first use.
    pub fn global() -> StepResult<&'static Scheduler> {
        GLOBAL_SCHEDULER.get_or_try_init(|| Scheduler::new(&SchedulerConfig::default()))
    }

    /// Returns the runtime handle used as scheduling point.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Returns true if this scheduler owns its worker pool.
    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// Schedules a future for execution on the worker pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Blocks the calling thread until the future completes.
    ///
    /// Must not be called from a worker thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("owns_runtime", &self.owns_runtime())
            .finish()
    }
}
