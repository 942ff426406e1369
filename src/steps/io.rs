//! I/O Steps
//!
//! An [`IoStep`] sends its input as request over a connection obtained
//! from an [`Endpoint`]. In blocking mode the response is awaited on the
//! calling thread; in asynchronous mode the step suspends and the
//! connection's [`ResponseCallback`] resumes the run with the response.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::coroutine::{Continuation, NextStep, Step, StepFuture, Suspension, Value};
use crate::error::{BoxError, CoroutineError, StepResult};
use crate::monitoring::EventType;

/// Source of connections to an external communication partner.
pub trait Endpoint<Q, R: Value>: Send + Sync + 'static {
    /// Opens a new connection.
    fn connect(&self) -> Result<Box<dyn Connection<Q, R>>, BoxError>;

    /// Describes the endpoint in labels and log output.
    fn name(&self) -> String;
}

/// An open connection that answers requests.
pub trait Connection<Q, R: Value>: Send {
    /// Sends a request and blocks until the response arrives.
    fn send(&mut self, request: Q) -> Result<R, BoxError>;

    /// Sends a request and returns immediately; the connection must
    /// eventually complete `callback`, possibly on another thread.
    fn send_async(&mut self, request: Q, callback: ResponseCallback<R>) -> Result<(), BoxError>;
}

/// Completion handle of an asynchronous request.
///
/// Resumes the suspended step with the response or fails it. A callback
/// dropped without completion fails the suspended run.
pub struct ResponseCallback<R: Value> {
    suspension: Option<Suspension<R>>,
}

impl<R: Value> ResponseCallback<R> {
    pub(crate) fn new(suspension: Suspension<R>) -> Self {
        Self {
            suspension: Some(suspension),
        }
    }

    /// Completes the request with a response or a failure.
    pub fn complete(mut self, response: Result<R, BoxError>) {
        if let Some(suspension) = self.suspension.take() {
            Self::deliver(suspension, response);
        }
    }

    fn deliver(suspension: Suspension<R>, response: Result<R, BoxError>) {
        let result = match response {
            Ok(value) => suspension.resume_with(value),
            Err(error) => {
                let error = CoroutineError::execution(suspension.step(), error);
                suspension.fail(error)
            }
        };

        if let Err(error) = result {
            debug!(
                "[run {}] Response for '{}' discarded: {}",
                suspension.continuation().id(),
                suspension.step(),
                error
            );
        }
    }
}

impl<R: Value> Drop for ResponseCallback<R> {
    fn drop(&mut self) {
        if let Some(suspension) = self.suspension.take() {
            Self::deliver(suspension, Err("response callback dropped without completion".into()));
        }
    }
}

impl<R: Value> fmt::Debug for ResponseCallback<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCallback")
            .field("suspension", &self.suspension)
            .finish()
    }
}

/// A step that communicates with an [`Endpoint`].
pub struct IoStep<Q, R: Value> {
    label: Option<String>,
    endpoint: Arc<dyn Endpoint<Q, R>>,
}

impl<Q: Value, R: Value> IoStep<Q, R> {
    pub fn new(endpoint: impl Endpoint<Q, R>) -> Self {
        Self::with_shared(Arc::new(endpoint))
    }

    /// Creates a step on an endpoint shared with other steps.
    pub fn with_shared(endpoint: Arc<dyn Endpoint<Q, R>>) -> Self {
        Self {
            label: None,
            endpoint,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn connect(&self) -> StepResult<Box<dyn Connection<Q, R>>> {
        self.endpoint
            .connect()
            .map_err(|error| CoroutineError::execution(self.label(), error))
    }
}

impl<Q: Value, R: Value> Step<Q, R> for IoStep<Q, R> {
    fn execute(&self, input: Q, _: &Continuation) -> StepResult<R> {
        self.connect()?
            .send(input)
            .map_err(|error| CoroutineError::execution(self.label(), error))
    }

    fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("IoStep({})", self.endpoint.name()))
    }

    fn run_async(
        self: Arc<Self>,
        previous: StepFuture<Q>,
        next: Option<NextStep<R>>,
        continuation: &Continuation,
    ) {
        let label = self.label();

        continuation.when_ready(previous, label.clone(), move |request, continuation| {
            continuation.record(&label, EventType::Started);
            let suspension = self.suspend(next, continuation)?;

            let sent = self.connect().and_then(|mut connection| {
                connection
                    .send_async(request, ResponseCallback::new(suspension.clone()))
                    .map_err(|error| CoroutineError::execution(label.as_str(), error))
            });
            if let Err(error) = sent {
                if let Err(rejected) = suspension.fail(error) {
                    debug!(
                        "[run {}] Request of '{}' not sent: {}",
                        continuation.id(),
                        label,
                        rejected
                    );
                }
            }
            Ok(())
        });
    }
}

type Handler<Q, R> = dyn Fn(Q) -> Result<R, BoxError> + Send + Sync;

/// In-process endpoint answering requests with a handler function.
///
/// Asynchronous requests are answered on a separate thread after the
/// configured latency.
pub struct LoopbackEndpoint<Q, R> {
    name: String,
    handler: Arc<Handler<Q, R>>,
    latency: Duration,
    connections: Arc<AtomicUsize>,
}

impl<Q: Value, R: Value> LoopbackEndpoint<Q, R> {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Q) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            latency: Duration::ZERO,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the delay before each response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns the number of connections opened so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

impl<Q: Value, R: Value> Endpoint<Q, R> for LoopbackEndpoint<Q, R> {
    fn connect(&self) -> Result<Box<dyn Connection<Q, R>>, BoxError> {
        self.connections.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(LoopbackConnection {
            handler: Arc::clone(&self.handler),
            latency: self.latency,
        }))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

struct LoopbackConnection<Q, R> {
    handler: Arc<Handler<Q, R>>,
    latency: Duration,
}

impl<Q: Value, R: Value> Connection<Q, R> for LoopbackConnection<Q, R> {
    fn send(&mut self, request: Q) -> Result<R, BoxError> {
        thread::sleep(self.latency);
        (self.handler)(request)
    }

    fn send_async(&mut self, request: Q, callback: ResponseCallback<R>) -> Result<(), BoxError> {
        let handler = Arc::clone(&self.handler);
        let latency = self.latency;

        thread::Builder::new()
            .name("loopback-response".to_string())
            .spawn(move || {
                thread::sleep(latency);
                callback.complete(handler(request));
            })?;
        Ok(())
    }
}
