//! Dispatch strategies: how each listener call is run
//!
//! The emitter snapshots the listeners for an emission and hands each
//! one to its `DispatchStrategy`. The strategy invokes the listener
//! (inline, on a worker thread, or in a task scope), classifies the
//! result, and routes asynchronous failures back into the emitter as
//! `error` emissions.

use crate::emitter::{EventEmitter, WeakEmitter};
use crate::error::{EmitterError, ListenerError, Result};
use crate::listener::{Deferred, Invocable, Outcome};
use crate::types::{Arg, EventKey, Payload};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

pub mod deferred;
pub mod pool;
pub mod scope;

/// Pluggable per-listener execution strategy
pub trait DispatchStrategy: Send + Sync {
    /// Strategy name (e.g., "inline", "deferred", "pool", "scope")
    fn name(&self) -> &str;

    /// Run one listener for one emission
    ///
    /// Errors returned here propagate out of `emit`.
    fn run(
        &self,
        emitter: &EventEmitter,
        event: &EventKey,
        call: Invocable,
        args: Payload,
    ) -> Result<()>;

    /// Decide what an emission nobody handled means
    ///
    /// Default: an unhandled `error` event raises; anything else is ignored.
    fn escalate(&self, emitter: &EventEmitter, event: &EventKey, first: Option<&Arg>) -> Result<()> {
        emitter.raise_unhandled(event, first)
    }
}

/// Runs listeners inline on the emitting thread
///
/// Synchronous failures propagate out of `emit`. Deferred results are
/// dropped: without a scheduler there is nothing to run them on.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl DispatchStrategy for Inline {
    fn name(&self) -> &str {
        "inline"
    }

    fn run(
        &self,
        emitter: &EventEmitter,
        event: &EventKey,
        call: Invocable,
        args: Payload,
    ) -> Result<()> {
        let outcome = call.invoke(&args).map_err(|source| EmitterError::Listener {
            event: event.to_string(),
            source,
        })?;

        if !outcome.is_plain() {
            tracing::warn!(
                emitter = %emitter.name(),
                event = %event,
                listener = %call.listener().id(),
                outcome = ?outcome,
                "Deferred listener result dropped; emitter has no scheduler"
            );
        }
        Ok(())
    }
}

/// How a tracked task ended
#[derive(Debug, Clone)]
pub enum Completion {
    /// Finished without error
    Succeeded,
    /// Finished with an error (or panicked)
    Failed(ListenerError),
    /// Cancelled before finishing
    Cancelled,
}

impl Completion {
    fn from_join(result: std::result::Result<std::result::Result<(), ListenerError>, JoinError>) -> Self {
        match result {
            Ok(Ok(())) => Self::Succeeded,
            Ok(Err(error)) => Self::Failed(error),
            Err(error) if error.is_cancelled() => Self::Cancelled,
            Err(error) => Self::Failed(ListenerError::msg(error.to_string())),
        }
    }

    /// Collapse into a result, treating cancellation as success
    pub fn into_result(self) -> std::result::Result<(), ListenerError> {
        match self {
            Self::Failed(error) => Err(error),
            Self::Succeeded | Self::Cancelled => Ok(()),
        }
    }
}

/// A handle to scheduled work that reports how it completed
pub struct TaskHandle {
    completion: BoxFuture<'static, Completion>,
    abort: Option<AbortHandle>,
}

impl TaskHandle {
    /// Track a spawned tokio task
    pub fn from_join(handle: JoinHandle<std::result::Result<(), ListenerError>>) -> Self {
        let abort = handle.abort_handle();
        Self {
            completion: Box::pin(async move { Completion::from_join(handle.await) }),
            abort: Some(abort),
        }
    }

    /// Track arbitrary work through a future resolving to its completion
    pub fn from_future<F>(completion: F) -> Self
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        Self {
            completion: Box::pin(completion),
            abort: None,
        }
    }

    /// Abort handle for the underlying task, when it can be cancelled
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort.clone()
    }

    /// Wait for the work to complete
    pub async fn wait(self) -> Completion {
        self.completion.await
    }
}

impl From<JoinHandle<std::result::Result<(), ListenerError>>> for TaskHandle {
    fn from(handle: JoinHandle<std::result::Result<(), ListenerError>>) -> Self {
        Self::from_join(handle)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("abortable", &self.abort.is_some())
            .finish()
    }
}

/// External asynchronous scheduler
///
/// Turns deferred computations into trackable handles and runs the
/// completion watchers that route their failures.
pub trait Scheduler: Send + Sync {
    /// Start a deferred computation
    fn schedule(&self, work: Deferred) -> Result<TaskHandle>;

    /// Run a completion watcher in the background
    fn watch(&self, watcher: BoxFuture<'static, ()>) -> Result<()>;
}

/// Scheduler backed by a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Schedule onto the given runtime
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto the runtime of the calling context
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| EmitterError::Scheduler(format!("no tokio runtime available: {}", e)))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, work: Deferred) -> Result<TaskHandle> {
        Ok(TaskHandle::from_join(self.handle.spawn(work)))
    }

    fn watch(&self, watcher: BoxFuture<'static, ()>) -> Result<()> {
        self.handle.spawn(watcher);
        Ok(())
    }
}

/// Drive a listener call to completion on the current thread
///
/// Used by adapters that already run listeners off the emitting thread.
pub(crate) async fn run_to_completion(call: &Invocable, args: &[Arg]) -> std::result::Result<(), ListenerError> {
    match call.invoke(args)? {
        Outcome::Plain => Ok(()),
        Outcome::Deferred(work) => work.await,
        Outcome::Tracked(task) => task.wait().await.into_result(),
    }
}

/// Emit a background failure on `event` of a (possibly dropped) emitter
pub(crate) fn deliver(emitter: &WeakEmitter, event: &str, error: ListenerError) -> Result<()> {
    let Some(emitter) = emitter.upgrade() else {
        tracing::warn!(
            event = %event,
            error = %error,
            "Listener failure arrived after its emitter was dropped"
        );
        return Ok(());
    };
    emitter.emit(event, vec![Arg::Error(error)]).map(|_| ())
}
