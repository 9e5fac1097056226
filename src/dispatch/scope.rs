//! Task-scope adapter: listeners run as tasks of a structured scope
//!
//! Emission spawns one task per listener into the current `TaskScope`
//! and returns immediately. The scope is acquired with `enter` and
//! released with `exit`, which waits for every spawned task (or cancels
//! them all on the first failure nobody handled).

use super::{deliver, run_to_completion, DispatchStrategy};
use crate::emitter::{EmitterBuilder, EventEmitter};
use crate::error::{EmitterError, Result};
use crate::listener::Invocable;
use crate::types::{EventKey, Payload, ERROR};
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinError, JoinSet};

struct ScopeState {
    tasks: Option<JoinSet<Result<()>>>,
    aborts: Vec<AbortHandle>,
    /// First failure collected while reaping, returned by `join`
    failed: Option<EmitterError>,
}

impl ScopeState {
    /// Drop finished tasks, keeping the first failure
    fn reap(&mut self) {
        let Some(tasks) = self.tasks.as_mut() else {
            return;
        };
        while let Some(joined) = tasks.try_join_next() {
            let Some(failure) = task_failure(joined) else {
                continue;
            };
            if self.failed.is_none() {
                tracing::debug!(error = %failure, "Scope task failed, cancelling the rest");
                for abort in self.aborts.drain(..) {
                    abort.abort();
                }
                self.failed = Some(failure);
            }
        }
        self.aborts.retain(|a| !a.is_finished());
    }
}

fn task_failure(joined: std::result::Result<Result<()>, JoinError>) -> Option<EmitterError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(e) if e.is_cancelled() => None,
        Err(e) => Some(EmitterError::Scheduler(format!("listener task failed: {}", e))),
    }
}

/// A group of tasks that are awaited or cancelled together
pub struct TaskScope {
    handle: Handle,
    state: Mutex<ScopeState>,
}

impl TaskScope {
    /// Open a scope on the runtime of the calling context
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| EmitterError::Scheduler(format!("no tokio runtime available: {}", e)))?;
        Ok(Self::with_handle(handle))
    }

    /// Open a scope whose tasks run on `handle`
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            state: Mutex::new(ScopeState {
                tasks: Some(JoinSet::new()),
                aborts: Vec::new(),
                failed: None,
            }),
        }
    }

    /// Spawn a task into the scope; fails once the scope is closed
    pub fn spawn<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut state = self.state();
        state.reap();
        let Some(tasks) = state.tasks.as_mut() else {
            return Err(EmitterError::ScopeClosed);
        };
        let abort = tasks.spawn_on(task, &self.handle);
        state.aborts.push(abort);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state().tasks.is_some()
    }

    /// Number of tasks still running
    pub fn len(&self) -> usize {
        let mut state = self.state();
        state.reap();
        state.tasks.as_ref().map_or(0, JoinSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every task, including tasks spawned while waiting
    ///
    /// The first failure cancels the remaining tasks and is returned.
    /// Cancelled tasks are not failures.
    pub async fn join(&self) -> Result<()> {
        let mut first: Option<EmitterError> = None;

        loop {
            let (reaped, batch) = {
                let mut state = self.state();
                let reaped = state.failed.take();
                let batch = match state.tasks.as_mut() {
                    Some(tasks) if !tasks.is_empty() => Some(std::mem::take(tasks)),
                    _ => None,
                };
                (reaped, batch)
            };
            if let Some(failure) = reaped {
                self.fail(&mut first, failure);
            }
            let Some(mut batch) = batch else {
                break;
            };

            while let Some(joined) = batch.join_next().await {
                if let Some(failure) = task_failure(joined) {
                    if first.is_none() {
                        batch.abort_all();
                    }
                    self.fail(&mut first, failure);
                }
            }
        }

        match first {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Keep the first failure and cancel everything still running
    fn fail(&self, first: &mut Option<EmitterError>, failure: EmitterError) {
        if first.is_some() {
            return;
        }
        tracing::debug!(error = %failure, "Scope task failed, cancelling the rest");
        self.cancel_all();
        *first = Some(failure);
    }

    /// Cancel every task in the scope, including tasks being joined
    pub fn cancel_all(&self) {
        let mut state = self.state();
        for abort in state.aborts.drain(..) {
            abort.abort();
        }
    }

    /// Stop accepting tasks; tasks not yet joined are aborted
    pub fn close(&self) {
        let tasks = self.state().tasks.take();
        drop(tasks);
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("open", &self.is_open())
            .field("tasks", &self.len())
            .finish()
    }
}

#[derive(Debug)]
enum ScopeSource {
    /// Caller-owned scope; exit detaches without joining
    External(Arc<TaskScope>),
    /// Scope created on enter and joined on exit
    Lazy(Option<Handle>),
}

/// Dispatch strategy that spawns listeners into the entered scope
#[derive(Debug)]
pub struct ScopeAdapter {
    source: ScopeSource,
    current: Mutex<Option<Arc<TaskScope>>>,
}

impl ScopeAdapter {
    pub fn builder() -> ScopeAdapterBuilder {
        ScopeAdapterBuilder::default()
    }

    /// Acquire the scope listeners will be spawned into
    pub fn enter(&self) -> Result<Arc<TaskScope>> {
        let mut current = self.current();
        if current.is_some() {
            return Err(EmitterError::Config("task scope already entered".to_string()));
        }

        let scope = match &self.source {
            ScopeSource::External(scope) if !scope.is_open() => return Err(EmitterError::ScopeClosed),
            ScopeSource::External(scope) => scope.clone(),
            ScopeSource::Lazy(Some(handle)) => Arc::new(TaskScope::with_handle(handle.clone())),
            ScopeSource::Lazy(None) => Arc::new(TaskScope::new()?),
        };
        *current = Some(scope.clone());
        tracing::debug!("Task scope entered");
        Ok(scope)
    }

    /// Release the scope
    ///
    /// A lazily created scope is joined and closed; its first unhandled
    /// failure is returned. A caller-owned scope is only detached.
    ///
    /// The scope stays entered while it is joined, so failures of tasks
    /// still running can be emitted on `error`.
    pub async fn exit(&self) -> Result<()> {
        let Some(scope) = self.scope() else {
            return Ok(());
        };

        match &self.source {
            ScopeSource::External(_) => {
                self.current().take();
                tracing::debug!("Task scope detached");
                Ok(())
            }
            ScopeSource::Lazy(_) => {
                let result = scope.join().await;
                scope.close();
                self.current().take();
                tracing::debug!(ok = result.is_ok(), "Task scope exited");
                result
            }
        }
    }

    /// Cancel every task in the entered scope
    pub fn cancel(&self) {
        if let Some(scope) = self.current().as_ref() {
            scope.cancel_all();
        }
    }

    /// The entered scope, if any
    pub fn scope(&self) -> Option<Arc<TaskScope>> {
        self.current().clone()
    }

    fn current(&self) -> MutexGuard<'_, Option<Arc<TaskScope>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DispatchStrategy for ScopeAdapter {
    fn name(&self) -> &str {
        "scope"
    }

    fn run(
        &self,
        emitter: &EventEmitter,
        event: &EventKey,
        call: Invocable,
        args: Payload,
    ) -> Result<()> {
        let Some(scope) = self.scope() else {
            return Err(EmitterError::ScopeClosed);
        };

        let weak = emitter.downgrade();
        let name = emitter.name().to_string();
        let event = event.to_string();

        scope.spawn(async move {
            let Err(error) = run_to_completion(&call, &args).await else {
                return Ok(());
            };
            deliver(&weak, ERROR, error).map_err(|e| {
                tracing::error!(
                    emitter = %name,
                    event = %event,
                    error = %e,
                    "Scoped listener failure was not handled"
                );
                e
            })
        })
    }
}

/// Builder for `ScopeAdapter`
#[derive(Default)]
pub struct ScopeAdapterBuilder {
    scope: Option<Arc<TaskScope>>,
    runtime: Option<Handle>,
}

impl ScopeAdapterBuilder {
    /// Spawn into a caller-owned scope
    pub fn scope(mut self, scope: Arc<TaskScope>) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Create scopes on `handle` instead of the ambient runtime
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<ScopeAdapter> {
        let source = match (self.scope, self.runtime) {
            (Some(_), Some(_)) => {
                return Err(EmitterError::Config(
                    "a task scope and a runtime handle cannot both be given".to_string(),
                ))
            }
            (Some(scope), None) => ScopeSource::External(scope),
            (None, runtime) => ScopeSource::Lazy(runtime),
        };
        Ok(ScopeAdapter {
            source,
            current: Mutex::new(None),
        })
    }
}

/// Emitter whose listeners run as tasks of a scope
#[derive(Clone)]
pub struct ScopedEventEmitter {
    emitter: EventEmitter,
    adapter: Arc<ScopeAdapter>,
}

impl ScopedEventEmitter {
    /// Emitter creating its scope on the ambient runtime at `enter`
    pub fn new() -> Self {
        Self::from_adapter(
            EventEmitter::builder(),
            ScopeAdapter {
                source: ScopeSource::Lazy(None),
                current: Mutex::new(None),
            },
        )
    }

    /// Emitter spawning into a caller-owned scope
    pub fn with_scope(scope: Arc<TaskScope>) -> Self {
        Self::from_adapter(
            EventEmitter::builder(),
            ScopeAdapter {
                source: ScopeSource::External(scope),
                current: Mutex::new(None),
            },
        )
    }

    /// Build from an emitter builder and a configured adapter
    pub fn from_adapter(builder: EmitterBuilder, adapter: ScopeAdapter) -> Self {
        let adapter = Arc::new(adapter);
        let emitter = builder.dispatch(adapter.clone()).build();
        Self { emitter, adapter }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn adapter(&self) -> &ScopeAdapter {
        &self.adapter
    }

    /// Acquire the scope; emissions before this fail with `ScopeClosed`
    pub fn enter(&self) -> Result<Arc<TaskScope>> {
        self.adapter.enter()
    }

    /// Release the scope, waiting for spawned listeners
    pub async fn exit(&self) -> Result<()> {
        self.adapter.exit().await
    }

    /// Cancel every in-flight listener task
    pub fn cancel(&self) {
        self.adapter.cancel()
    }

    /// Run `body` inside an entered scope
    ///
    /// The scope is exited after `body` completes; an unhandled listener
    /// failure from the scope takes precedence over `body`'s value.
    pub async fn run<F, T>(&self, body: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.enter()?;
        let value = body.await;
        self.exit().await?;
        Ok(value)
    }
}

impl Default for ScopedEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for ScopedEventEmitter {
    type Target = EventEmitter;

    fn deref(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl AsRef<EventEmitter> for ScopedEventEmitter {
    fn as_ref(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl std::fmt::Debug for ScopedEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedEventEmitter")
            .field("emitter", &self.emitter)
            .field("adapter", &self.adapter)
            .finish()
    }
}
