//! Deferred-result adapter: schedules async listener results
//!
//! Listeners run inline on the emitting thread. When one hands back a
//! deferred computation (or an already running task), the adapter
//! schedules it, tracks it in a pending set, and attaches a watcher that
//! routes a failed completion back into the emitter as an `error`
//! emission (or `failure` first, for the two-stage variant).
//! Cancellation is never reported.

use super::{deliver, Completion, DispatchStrategy, Scheduler, TaskHandle, TokioScheduler};
use crate::emitter::{EmitterBuilder, EventEmitter};
use crate::error::{EmitterError, Result};
use crate::listener::{Invocable, Outcome};
use crate::types::{Arg, EventKey, Payload, ERROR, FAILURE};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::AbortHandle;

/// Where a failed deferred computation is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorRouting {
    /// Emit on `error`
    Direct,
    /// Emit on `failure`; an unhandled `failure` is re-emitted on `error`
    FailureFirst,
}

/// What happens when a listener fails before returning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailures {
    /// Propagate out of `emit` as `EmitterError::Listener`
    Propagate,
    /// Emit on `error`, like a deferred failure
    Reroute,
}

/// In-flight deferred work owned by one adapter
#[derive(Default)]
struct PendingSet {
    next: AtomicU64,
    tasks: Mutex<HashMap<u64, Option<AbortHandle>>>,
    idle: Notify,
}

impl PendingSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Option<AbortHandle>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, abort: Option<AbortHandle>) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, abort);
        id
    }

    fn finish(&self, id: u64) {
        let empty = {
            let mut tasks = self.lock();
            tasks.remove(&id);
            tasks.is_empty()
        };
        if empty {
            self.idle.notify_waiters();
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn cancel_all(&self) -> usize {
        let tasks = self.lock();
        let mut cancelled = 0;
        for abort in tasks.values().flatten() {
            abort.abort();
            cancelled += 1;
        }
        cancelled
    }

    async fn wait_idle(&self) {
        loop {
            // Registered before the check so a concurrent finish is not missed
            let notified = self.idle.notified();
            if self.len() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Dispatch strategy that schedules deferred listener results
pub struct DeferredAdapter {
    scheduler: Option<Arc<dyn Scheduler>>,
    routing: ErrorRouting,
    sync_failures: SyncFailures,
    pending: Arc<PendingSet>,
}

impl DeferredAdapter {
    /// Route every listener failure, synchronous or deferred, to `error`
    ///
    /// Deferred work is scheduled on the tokio runtime of the emitting
    /// context unless a scheduler is supplied.
    pub fn new() -> Self {
        Self {
            scheduler: None,
            routing: ErrorRouting::Direct,
            sync_failures: SyncFailures::Reroute,
            pending: Arc::default(),
        }
    }

    /// Route deferred failures to `failure`, then `error` if unhandled
    ///
    /// Synchronous failures propagate out of `emit`.
    pub fn two_stage() -> Self {
        Self {
            scheduler: None,
            routing: ErrorRouting::FailureFirst,
            sync_failures: SyncFailures::Propagate,
            pending: Arc::default(),
        }
    }

    /// Schedule deferred work with an explicit scheduler
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn routing(&self) -> ErrorRouting {
        self.routing
    }

    pub fn sync_failures(&self) -> SyncFailures {
        self.sync_failures
    }

    /// Number of deferred computations not yet completed
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Abort every cancellable pending computation
    ///
    /// Returns how many abort requests were issued. Aborted work
    /// completes as cancelled and is not reported as an error.
    pub fn cancel_pending(&self) -> usize {
        let cancelled = self.pending.cancel_all();
        tracing::debug!(cancelled, "Pending listener tasks cancelled");
        cancelled
    }

    /// Wait until every pending computation has completed
    pub async fn wait_idle(&self) {
        self.pending.wait_idle().await
    }

    fn scheduler(&self) -> Result<Arc<dyn Scheduler>> {
        match &self.scheduler {
            Some(scheduler) => Ok(scheduler.clone()),
            None => Ok(Arc::new(TokioScheduler::current()?)),
        }
    }

    fn sink(&self) -> &'static str {
        match self.routing {
            ErrorRouting::Direct => ERROR,
            ErrorRouting::FailureFirst => FAILURE,
        }
    }

    /// Track a running task and route its failure when it completes
    fn track(&self, scheduler: &dyn Scheduler, emitter: &EventEmitter, event: &EventKey, task: TaskHandle) -> Result<()> {
        let id = self.pending.insert(task.abort_handle());
        let pending = self.pending.clone();
        let weak = emitter.downgrade();
        let sink = self.sink();
        let name = emitter.name().to_string();
        let event = event.to_string();

        let watcher = async move {
            match task.wait().await {
                Completion::Succeeded => {}
                Completion::Cancelled => {
                    tracing::debug!(emitter = %name, event = %event, "Listener task cancelled");
                }
                Completion::Failed(error) => {
                    if let Err(e) = deliver(&weak, sink, error) {
                        tracing::error!(
                            emitter = %name,
                            event = %event,
                            error = %e,
                            "Deferred listener failure was not handled"
                        );
                    }
                }
            }
            pending.finish(id);
        };

        if let Err(e) = scheduler.watch(Box::pin(watcher)) {
            self.pending.finish(id);
            return Err(e);
        }
        Ok(())
    }
}

impl Default for DeferredAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeferredAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredAdapter")
            .field("routing", &self.routing)
            .field("sync_failures", &self.sync_failures)
            .field("pending", &self.pending())
            .finish()
    }
}

impl DispatchStrategy for DeferredAdapter {
    fn name(&self) -> &str {
        "deferred"
    }

    fn run(
        &self,
        emitter: &EventEmitter,
        event: &EventKey,
        call: Invocable,
        args: Payload,
    ) -> Result<()> {
        let outcome = match call.invoke(&args) {
            Ok(outcome) => outcome,
            Err(source) => {
                return match self.sync_failures {
                    SyncFailures::Propagate => Err(EmitterError::Listener {
                        event: event.to_string(),
                        source,
                    }),
                    SyncFailures::Reroute => emitter.emit(ERROR, vec![Arg::Error(source)]).map(|_| ()),
                };
            }
        };

        let (scheduler, task) = match outcome {
            Outcome::Plain => return Ok(()),
            Outcome::Deferred(work) => {
                let scheduler = self.scheduler()?;
                let task = scheduler.schedule(work)?;
                (scheduler, task)
            }
            Outcome::Tracked(task) => (self.scheduler()?, task),
        };

        tracing::trace!(
            emitter = %emitter.name(),
            event = %event,
            listener = %call.listener().id(),
            "Deferred listener result scheduled"
        );
        self.track(scheduler.as_ref(), emitter, event, task)
    }

    fn escalate(&self, emitter: &EventEmitter, event: &EventKey, first: Option<&Arg>) -> Result<()> {
        if self.routing == ErrorRouting::FailureFirst && is_failure(event) {
            let args = first.cloned().into_iter().collect();
            return emitter.emit(ERROR, args).map(|_| ());
        }
        emitter.raise_unhandled(event, first)
    }
}

/// Whether `event` is the `failure` key, flat or as a one-segment path
fn is_failure(event: &EventKey) -> bool {
    match event {
        EventKey::Name(name) => name == FAILURE,
        EventKey::Path(segments) => matches!(segments.as_slice(), [head] if head == FAILURE),
    }
}

/// Emitter whose listeners may return async work
///
/// Dereferences to the underlying `EventEmitter`.
#[derive(Clone)]
pub struct AsyncEventEmitter {
    emitter: EventEmitter,
    adapter: Arc<DeferredAdapter>,
}

impl AsyncEventEmitter {
    /// Emitter using `DeferredAdapter::new` on the ambient tokio runtime
    pub fn new() -> Self {
        Self::from_builder(EventEmitter::builder(), DeferredAdapter::new())
    }

    /// Emitter using `DeferredAdapter::new` with an explicit scheduler
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::from_builder(
            EventEmitter::builder(),
            DeferredAdapter::new().with_scheduler(scheduler),
        )
    }

    /// Emitter using `DeferredAdapter::two_stage`
    pub fn two_stage() -> Self {
        Self::from_builder(EventEmitter::builder(), DeferredAdapter::two_stage())
    }

    /// Build from an emitter builder and a configured adapter
    ///
    /// With `FailureFirst` routing, `failure` is blacklisted so it stays
    /// a flat event under namespace keys.
    pub fn from_builder(builder: EmitterBuilder, adapter: DeferredAdapter) -> Self {
        let builder = match adapter.routing() {
            ErrorRouting::FailureFirst => builder.blacklist(FAILURE),
            ErrorRouting::Direct => builder,
        };
        let adapter = Arc::new(adapter);
        let emitter = builder.dispatch(adapter.clone()).build();
        Self { emitter, adapter }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn adapter(&self) -> &DeferredAdapter {
        &self.adapter
    }

    /// Number of deferred computations not yet completed
    pub fn pending(&self) -> usize {
        self.adapter.pending()
    }

    /// Abort every cancellable pending computation
    pub fn cancel_pending(&self) -> usize {
        self.adapter.cancel_pending()
    }

    /// Wait until every pending computation has completed
    pub async fn wait_idle(&self) {
        self.adapter.wait_idle().await
    }
}

impl Default for AsyncEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for AsyncEventEmitter {
    type Target = EventEmitter;

    fn deref(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl AsRef<EventEmitter> for AsyncEventEmitter {
    fn as_ref(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl std::fmt::Debug for AsyncEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncEventEmitter")
            .field("emitter", &self.emitter)
            .field("adapter", &self.adapter)
            .finish()
    }
}
