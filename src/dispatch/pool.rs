//! Executor-pool adapter: every listener call runs on a worker thread
//!
//! `emit` only submits work and never waits for listeners. A listener
//! that fails (or panics, or returns async work that later fails) has
//! its failure emitted on `error` from the worker.

use super::{deliver, run_to_completion, DispatchStrategy};
use crate::emitter::{EmitterBuilder, EventEmitter};
use crate::error::{EmitterError, ListenerError, Result};
use crate::listener::Invocable;
use crate::types::{Arg, EventKey, Payload, PoolConfig, ERROR};
use std::any::Any;
use std::ops::Deref;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// A unit of work submitted to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool that runs submitted jobs off the calling thread
pub trait Executor: Send + Sync {
    /// Queue a job; fails once the pool is shut down
    fn submit(&self, job: Job) -> Result<()>;

    /// Stop accepting jobs
    ///
    /// With `wait`, blocks until every submitted job has finished.
    /// Failures of jobs still running cannot be emitted on `error`
    /// through the pool once it stops accepting jobs; they are logged.
    fn shutdown(&self, wait: bool);
}

struct PoolState {
    runtime: Option<Runtime>,
    jobs: Vec<JoinHandle<()>>,
}

/// Executor backed by the blocking pool of a dedicated tokio runtime
///
/// Jobs may use `Handle::current()` to drive async work to completion.
pub struct ThreadPool {
    state: Mutex<PoolState>,
    config: PoolConfig,
}

impl ThreadPool {
    /// Start a pool with the given configuration
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.workers == 0 {
            return Err(EmitterError::Config(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.workers)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()?;

        tracing::debug!(
            workers = config.workers,
            thread_name = %config.thread_name,
            "Worker pool started"
        );

        Ok(Self {
            state: Mutex::new(PoolState {
                runtime: Some(runtime),
                jobs: Vec::new(),
            }),
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether the pool still accepts jobs
    pub fn is_running(&self) -> bool {
        self.state().runtime.is_some()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Executor for ThreadPool {
    fn submit(&self, job: Job) -> Result<()> {
        let mut state = self.state();
        let Some(runtime) = state.runtime.as_ref() else {
            return Err(EmitterError::PoolShutdown);
        };
        let handle = runtime.spawn_blocking(job);
        state.jobs.retain(|job| !job.is_finished());
        state.jobs.push(handle);
        Ok(())
    }

    /// Must not be called with `wait` from async code or from a job.
    fn shutdown(&self, wait: bool) {
        let (runtime, jobs) = {
            let mut state = self.state();
            let Some(runtime) = state.runtime.take() else {
                return;
            };
            (runtime, std::mem::take(&mut state.jobs))
        };

        if wait {
            let outstanding = jobs.len();
            runtime.block_on(futures::future::join_all(jobs));
            drop(runtime);
            tracing::debug!(outstanding, "Worker pool shut down");
        } else {
            runtime.shutdown_background();
            tracing::debug!("Worker pool shut down without waiting");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = state.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Dispatch strategy that submits each listener call to an executor
pub struct PoolAdapter {
    executor: Arc<dyn Executor>,
}

impl PoolAdapter {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }
}

impl DispatchStrategy for PoolAdapter {
    fn name(&self) -> &str {
        "pool"
    }

    fn run(
        &self,
        emitter: &EventEmitter,
        event: &EventKey,
        call: Invocable,
        args: Payload,
    ) -> Result<()> {
        let weak = emitter.downgrade();
        let name = emitter.name().to_string();
        let event = event.to_string();

        self.executor.submit(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(|| complete(&call, &args)))
                .unwrap_or_else(|panic| Err(ListenerError::msg(panic_message(panic))));

            let Err(error) = result else {
                return;
            };
            if let Err(e) = deliver(&weak, ERROR, error) {
                tracing::error!(
                    emitter = %name,
                    event = %event,
                    error = %e,
                    "Worker listener failure was not handled"
                );
            }
        }))
    }
}

/// Run a listener call, driving any async result on this worker
fn complete(call: &Invocable, args: &[Arg]) -> std::result::Result<(), ListenerError> {
    match Handle::try_current() {
        Ok(handle) => handle.block_on(run_to_completion(call, args)),
        Err(_) => futures::executor::block_on(run_to_completion(call, args)),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("listener panicked: {}", message)
    } else {
        "listener panicked".to_string()
    }
}

/// Emitter whose listeners always run on a worker pool
///
/// Dropping the last handle to a `ThreadPool` does not wait: queued jobs
/// are discarded. Use `run` or `shutdown(true)` to drain the pool.
#[derive(Clone)]
pub struct ExecutorEventEmitter {
    emitter: EventEmitter,
    executor: Arc<dyn Executor>,
}

impl ExecutorEventEmitter {
    /// Emitter over a fresh `ThreadPool` with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Emitter over a fresh `ThreadPool`
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        Ok(Self::with_executor(Arc::new(ThreadPool::new(config)?)))
    }

    /// Emitter over an existing executor
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self::from_builder(EventEmitter::builder(), executor)
    }

    pub fn from_builder(builder: EmitterBuilder, executor: Arc<dyn Executor>) -> Self {
        let emitter = builder
            .dispatch(Arc::new(PoolAdapter::new(executor.clone())))
            .build();
        Self { emitter, executor }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Shut the executor down; see `Executor::shutdown`
    pub fn shutdown(&self, wait: bool) {
        self.executor.shutdown(wait);
    }

    /// Run `body` with the emitter, then shut the pool down and wait
    ///
    /// Must not be called from async code.
    pub fn run<T, F>(self, body: F) -> T
    where
        F: FnOnce(&Self) -> T,
    {
        let value = body(&self);
        self.shutdown(true);
        value
    }
}

impl Deref for ExecutorEventEmitter {
    type Target = EventEmitter;

    fn deref(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl AsRef<EventEmitter> for ExecutorEventEmitter {
    fn as_ref(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl std::fmt::Debug for ExecutorEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorEventEmitter")
            .field("emitter", &self.emitter)
            .finish()
    }
}
