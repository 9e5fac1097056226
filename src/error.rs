//! Error types for a3s-emitter

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur in the emitter
#[derive(Debug, Error)]
pub enum EmitterError {
    /// `error` was emitted with an error payload and nothing handled it
    #[error("Uncaught 'error' event on emitter '{emitter}': {source}")]
    Uncaught {
        emitter: String,
        #[source]
        source: ListenerError,
    },

    /// `error` was emitted without an error payload and nothing handled it
    #[error("Uncaught, unspecified 'error' event on emitter '{emitter}': {detail}")]
    Unspecified { emitter: String, detail: String },

    /// A listener failed synchronously and the adapter propagates it
    #[error("Listener for event '{event}' failed: {source}")]
    Listener {
        event: String,
        #[source]
        source: ListenerError,
    },

    /// Removal of a listener that is not registered
    #[error("Listener {listener} is not registered for event '{event}'")]
    NotFound { event: String, listener: String },

    /// Event key rejected by the key strategy
    #[error("Invalid event key: {0}")]
    InvalidKey(String),

    /// Namespace path headed by a name that may only be used as a flat event
    #[error("'{0}' is a blacklisted namespace; it can only be emitted or listened to as a simple event")]
    BlacklistedNamespace(String),

    /// Incompatible or missing construction options
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scheduler unavailable or failed to run a deferred computation
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Emission into a task scope that is not open
    #[error("Task scope is not open")]
    ScopeClosed,

    /// Submission to a worker pool that has been shut down
    #[error("Worker pool has been shut down")]
    PoolShutdown,

    /// I/O failure while building runtime resources
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for emitter operations
pub type Result<T> = std::result::Result<T, EmitterError>;

/// A failure produced by a listener or by the deferred work it returned
///
/// Cheap to clone so the same failure can travel as an event argument
/// and be re-raised when the `error` event goes unhandled.
#[derive(Clone)]
pub struct ListenerError(Arc<dyn std::error::Error + Send + Sync + 'static>);

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl ListenerError {
    /// Wrap any error
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Create an error from a plain message
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(Message(message.into())))
    }

    /// Attempt to view the wrapped error as a concrete type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Whether both values carry the very same failure
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<EmitterError> for ListenerError {
    fn from(error: EmitterError) -> Self {
        Self::new(error)
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}
