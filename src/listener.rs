//! Listeners and what they return
//!
//! A listener is any `Fn(&[Arg]) -> ListenerResult`. Its identity is
//! assigned once at construction and shared by every clone, so the
//! value handed back from registration can later be used for removal.

use crate::dispatch::TaskHandle;
use crate::error::ListenerError;
use crate::table::ListenerTable;
use crate::types::{Arg, EventKey};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique listener identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Work a listener hands back to be finished later
pub type Deferred = BoxFuture<'static, Result<(), ListenerError>>;

/// Classification of a listener's return value
pub enum Outcome {
    /// Nothing left to do
    Plain,
    /// A computation that still has to be scheduled
    Deferred(Deferred),
    /// Work that is already running and can be tracked
    Tracked(TaskHandle),
}

impl Outcome {
    /// Wrap a future as deferred work
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }

    /// Whether the listener finished synchronously
    pub fn is_plain(&self) -> bool {
        matches!(self, Self::Plain)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("Plain"),
            Self::Deferred(_) => f.write_str("Deferred"),
            Self::Tracked(_) => f.write_str("Tracked"),
        }
    }
}

/// What a listener returns: an outcome, or a synchronous failure
pub type ListenerResult = Result<Outcome, ListenerError>;

type ListenerFn = dyn Fn(&[Arg]) -> ListenerResult + Send + Sync;

/// A registered (or registrable) callback
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    func: Arc<ListenerFn>,
}

impl Listener {
    /// Create a listener from a function returning an outcome
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Arg]) -> ListenerResult + Send + Sync + 'static,
    {
        Self {
            id: ListenerId::next(),
            func: Arc::new(func),
        }
    }

    /// Create a listener that always completes synchronously
    pub fn sync<F>(func: F) -> Self
    where
        F: Fn(&[Arg]) + Send + Sync + 'static,
    {
        Self::new(move |args| {
            func(args);
            Ok(Outcome::Plain)
        })
    }

    /// Create a synchronous listener that may fail
    pub fn fallible<F>(func: F) -> Self
    where
        F: Fn(&[Arg]) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self::new(move |args| func(args).map(|()| Outcome::Plain))
    }

    /// Create a listener whose body is an async block
    ///
    /// The returned future is handed to the emitter's scheduler.
    pub fn deferred<F, Fut>(func: F) -> Self
    where
        F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        Self::new(move |args| Ok(Outcome::deferred(func(args.to_vec()))))
    }

    /// Identity shared by every clone of this listener
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Invoke the listener directly
    pub fn call(&self, args: &[Arg]) -> ListenerResult {
        (self.func)(args)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}

/// Claim on a once-listener's table entry
#[derive(Clone)]
struct OnceGuard {
    table: Weak<Mutex<ListenerTable>>,
    key: EventKey,
}

impl OnceGuard {
    /// Remove the entry if it is still registered; true if this call removed it
    fn claim(&self, id: ListenerId) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
        table.remove(&self.key, id).is_some()
    }
}

/// A snapshot item: the listener to run plus its once-guard, if any
#[derive(Clone)]
pub struct Invocable {
    listener: Listener,
    guard: Option<OnceGuard>,
}

impl Invocable {
    pub(crate) fn plain(listener: Listener) -> Self {
        Self {
            listener,
            guard: None,
        }
    }

    pub(crate) fn once(
        listener: Listener,
        table: Weak<Mutex<ListenerTable>>,
        key: EventKey,
    ) -> Self {
        Self {
            listener,
            guard: Some(OnceGuard { table, key }),
        }
    }

    /// The user-supplied listener behind this invocable
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Whether this is a self-removing once-listener
    pub fn is_once(&self) -> bool {
        self.guard.is_some()
    }

    /// Run the listener
    ///
    /// A once-listener first removes itself from its table; if it was
    /// already gone, the call is skipped and yields `Outcome::Plain`.
    pub fn invoke(&self, args: &[Arg]) -> ListenerResult {
        if let Some(guard) = &self.guard {
            if !guard.claim(self.listener.id) {
                tracing::trace!(
                    listener = %self.listener.id,
                    event = %guard.key,
                    "Once-listener already claimed"
                );
                return Ok(Outcome::Plain);
            }
        }
        self.listener.call(args)
    }
}

impl fmt::Debug for Invocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocable")
            .field("listener", &self.listener.id)
            .field("once", &self.is_once())
            .finish()
    }
}
