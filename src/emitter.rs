//! Event emitter: listener registry and synchronous dispatch
//!
//! `EventEmitter` owns one listener table behind a mutex. Emission takes
//! a snapshot of the matching listeners under the lock and runs them
//! outside it through the emitter's `DispatchStrategy`, so listeners may
//! freely register, remove, or emit while being dispatched.

use crate::dispatch::{DispatchStrategy, Inline};
use crate::error::{EmitterError, Result};
use crate::keys::{FlatKeys, KeyStrategy, NamespaceKeys, TopicKeys};
use crate::listener::{Invocable, Listener};
use crate::table::{Entry, ListenerTable};
use crate::types::{Arg, EmitterConfig, EventKey, KeyMode, Payload, NEW_LISTENER};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

struct Inner {
    name: String,
    table: Arc<Mutex<ListenerTable>>,
    keys: Arc<dyn KeyStrategy>,
    dispatch: Arc<dyn DispatchStrategy>,
}

/// Listener registry with synchronous emission
///
/// Cloning is cheap and yields another handle to the same registry.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<Inner>,
}

/// Non-owning handle to an emitter, used by completion hooks
#[derive(Clone)]
pub struct WeakEmitter {
    inner: Weak<Inner>,
}

impl WeakEmitter {
    /// Recover the emitter if it is still alive
    pub fn upgrade(&self) -> Option<EventEmitter> {
        self.inner.upgrade().map(|inner| EventEmitter { inner })
    }
}

impl fmt::Debug for WeakEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEmitter")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl EventEmitter {
    /// Create a flat, inline emitter
    pub fn new() -> Self {
        EmitterBuilder::new().build()
    }

    /// Start building a configured emitter
    pub fn builder() -> EmitterBuilder {
        EmitterBuilder::new()
    }

    /// Create an inline emitter from configuration
    pub fn from_config(config: EmitterConfig) -> Self {
        EmitterBuilder::new().config(config).build()
    }

    /// Emitter name used in logs and uncaught-error values
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Name of the dispatch strategy in use
    pub fn strategy(&self) -> &str {
        self.inner.dispatch.name()
    }

    pub fn downgrade(&self) -> WeakEmitter {
        WeakEmitter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same registry
    pub fn same(&self, other: &EventEmitter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `listener` for `key`
    ///
    /// `new_listener` is emitted with `(key, listener)` before the
    /// listener is added. Returns the listener for later removal.
    pub fn on(&self, key: impl Into<EventKey>, listener: Listener) -> Result<Listener> {
        self.register(key.into(), listener, false, |key, listener| {
            self.announce(key, listener)
        })
    }

    /// Register `listener` for a single invocation
    ///
    /// The listener removes itself before it runs, so it fires at most
    /// once even when emissions race.
    pub fn once(&self, key: impl Into<EventKey>, listener: Listener) -> Result<Listener> {
        self.register(key.into(), listener, true, |key, listener| {
            self.announce(key, listener)
        })
    }

    /// Emit `key`, passing `args` to every listener registered for it
    ///
    /// Returns whether any listener was registered at snapshot time.
    /// An unhandled `error` event raises its first argument as
    /// `EmitterError::Uncaught` (or `Unspecified` if it is not an error).
    pub fn emit(&self, key: impl Into<EventKey>, args: Vec<Arg>) -> Result<bool> {
        let key = self.normalize(key.into())?;
        let args: Payload = args.into();

        let handled = self.call_handlers(&key, &args)?;
        if !handled {
            self.escalate(&key, args.first())?;
        }
        Ok(handled)
    }

    /// Remove a listener; fails with `NotFound` if it is not registered
    pub fn remove_listener(&self, key: impl Into<EventKey>, listener: &Listener) -> Result<()> {
        let key = self.normalize(key.into())?;
        let removed = self.table().remove(&key, listener.id());

        match removed {
            Some(_) => {
                tracing::debug!(
                    emitter = %self.name(),
                    event = %key,
                    listener = %listener.id(),
                    "Listener removed"
                );
                Ok(())
            }
            None => Err(EmitterError::NotFound {
                event: key.to_string(),
                listener: listener.id().to_string(),
            }),
        }
    }

    /// Remove every listener for `key`, or every listener when `key` is `None`
    pub fn remove_all_listeners(&self, key: Option<EventKey>) -> Result<()> {
        match key {
            Some(key) => {
                let key = self.normalize(key)?;
                self.table().clear(&key);
                tracing::debug!(emitter = %self.name(), event = %key, "All listeners removed for event");
            }
            None => {
                self.table().clear_all();
                tracing::debug!(emitter = %self.name(), "All listeners removed");
            }
        }
        Ok(())
    }

    /// Copy of the listeners registered for `key`, in registration order
    pub fn listeners(&self, key: impl Into<EventKey>) -> Result<Vec<Listener>> {
        let key = self.normalize(key.into())?;
        Ok(self.table().listeners(&key))
    }

    /// Number of listeners registered for `key`
    pub fn listener_count(&self, key: impl Into<EventKey>) -> Result<usize> {
        let key = self.normalize(key.into())?;
        Ok(self.table().entries(&key).len())
    }

    /// Keys with at least one listener
    pub fn event_keys(&self) -> Vec<EventKey> {
        self.table().keys().cloned().collect()
    }

    /// Default escalation for an emission nobody handled
    ///
    /// Raises when `key` is an error key under this emitter's key
    /// strategy; otherwise does nothing.
    pub fn raise_unhandled(&self, key: &EventKey, first: Option<&Arg>) -> Result<()> {
        if !self.inner.keys.is_error(key) {
            return Ok(());
        }
        Err(match first {
            Some(Arg::Error(error)) => EmitterError::Uncaught {
                emitter: self.name().to_string(),
                source: error.clone(),
            },
            Some(other) => EmitterError::Unspecified {
                emitter: self.name().to_string(),
                detail: other.to_string(),
            },
            None => EmitterError::Unspecified {
                emitter: self.name().to_string(),
                detail: "no error specified".to_string(),
            },
        })
    }

    pub(crate) fn normalize(&self, key: EventKey) -> Result<EventKey> {
        self.inner.keys.normalize(key)
    }

    /// Add an entry, calling `announce` with the normalized key first
    pub(crate) fn register<F>(
        &self,
        key: EventKey,
        listener: Listener,
        once: bool,
        announce: F,
    ) -> Result<Listener>
    where
        F: FnOnce(&EventKey, &Listener) -> Result<()>,
    {
        let key = self.normalize(key)?;
        announce(&key, &listener)?;

        let entry = if once {
            Entry::once(listener.clone())
        } else {
            Entry::persistent(listener.clone())
        };
        self.table().insert(key.clone(), entry);

        tracing::debug!(
            emitter = %self.name(),
            event = %key,
            listener = %listener.id(),
            once,
            "Listener registered"
        );
        Ok(listener)
    }

    pub(crate) fn announce(&self, key: &EventKey, listener: &Listener) -> Result<()> {
        self.emit(
            NEW_LISTENER,
            vec![Arg::Key(key.clone()), Arg::Listener(listener.clone())],
        )
        .map(|_| ())
    }

    /// Run every listener reached by an already-normalized key
    pub(crate) fn call_handlers(&self, key: &EventKey, args: &Payload) -> Result<bool> {
        let calls = self.snapshot(key);
        tracing::trace!(
            emitter = %self.name(),
            event = %key,
            listeners = calls.len(),
            "Emitting event"
        );

        let handled = !calls.is_empty();
        for call in calls {
            self.inner.dispatch.run(self, key, call, args.clone())?;
        }
        Ok(handled)
    }

    pub(crate) fn escalate(&self, key: &EventKey, first: Option<&Arg>) -> Result<()> {
        self.inner.dispatch.escalate(self, key, first)
    }

    /// Overwrite this emitter's entries with copies of `source`'s, key by key
    pub(crate) fn copy_from(&self, source: &EventEmitter) {
        let copied = source.table().clone();
        let mut table = self.table();
        for (key, entries) in copied.iter() {
            table.replace(key.clone(), entries);
        }
    }

    fn snapshot(&self, key: &EventKey) -> Vec<Invocable> {
        let table = self.table();
        let routes = self.inner.keys.routes(key, &table);

        routes
            .into_iter()
            .flat_map(|route| {
                table
                    .entries(&route)
                    .iter()
                    .map(|entry| {
                        if entry.is_once() {
                            Invocable::once(
                                entry.listener().clone(),
                                Arc::downgrade(&self.inner.table),
                                route.clone(),
                            )
                        } else {
                            Invocable::plain(entry.listener().clone())
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    // Table mutations cannot panic halfway, so a poisoned lock still holds a consistent table
    fn table(&self) -> MutexGuard<'_, ListenerTable> {
        self.inner.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<EventEmitter> for EventEmitter {
    fn as_ref(&self) -> &EventEmitter {
        self
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("name", &self.inner.name)
            .field("keys", &self.inner.keys)
            .field("dispatch", &self.inner.dispatch.name())
            .finish()
    }
}

/// Builder for `EventEmitter`
#[derive(Default)]
pub struct EmitterBuilder {
    config: EmitterConfig,
    keys: Option<Arc<dyn KeyStrategy>>,
    dispatch: Option<Arc<dyn DispatchStrategy>>,
}

impl EmitterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a full configuration
    pub fn config(mut self, config: EmitterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Choose a built-in key strategy
    pub fn key_mode(mut self, mode: KeyMode) -> Self {
        self.config.key_mode = mode;
        self
    }

    /// Add a name that stays flat under `KeyMode::Namespace`
    pub fn blacklist(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.config.namespace_blacklist.contains(&name) {
            self.config.namespace_blacklist.push(name);
        }
        self
    }

    /// Use a custom key strategy (overrides `key_mode`)
    pub fn keys(mut self, keys: Arc<dyn KeyStrategy>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Use a dispatch strategy other than `Inline`
    pub fn dispatch(mut self, dispatch: Arc<dyn DispatchStrategy>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn build(self) -> EventEmitter {
        let keys: Arc<dyn KeyStrategy> = match (self.keys, self.config.key_mode) {
            (Some(keys), _) => keys,
            (None, KeyMode::Flat) => Arc::new(FlatKeys),
            (None, KeyMode::Namespace) => {
                Arc::new(NamespaceKeys::new(self.config.namespace_blacklist.clone()))
            }
            (None, KeyMode::Topic) => Arc::new(TopicKeys),
        };
        let dispatch: Arc<dyn DispatchStrategy> = match self.dispatch {
            Some(dispatch) => dispatch,
            None => Arc::new(Inline),
        };
        let name = self
            .config
            .name
            .unwrap_or_else(|| format!("emitter-{}", uuid::Uuid::new_v4()));

        EventEmitter {
            inner: Arc::new(Inner {
                name,
                table: Arc::new(Mutex::new(ListenerTable::default())),
                keys,
                dispatch,
            }),
        }
    }
}
