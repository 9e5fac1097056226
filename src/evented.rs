//! Evented objects: declare listener methods once per type
//!
//! A type lists its `(event, method)` pairs in a `HandlerSet` and wires
//! them to its own emitter after construction. Each registered listener
//! holds only a weak reference to the instance, so the instance is not
//! kept alive by its own emitter.

use crate::emitter::EventEmitter;
use crate::error::Result;
use crate::listener::{Listener, ListenerResult, Outcome};
use crate::types::{Arg, EventKey};
use std::sync::{Arc, Weak};

type Method<T> = Arc<dyn Fn(&T, &[Arg]) -> ListenerResult + Send + Sync>;

/// Declarative list of listener methods for `T`
pub struct HandlerSet<T> {
    handlers: Vec<(EventKey, Method<T>)>,
}

impl<T: Send + Sync + 'static> HandlerSet<T> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Declare `method` as a listener for `key`
    pub fn on<F>(mut self, key: impl Into<EventKey>, method: F) -> Self
    where
        F: Fn(&T, &[Arg]) -> ListenerResult + Send + Sync + 'static,
    {
        self.handlers.push((key.into(), Arc::new(method)));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Declared keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &EventKey> {
        self.handlers.iter().map(|(key, _)| key)
    }

    /// Register every method on `emitter`, bound to `target`
    ///
    /// Once `target` is dropped the listeners do nothing.
    pub fn bind(&self, target: &Arc<T>, emitter: &EventEmitter) -> Result<Vec<Listener>> {
        self.handlers
            .iter()
            .map(|(key, method)| {
                let instance: Weak<T> = Arc::downgrade(target);
                let method = method.clone();
                let listener = Listener::new(move |args| match instance.upgrade() {
                    Some(instance) => method(&instance, args),
                    None => Ok(Outcome::Plain),
                });
                emitter.on(key.clone(), listener)
            })
            .collect()
    }
}

impl<T: Send + Sync + 'static> Default for HandlerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A type that owns an emitter and declares listener methods for it
pub trait Evented: Send + Sync + Sized + 'static {
    /// The type's listener methods
    fn handlers() -> HandlerSet<Self>;

    /// The emitter the methods are registered on
    fn event_emitter(&self) -> &EventEmitter;

    /// Register every declared method on this instance's emitter
    fn wire(self: &Arc<Self>) -> Result<Vec<Listener>> {
        Self::handlers().bind(self, self.event_emitter())
    }
}
