//! Listener table: ordered listener entries per event key
//!
//! The table itself is plain data; the owning emitter guards it with a
//! mutex and only ever hands out copies. Keys keep the order in which
//! they were first registered.

use crate::listener::{Listener, ListenerId};
use crate::types::EventKey;
use indexmap::IndexMap;

/// One registration: the listener and whether it fires only once
#[derive(Debug, Clone)]
pub struct Entry {
    listener: Listener,
    once: bool,
}

impl Entry {
    /// A listener that stays registered until removed
    pub fn persistent(listener: Listener) -> Self {
        Self {
            listener,
            once: false,
        }
    }

    /// A listener that removes itself before its first invocation
    pub fn once(listener: Listener) -> Self {
        Self {
            listener,
            once: true,
        }
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn is_once(&self) -> bool {
        self.once
    }
}

/// Mapping from event key to entries in registration order
#[derive(Debug, Clone, Default)]
pub struct ListenerTable {
    events: IndexMap<EventKey, Vec<Entry>>,
}

impl ListenerTable {
    /// Add an entry at the end of the key's sequence
    ///
    /// A listener that is already registered under `key` keeps its
    /// position; only its entry is replaced.
    pub fn insert(&mut self, key: EventKey, entry: Entry) {
        let entries = self.events.entry(key).or_default();
        match entries
            .iter_mut()
            .find(|e| e.listener.id() == entry.listener.id())
        {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    /// Remove a listener's entry, returning it if it was present
    pub fn remove(&mut self, key: &EventKey, id: ListenerId) -> Option<Entry> {
        let entries = self.events.get_mut(key)?;
        let index = entries.iter().position(|e| e.listener.id() == id)?;
        let entry = entries.remove(index);
        if entries.is_empty() {
            self.events.shift_remove(key);
        }
        Some(entry)
    }

    /// Whether `id` is registered under `key`
    pub fn contains(&self, key: &EventKey, id: ListenerId) -> bool {
        self.entries(key).iter().any(|e| e.listener.id() == id)
    }

    /// Drop every entry for one key
    pub fn clear(&mut self, key: &EventKey) {
        self.events.shift_remove(key);
    }

    /// Drop every entry for every key
    pub fn clear_all(&mut self) {
        self.events.clear();
    }

    /// Entries for a key in registration order
    pub fn entries(&self, key: &EventKey) -> &[Entry] {
        self.events.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Copy of the listeners registered for a key
    pub fn listeners(&self, key: &EventKey) -> Vec<Listener> {
        self.entries(key).iter().map(|e| e.listener.clone()).collect()
    }

    /// Keys with at least one entry, in first-registration order
    pub fn keys(&self) -> impl Iterator<Item = &EventKey> {
        self.events.keys()
    }

    /// Replace one key's sequence with a copy of `entries`
    pub fn replace(&mut self, key: EventKey, entries: &[Entry]) {
        if entries.is_empty() {
            self.events.shift_remove(&key);
        } else {
            self.events.insert(key, entries.to_vec());
        }
    }

    /// Iterate over every key with its entries
    pub fn iter(&self) -> impl Iterator<Item = (&EventKey, &[Entry])> {
        self.events.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total number of entries across keys
    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }
}
