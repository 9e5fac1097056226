//! Key transformation strategies
//!
//! A `KeyStrategy` decides how user-supplied keys are normalized before
//! they touch the table, which table keys an emission reaches, and when
//! an unhandled emission counts as an `error` event.

use crate::error::{EmitterError, Result};
use crate::table::ListenerTable;
use crate::types::{EventKey, ERROR, NEW_LISTENER};
use std::fmt;

/// Pluggable key interpretation for an emitter
pub trait KeyStrategy: Send + Sync + fmt::Debug {
    /// Normalize a user-supplied key into table form
    fn normalize(&self, key: EventKey) -> Result<EventKey>;

    /// Table keys reached by emitting `key`, in dispatch order
    fn routes(&self, key: &EventKey, table: &ListenerTable) -> Vec<EventKey>;

    /// Whether an unhandled emission of `key` must escalate as an error
    fn is_error(&self, key: &EventKey) -> bool {
        key.is(ERROR)
    }
}

/// Keys match exactly
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatKeys;

impl KeyStrategy for FlatKeys {
    fn normalize(&self, key: EventKey) -> Result<EventKey> {
        Ok(key)
    }

    fn routes(&self, key: &EventKey, _table: &ListenerTable) -> Vec<EventKey> {
        vec![key.clone()]
    }
}

/// Hierarchical keys: emitting `(a, b, c)` reaches `(a)`, `(a, b)` and `(a, b, c)`
#[derive(Debug, Clone)]
pub struct NamespaceKeys {
    blacklist: Vec<String>,
}

impl NamespaceKeys {
    /// Create a namespace strategy; `new_listener` is always blacklisted
    pub fn new<I, S>(blacklist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names = vec![NEW_LISTENER.to_string()];
        for name in blacklist {
            let name = name.into();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Self { blacklist: names }
    }

    /// Names that can only be used as flat events
    pub fn blacklist(&self) -> &[String] {
        &self.blacklist
    }

    fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.iter().any(|b| b == name)
    }
}

impl Default for NamespaceKeys {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl KeyStrategy for NamespaceKeys {
    fn normalize(&self, key: EventKey) -> Result<EventKey> {
        match key {
            EventKey::Path(segments) => {
                let Some(head) = segments.first() else {
                    return Err(EmitterError::InvalidKey(
                        "namespace paths must have at least one segment".to_string(),
                    ));
                };
                if self.is_blacklisted(head) {
                    return Err(EmitterError::BlacklistedNamespace(head.clone()));
                }
                Ok(EventKey::Path(segments))
            }
            EventKey::Name(name) if self.is_blacklisted(&name) => Ok(EventKey::Name(name)),
            EventKey::Name(name) => Ok(EventKey::Path(vec![name])),
        }
    }

    fn routes(&self, key: &EventKey, _table: &ListenerTable) -> Vec<EventKey> {
        match key {
            EventKey::Path(segments) => (1..=segments.len())
                .map(|n| EventKey::Path(segments[..n].to_vec()))
                .collect(),
            EventKey::Name(_) => vec![key.clone()],
        }
    }

    fn is_error(&self, key: &EventKey) -> bool {
        key.head() == Some(ERROR)
    }
}

/// `/`-separated topics with `#` wildcard segments
///
/// Emitting a topic reaches every registered pattern that matches it,
/// in the order the patterns were first registered.
/// The special `error` and `new_listener` keys only match exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicKeys;

impl KeyStrategy for TopicKeys {
    fn normalize(&self, key: EventKey) -> Result<EventKey> {
        match key {
            EventKey::Name(name) if name.is_empty() => {
                Err(EmitterError::InvalidKey("topics cannot be empty".to_string()))
            }
            EventKey::Name(name) => Ok(EventKey::Name(name)),
            EventKey::Path(segments) => {
                if segments.is_empty() {
                    return Err(EmitterError::InvalidKey(
                        "topics cannot be empty".to_string(),
                    ));
                }
                Ok(EventKey::Name(segments.join("/")))
            }
        }
    }

    fn routes(&self, key: &EventKey, table: &ListenerTable) -> Vec<EventKey> {
        let Some(topic) = key.as_name() else {
            return vec![key.clone()];
        };
        if topic == ERROR || topic == NEW_LISTENER {
            return vec![key.clone()];
        }
        table
            .keys()
            .filter(|k| match k.as_name() {
                Some(pattern) if pattern == ERROR || pattern == NEW_LISTENER => false,
                Some(pattern) => topic_matches(pattern, topic),
                None => false,
            })
            .cloned()
            .collect()
    }
}

/// Match a topic against a pattern
///
/// A `#` segment matches exactly one topic segment; a trailing `#`
/// matches one or more remaining segments.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('/').collect();
    let topic: Vec<&str> = topic.split('/').collect();

    for (i, part) in pattern.iter().enumerate() {
        let last = i + 1 == pattern.len();
        match topic.get(i) {
            None => return false,
            Some(_) if *part == "#" && last => return true,
            Some(_) if *part == "#" => continue,
            Some(segment) if segment != part => return false,
            Some(_) => {}
        }
    }
    pattern.len() == topic.len()
}
