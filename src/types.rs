//! Core value types for the a3s-emitter system
//!
//! Configuration types use camelCase JSON serialization, matching the
//! rest of the A3S configuration surface.

use crate::error::ListenerError;
use crate::listener::Listener;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Fired on every registration, before the listener is added
pub const NEW_LISTENER: &str = "new_listener";

/// Sink for unhandled failures
pub const ERROR: &str = "error";

/// Intermediate sink used by two-stage adapters before `error`
pub const FAILURE: &str = "failure";

/// Identifier under which listeners are grouped
///
/// Flat emitters use names. Namespace-aware emitters use ordered paths,
/// where emitting `(a, b)` also reaches listeners of `(a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKey {
    /// A single flat name (e.g., "data", "orders/created")
    Name(String),
    /// A hierarchical namespace path (e.g., ["orders", "created"])
    Path(Vec<String>),
}

impl EventKey {
    /// Build a namespace path key
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Path(segments.into_iter().map(Into::into).collect())
    }

    /// The flat name, if this is a name key
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Path(_) => None,
        }
    }

    /// First segment of a path, or the name itself
    pub fn head(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Path(segments) => segments.first().map(String::as_str),
        }
    }

    /// Whether this key is exactly the flat name `name`
    pub fn is(&self, name: &str) -> bool {
        self.as_name() == Some(name)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Path(segments) => write!(f, "({})", segments.join(", ")),
        }
    }
}

impl From<&str> for EventKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for EventKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&String> for EventKey {
    fn from(name: &String) -> Self {
        Self::Name(name.clone())
    }
}

impl From<Vec<String>> for EventKey {
    fn from(segments: Vec<String>) -> Self {
        Self::Path(segments)
    }
}

impl From<Vec<&str>> for EventKey {
    fn from(segments: Vec<&str>) -> Self {
        Self::path(segments)
    }
}

impl<const N: usize> From<[&str; N]> for EventKey {
    fn from(segments: [&str; N]) -> Self {
        Self::path(segments)
    }
}

impl From<&EventKey> for EventKey {
    fn from(key: &EventKey) -> Self {
        key.clone()
    }
}

/// A single argument carried by an emission
#[derive(Clone)]
pub enum Arg {
    /// Arbitrary JSON data
    Value(serde_json::Value),
    /// A failure, as carried by `error` and `failure` events
    Error(ListenerError),
    /// An event key, as carried by `new_listener`
    Key(EventKey),
    /// A listener, as carried by `new_listener`
    Listener(Listener),
}

impl Arg {
    /// The JSON value, if this is a value argument
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The failure, if this is an error argument
    pub fn as_error(&self) -> Option<&ListenerError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    /// The event key, if this is a key argument
    pub fn as_key(&self) -> Option<&EventKey> {
        match self {
            Self::Key(key) => Some(key),
            _ => None,
        }
    }

    /// The listener, if this is a listener argument
    pub fn as_listener(&self) -> Option<&Listener> {
        match self {
            Self::Listener(listener) => Some(listener),
            _ => None,
        }
    }

    /// Shorthand for a JSON integer argument
    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(serde_json::Value::as_i64)
    }

    /// Shorthand for a JSON string argument
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(serde_json::Value::as_str)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Self::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Self::Listener(listener) => f.debug_tuple("Listener").field(&listener.id()).finish(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{}", value),
            Self::Error(error) => write!(f, "{}", error),
            Self::Key(key) => write!(f, "{}", key),
            Self::Listener(listener) => write!(f, "{}", listener.id()),
        }
    }
}

impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => ListenerError::ptr_eq(a, b),
            (Self::Key(a), Self::Key(b)) => a == b,
            (Self::Listener(a), Self::Listener(b)) => a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Arg {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl From<ListenerError> for Arg {
    fn from(error: ListenerError) -> Self {
        Self::Error(error)
    }
}

impl From<Listener> for Arg {
    fn from(listener: Listener) -> Self {
        Self::Listener(listener)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Value(value.into())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Value(value.into())
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Value(value.into())
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Self::Value(value.into())
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self::Value(value.into())
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Self::Value(value.into())
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Self::Value(value.into())
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Self::Value(value.into())
    }
}

/// Arguments of one emission, shared by every listener it reaches
pub type Payload = Arc<[Arg]>;

/// How event keys are interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyMode {
    /// Keys are matched exactly
    #[default]
    Flat,
    /// Keys are paths; emitting a path reaches every prefix
    Namespace,
    /// Keys are `/`-separated topics; listeners may register `#` patterns
    Topic,
}

/// Emitter construction options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitterConfig {
    /// Name used in logs and uncaught-error values (generated when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Key interpretation
    #[serde(default)]
    pub key_mode: KeyMode,

    /// Names that stay flat under `KeyMode::Namespace`
    ///
    /// `new_listener` is always blacklisted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_blacklist: Vec<String>,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            name: None,
            key_mode: KeyMode::Flat,
            namespace_blacklist: Vec::new(),
        }
    }
}

/// Worker pool options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Maximum number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Thread name prefix
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            thread_name: default_thread_name(),
        }
    }
}

fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(32)
}

fn default_thread_name() -> String {
    "a3s-emitter-worker".to_string()
}

/// Build a `Vec<Arg>` from heterogeneous values
///
/// ```
/// use a3s_emitter::{args, Arg};
///
/// let payload = args![1, "two", true];
/// assert_eq!(payload[1], Arg::from("two"));
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),+]
    };
}
