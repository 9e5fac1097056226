//! Uplift: emit through two emitters as one
//!
//! An `Uplift` wraps an existing ("underlying") emitter and a freshly
//! built ("new") one. Emitting through the composite on either side runs
//! the emitting side's listeners first, then the other side's, and
//! reports the emission handled if either side handled it. Listener
//! tables are never merged.
//!
//! Only emissions made through the composite are proxied. Failures an
//! async adapter reroutes in the background are emitted on the adapter's
//! own emitter.

use crate::emitter::EventEmitter;
use crate::error::Result;
use crate::listener::Listener;
use crate::types::{Arg, EventKey, Payload, NEW_LISTENER};
use serde::{Deserialize, Serialize};

/// One of the two emitters of an uplift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    New,
    Underlying,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Self::New => Self::Underlying,
            Self::Underlying => Self::New,
        }
    }
}

/// Which emitter decides what an unhandled emission means
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorHandling {
    /// Always escalate through the new emitter
    #[default]
    New,
    /// Always escalate through the underlying emitter
    Underlying,
    /// Escalate through whichever side was emitted on
    Neither,
}

/// Which direction `new_listener` emissions cross
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyNewListener {
    /// Underlying registrations reach new-side `new_listener` listeners
    #[default]
    Forward,
    /// New registrations reach underlying-side `new_listener` listeners
    Backward,
    Both,
    Neither,
}

/// Uplift policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpliftConfig {
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default)]
    pub proxy_new_listener: ProxyNewListener,
}

/// Composite over a new and an underlying emitter
#[derive(Debug, Clone)]
pub struct Uplift {
    new: EventEmitter,
    underlying: EventEmitter,
    config: UpliftConfig,
}

impl Uplift {
    pub fn new(new: EventEmitter, underlying: EventEmitter, config: UpliftConfig) -> Self {
        Self {
            new,
            underlying,
            config,
        }
    }

    pub fn config(&self) -> &UpliftConfig {
        &self.config
    }

    /// One side's emitter
    pub fn emitter(&self, side: Side) -> &EventEmitter {
        match side {
            Side::New => &self.new,
            Side::Underlying => &self.underlying,
        }
    }

    /// Emit on `side`, reaching both listener sets
    pub fn emit(&self, side: Side, key: impl Into<EventKey>, args: Vec<Arg>) -> Result<bool> {
        let key = key.into();
        let (origin, other) = (self.emitter(side), self.emitter(side.other()));
        let origin_key = origin.normalize(key.clone())?;
        let other_key = other.normalize(key)?;
        let args: Payload = args.into();

        let mut handled = origin.call_handlers(&origin_key, &args)?;
        if !origin_key.is(NEW_LISTENER) || self.proxies_new_listener(side) {
            handled |= other.call_handlers(&other_key, &args)?;
        }

        if !handled {
            let handler = self.error_side(side);
            let key = if handler == side { &origin_key } else { &other_key };
            self.emitter(handler).escalate(key, args.first())?;
        }
        Ok(handled)
    }

    /// Register on `side`, announcing through the composite
    pub fn on(&self, side: Side, key: impl Into<EventKey>, listener: Listener) -> Result<Listener> {
        self.add(side, key.into(), listener, false)
    }

    /// Register a once-listener on `side`, announcing through the composite
    pub fn once(&self, side: Side, key: impl Into<EventKey>, listener: Listener) -> Result<Listener> {
        self.add(side, key.into(), listener, true)
    }

    /// Dissolve the composite, returning `(new, underlying)`
    pub fn unwrap(self) -> (EventEmitter, EventEmitter) {
        tracing::debug!(
            new = %self.new.name(),
            underlying = %self.underlying.name(),
            "Uplift unwrapped"
        );
        (self.new, self.underlying)
    }

    fn add(&self, side: Side, key: EventKey, listener: Listener, once: bool) -> Result<Listener> {
        self.emitter(side).register(key, listener, once, |key, listener| {
            self.emit(
                side,
                NEW_LISTENER,
                vec![Arg::Key(key.clone()), Arg::Listener(listener.clone())],
            )
            .map(|_| ())
        })
    }

    fn proxies_new_listener(&self, side: Side) -> bool {
        use ProxyNewListener::*;
        match (self.config.proxy_new_listener, side) {
            (Both, _) => true,
            (Neither, _) => false,
            (Forward, Side::Underlying) | (Backward, Side::New) => true,
            (Forward, Side::New) | (Backward, Side::Underlying) => false,
        }
    }

    fn error_side(&self, side: Side) -> Side {
        match self.config.error_handling {
            ErrorHandling::New => Side::New,
            ErrorHandling::Underlying => Side::Underlying,
            ErrorHandling::Neither => side,
        }
    }
}

/// Pair `underlying` with a freshly built emitter
pub fn uplift<F>(underlying: EventEmitter, make_new: F, config: UpliftConfig) -> Uplift
where
    F: FnOnce() -> EventEmitter,
{
    let new = make_new();
    tracing::debug!(
        new = %new.name(),
        underlying = %underlying.name(),
        "Emitters uplifted"
    );
    Uplift::new(new, underlying, config)
}
