//! # a3s-emitter
//!
//! Synchronous event emitter with pluggable async dispatch for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-emitter` lets callers register listeners for named events and emit
//! events to them. Emission is synchronous and ordered; what happens to a
//! listener's async work is decided by the emitter's dispatch strategy,
//! which routes late failures back into the emitter as `error` events.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_emitter::{args, EventEmitter, Listener};
//!
//! # fn example() -> a3s_emitter::Result<()> {
//! let emitter = EventEmitter::new();
//!
//! emitter.on("data", Listener::sync(|args| {
//!     println!("got {:?}", args);
//! }))?;
//!
//! let handled = emitter.emit("data", args![1, "two"])?;
//! assert!(handled);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Dispatch strategies
//!
//! - **inline**: listeners run on the emitting thread; failures propagate
//! - **deferred**: async listener results are scheduled on tokio and their failures emitted on `error`
//! - **pool**: every listener call runs on a worker thread
//! - **scope**: listeners run as tasks of a scope joined on exit
//!
//! ## Architecture
//!
//! - **EventEmitter**: listener registry and dispatcher
//! - **KeyStrategy** trait: flat, namespace, or topic key interpretation
//! - **DispatchStrategy** trait: how each listener call is run
//! - **Uplift** / **evolve**: compose or copy emitters
//! - **Evented**: types declaring listener methods for their own emitter

pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod evented;
pub mod evolve;
pub mod keys;
pub mod listener;
pub mod table;
pub mod types;
pub mod uplift;

// Re-export core types
pub use emitter::{EmitterBuilder, EventEmitter, WeakEmitter};
pub use error::{EmitterError, ListenerError, Result};
pub use evented::{Evented, HandlerSet};
pub use evolve::evolve;
pub use keys::{topic_matches, FlatKeys, KeyStrategy, NamespaceKeys, TopicKeys};
pub use listener::{Deferred, Invocable, Listener, ListenerId, ListenerResult, Outcome};
pub use table::{Entry, ListenerTable};
pub use types::{Arg, EmitterConfig, EventKey, KeyMode, Payload, PoolConfig, ERROR, FAILURE, NEW_LISTENER};
pub use uplift::{uplift, ErrorHandling, ProxyNewListener, Side, Uplift, UpliftConfig};

// Re-export dispatch strategies for convenience
pub use dispatch::deferred::{AsyncEventEmitter, DeferredAdapter, ErrorRouting, SyncFailures};
pub use dispatch::pool::{Executor, ExecutorEventEmitter, Job, PoolAdapter, ThreadPool};
pub use dispatch::scope::{ScopeAdapter, ScopeAdapterBuilder, ScopedEventEmitter, TaskScope};
pub use dispatch::{Completion, DispatchStrategy, Inline, Scheduler, TaskHandle, TokioScheduler};
