//! Async dispatch integration tests
//!
//! End-to-end tests of the deferred, worker-pool, and task-scope
//! strategies, plus uplift across emitter flavors.

use a3s_emitter::{
    args, uplift, Arg, AsyncEventEmitter, DispatchStrategy, EmitterError, ErrorHandling,
    EventEmitter, EventKey, ExecutorEventEmitter, Inline, Invocable, Listener, ListenerError,
    Payload, PoolConfig, Result, ScopedEventEmitter, Side, UpliftConfig, ERROR, FAILURE,
};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn error_log(ee: &EventEmitter, key: &str) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ee.on(
        key,
        Listener::sync(move |args| {
            let message = args.first().map(Arg::to_string).unwrap_or_default();
            sink.lock().unwrap().push(message);
        }),
    )
    .unwrap();
    seen
}

// ─── Deferred Adapter ────────────────────────────────────────────

#[tokio::test]
async fn test_deferred_failure_reaches_error_listener() {
    let ee = AsyncEventEmitter::new();
    let errors = error_log(&ee, ERROR);
    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));

    ee.on(
        "event",
        Listener::deferred(move |_| {
            let gate = gate.lock().unwrap().take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Err(ListenerError::msg("listener failed"))
            }
        }),
    )
    .unwrap();

    assert!(ee.emit("event", args![]).unwrap());
    assert_eq!(ee.pending(), 1);
    assert!(errors.lock().unwrap().is_empty());

    release.send(()).unwrap();
    ee.wait_idle().await;
    assert_eq!(*errors.lock().unwrap(), vec!["listener failed".to_string()]);
}

#[tokio::test]
async fn test_two_stage_failure_sink() {
    let ee = AsyncEventEmitter::two_stage();
    let failures = error_log(&ee, FAILURE);
    ee.on(
        "event",
        Listener::deferred(|_| async { Err(ListenerError::msg("deferred")) }),
    )
    .unwrap();

    ee.emit("event", args![]).unwrap();
    ee.wait_idle().await;
    assert_eq!(*failures.lock().unwrap(), vec!["deferred".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deferred_on_multi_thread_runtime() {
    let ee = AsyncEventEmitter::new();
    let errors = error_log(&ee, ERROR);
    for i in 0..10 {
        ee.on(
            "event",
            Listener::deferred(move |_| async move {
                tokio::time::sleep(Duration::from_millis(i)).await;
                if i % 2 == 0 {
                    Err(ListenerError::msg(format!("failed {}", i)))
                } else {
                    Ok(())
                }
            }),
        )
        .unwrap();
    }

    ee.emit("event", args![]).unwrap();
    ee.wait_idle().await;
    assert_eq!(errors.lock().unwrap().len(), 5);
    assert_eq!(ee.pending(), 0);
}

// ─── Worker Pool ─────────────────────────────────────────────────

#[test]
fn test_executor_sync_failure_reaches_error_listener() {
    let ee = ExecutorEventEmitter::with_config(PoolConfig {
        workers: 2,
        ..PoolConfig::default()
    })
    .unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    ee.on(
        ERROR,
        Listener::sync(move |args| {
            tx.lock().unwrap().send(args[0].to_string()).unwrap();
        }),
    )
    .unwrap();
    ee.on("event", Listener::fallible(|_| Err("listener failed".into())))
        .unwrap();

    assert!(ee.emit("event", args![]).unwrap());
    let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(message, "listener failed");
    ee.shutdown(true);
}

#[test]
fn test_executor_emit_does_not_block() {
    let ee = ExecutorEventEmitter::new().unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    ee.on(
        "slow",
        Listener::sync(move |_| {
            std::thread::sleep(Duration::from_millis(50));
            tx.lock().unwrap().send(()).unwrap();
        }),
    )
    .unwrap();

    ee.emit("slow", args![]).unwrap();
    assert!(rx.try_recv().is_err(), "listener still running");
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    ee.shutdown(true);
}

// ─── Task Scope ──────────────────────────────────────────────────

#[tokio::test]
async fn test_scope_failure_routed_and_joined() {
    let ee = ScopedEventEmitter::new();
    let errors = error_log(&ee, ERROR);
    ee.on(
        "event",
        Listener::deferred(|_| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(ListenerError::msg("scoped"))
        }),
    )
    .unwrap();

    let handled = ee.run(async { ee.emit("event", args![]) }).await.unwrap();
    assert!(handled.unwrap());
    assert_eq!(*errors.lock().unwrap(), vec!["scoped".to_string()]);
}

#[tokio::test]
async fn test_scope_uncaught_failure_from_exit() {
    let ee = ScopedEventEmitter::new();
    ee.on("event", Listener::deferred(|_| async { Err(ListenerError::msg("lost")) }))
        .unwrap();

    let result = ee.run(async { ee.emit("event", args![]).unwrap() }).await;
    assert!(matches!(result, Err(EmitterError::Uncaught { .. })));
}

// ─── Uplift ──────────────────────────────────────────────────────

/// Inline dispatch that records which emitter escalated
struct Escalations {
    tag: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl DispatchStrategy for Escalations {
    fn name(&self) -> &str {
        "recording"
    }

    fn run(&self, emitter: &EventEmitter, event: &EventKey, call: Invocable, args: Payload) -> Result<()> {
        Inline.run(emitter, event, call, args)
    }

    fn escalate(&self, emitter: &EventEmitter, event: &EventKey, first: Option<&Arg>) -> Result<()> {
        if event.is(ERROR) {
            self.log.lock().unwrap().push(self.tag);
        }
        emitter.raise_unhandled(event, first)
    }
}

fn recording_emitter(tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> EventEmitter {
    EventEmitter::builder()
        .name(tag)
        .dispatch(Arc::new(Escalations {
            tag,
            log: log.clone(),
        }))
        .build()
}

#[test]
fn test_uplift_error_handling_new() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let underlying = recording_emitter("underlying", &log);
    let up = uplift(
        underlying,
        || recording_emitter("new", &log),
        UpliftConfig::default(),
    );

    for side in [Side::Underlying, Side::New] {
        match up.emit(side, ERROR, args![ListenerError::msg("boom")]) {
            Err(EmitterError::Uncaught { emitter, .. }) => assert_eq!(emitter, "new"),
            other => panic!("unexpected: {:?}", other),
        }
    }
    assert_eq!(*log.lock().unwrap(), vec!["new", "new"]);
}

#[test]
fn test_uplift_error_handling_neither() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let up = uplift(
        recording_emitter("underlying", &log),
        || recording_emitter("new", &log),
        UpliftConfig {
            error_handling: ErrorHandling::Neither,
            ..UpliftConfig::default()
        },
    );

    let _ = up.emit(Side::Underlying, ERROR, args![]);
    let _ = up.emit(Side::New, ERROR, args![]);
    assert_eq!(*log.lock().unwrap(), vec!["underlying", "new"]);
}

#[tokio::test]
async fn test_uplift_over_async_emitter() {
    let underlying = AsyncEventEmitter::new();
    let up = uplift(underlying.emitter().clone(), EventEmitter::new, UpliftConfig::default());
    let errors = error_log(up.emitter(Side::New), ERROR);

    up.on(
        Side::Underlying,
        "event",
        Listener::fallible(|_| Err("sync".into())),
    )
    .unwrap();

    // The adapter reroutes to its own emitter, where nothing listens for error
    assert!(matches!(
        up.emit(Side::New, "event", args![]),
        Err(EmitterError::Uncaught { .. })
    ));
    assert!(errors.lock().unwrap().is_empty());

    // Errors emitted through the composite reach the new side's listener
    assert!(up.emit(Side::Underlying, ERROR, args![ListenerError::msg("x")]).unwrap());
    assert_eq!(*errors.lock().unwrap(), vec!["x".to_string()]);
}
