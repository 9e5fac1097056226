//! Synchronous emitter integration tests
//!
//! End-to-end tests of the registry and dispatcher through the public
//! API. Covers ordering, once-semantics, error escalation, new_listener,
//! namespace and topic keys, evolve, and concurrent emission.

use a3s_emitter::{
    args, evolve, Arg, EmitterError, EventEmitter, EventKey, KeyMode, Listener, ListenerError,
    ERROR, NEW_LISTENER,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Calls = Arc<Mutex<Vec<(String, Vec<Arg>)>>>;

fn recording(calls: &Calls, tag: &str) -> Listener {
    let calls = calls.clone();
    let tag = tag.to_string();
    Listener::sync(move |args| calls.lock().unwrap().push((tag.clone(), args.to_vec())))
}

fn tags(calls: &Calls) -> Vec<String> {
    calls.lock().unwrap().iter().map(|(tag, _)| tag.clone()).collect()
}

// ─── Registration & Ordering ─────────────────────────────────────

#[test]
fn test_emit_invokes_listener_with_payload() {
    let ee = EventEmitter::new();
    let calls = Calls::default();
    ee.on("x", recording(&calls, "a")).unwrap();

    assert!(ee.emit("x", args![1, 2]).unwrap());
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, args![1, 2]);
}

#[test]
fn test_listeners_in_registration_order() {
    let ee = EventEmitter::new();
    let calls = Calls::default();
    let listeners: Vec<Listener> = ["a", "b", "c"]
        .iter()
        .map(|tag| ee.on("x", recording(&calls, tag)).unwrap())
        .collect();

    assert_eq!(ee.listeners("x").unwrap(), listeners);
    ee.emit("x", args![]).unwrap();
    assert_eq!(tags(&calls), vec!["a", "b", "c"]);
}

#[test]
fn test_mutating_listener_copy_has_no_effect() {
    let ee = EventEmitter::new();
    let calls = Calls::default();
    ee.on("x", recording(&calls, "a")).unwrap();

    let mut copy = ee.listeners("x").unwrap();
    copy.clear();
    copy.push(Listener::sync(|_| {}));

    ee.emit("x", args![]).unwrap();
    assert_eq!(tags(&calls), vec!["a"]);
    assert_eq!(ee.listener_count("x").unwrap(), 1);
}

#[test]
fn test_emit_returns_false_without_listeners() {
    let ee = EventEmitter::new();
    assert!(!ee.emit("nothing", args![1]).unwrap());

    let listener = ee.on("x", Listener::sync(|_| {})).unwrap();
    assert!(ee.emit("x", args![]).unwrap());
    ee.remove_listener("x", &listener).unwrap();
    assert!(!ee.emit("x", args![]).unwrap());
}

// ─── Once Semantics ──────────────────────────────────────────────

#[test]
fn test_once_with_reentrant_emit() {
    let ee = EventEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));

    let (inner, counter) = (ee.clone(), count.clone());
    ee.once(
        "x",
        Listener::fallible(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.emit("x", args![])?;
            Ok(())
        }),
    )
    .unwrap();

    assert!(ee.emit("x", args![]).unwrap());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(ee.listeners("x").unwrap().is_empty());
}

#[test]
fn test_once_under_concurrent_emission() {
    let ee = EventEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    ee.once(
        "x",
        Listener::sync(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .unwrap();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let ee = ee.clone();
            std::thread::spawn(move || ee.emit("x", args![]).unwrap())
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_self_removal_mid_emission() {
    let ee = EventEmitter::new();
    let calls = Calls::default();

    let slot: Arc<Mutex<Option<Listener>>> = Arc::default();
    let (inner, me, log) = (ee.clone(), slot.clone(), calls.clone());
    let remover = Listener::fallible(move |_| {
        log.lock().unwrap().push(("remover".to_string(), Vec::new()));
        if let Some(me) = me.lock().unwrap().as_ref() {
            inner.remove_listener("x", me)?;
        }
        Ok(())
    });
    *slot.lock().unwrap() = Some(remover.clone());

    ee.on("x", remover).unwrap();
    ee.on("x", recording(&calls, "after")).unwrap();

    ee.emit("x", args![]).unwrap();
    ee.emit("x", args![]).unwrap();
    assert_eq!(tags(&calls), vec!["remover", "after", "after"]);
}

// ─── Error Escalation ────────────────────────────────────────────

#[test]
fn test_error_without_listener_or_payload() {
    let ee = EventEmitter::new();
    let err = ee.emit(ERROR, args![]).unwrap_err();
    assert!(matches!(err, EmitterError::Unspecified { .. }));
    assert!(err.to_string().contains("no error specified"));
}

#[test]
fn test_error_without_listener_raises_payload() {
    let ee = EventEmitter::new();
    let payload = ListenerError::msg("disk full");
    match ee.emit(ERROR, args![payload.clone()]) {
        Err(EmitterError::Uncaught { source, .. }) => {
            assert!(ListenerError::ptr_eq(&source, &payload))
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_error_listener_receives_payload() {
    let ee = EventEmitter::new();
    let calls = Calls::default();
    ee.on(ERROR, recording(&calls, "error")).unwrap();

    let payload = ListenerError::msg("disk full");
    assert!(ee.emit(ERROR, args![payload.clone()]).unwrap());
    assert_eq!(calls.lock().unwrap()[0].1, args![payload]);
}

#[test]
fn test_sync_listener_failure_propagates() {
    let ee = EventEmitter::new();
    ee.on("x", Listener::fallible(|_| Err("bad input".into()))).unwrap();
    let err = ee.emit("x", args![]).unwrap_err();
    assert_eq!(err.to_string(), "Listener for event 'x' failed: bad input");
}

// ─── new_listener ────────────────────────────────────────────────

#[test]
fn test_new_listener_fires_once_per_registration() {
    let ee = EventEmitter::new();
    let calls = Calls::default();
    ee.on(NEW_LISTENER, recording(&calls, "new")).unwrap();
    assert!(calls.lock().unwrap().is_empty());

    let a = ee.on("a", Listener::sync(|_| {})).unwrap();
    let b = ee.once("b", Listener::sync(|_| {})).unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, vec![Arg::Key(EventKey::from("a")), Arg::Listener(a)]);
    assert_eq!(calls[1].1, vec![Arg::Key(EventKey::from("b")), Arg::Listener(b)]);
}

#[test]
fn test_new_listener_failure_blocks_registration() {
    let ee = EventEmitter::new();
    ee.on(NEW_LISTENER, Listener::fallible(|_| Err("closed".into()))).unwrap();

    assert!(ee.on("x", Listener::sync(|_| {})).is_err());
    assert!(ee.listeners("x").unwrap().is_empty());
}

// ─── Key Strategies ──────────────────────────────────────────────

#[test]
fn test_namespace_emit_reaches_prefixes() {
    let ee = EventEmitter::builder().key_mode(KeyMode::Namespace).build();
    let calls = Calls::default();
    ee.on("event", recording(&calls, "event")).unwrap();
    ee.on(["event", "level"], recording(&calls, "event.level")).unwrap();
    ee.on(["event", "level", "deep"], recording(&calls, "deep")).unwrap();
    ee.on(["other"], recording(&calls, "other")).unwrap();

    assert!(ee.emit(["event", "level"], args![]).unwrap());
    assert_eq!(tags(&calls), vec!["event", "event.level"]);
}

#[test]
fn test_namespace_error_escalation() {
    let ee = EventEmitter::builder().key_mode(KeyMode::Namespace).build();
    assert!(matches!(
        ee.emit(["error", "disk"], args![ListenerError::msg("full")]),
        Err(EmitterError::Uncaught { .. })
    ));

    let calls = Calls::default();
    ee.on(ERROR, recording(&calls, "error")).unwrap();
    assert!(ee.emit(["error", "disk"], args![ListenerError::msg("full")]).unwrap());
}

#[test]
fn test_namespace_blacklist() {
    let ee = EventEmitter::builder().key_mode(KeyMode::Namespace).build();
    assert!(matches!(
        ee.on([NEW_LISTENER, "x"], Listener::sync(|_| {})),
        Err(EmitterError::BlacklistedNamespace(_))
    ));
    assert!(matches!(
        ee.emit(EventKey::path(Vec::<String>::new()), args![]),
        Err(EmitterError::InvalidKey(_))
    ));
}

#[test]
fn test_topic_patterns() {
    let ee = EventEmitter::builder().key_mode(KeyMode::Topic).build();
    let calls = Calls::default();
    ee.on("orders/#", recording(&calls, "all orders")).unwrap();
    ee.on("orders/#/paid", recording(&calls, "paid")).unwrap();
    ee.on("users/#", recording(&calls, "users")).unwrap();

    assert!(ee.emit("orders/42/paid", args![]).unwrap());
    assert_eq!(tags(&calls), vec!["all orders", "paid"]);
    assert!(!ee.emit("inventory/1", args![]).unwrap());
}

#[test]
fn test_topic_dispatch_follows_registration_order() {
    let ee = EventEmitter::builder().key_mode(KeyMode::Topic).build();
    let calls = Calls::default();
    ee.on("z/#", recording(&calls, "z")).unwrap();
    ee.on("#", recording(&calls, "everything")).unwrap();

    assert!(ee.emit("z/1", args![]).unwrap());
    assert_eq!(tags(&calls), vec!["z", "everything"]);
}

// ─── Evolve ──────────────────────────────────────────────────────

#[test]
fn test_evolve_round_trip() {
    let source = EventEmitter::new();
    let calls = Calls::default();
    source.on("x", recording(&calls, "a")).unwrap();
    source.once("x", recording(&calls, "b")).unwrap();
    source.on("y", recording(&calls, "c")).unwrap();

    let target = evolve(&source, EventEmitter::new);
    for key in source.event_keys() {
        assert_eq!(target.listeners(key.clone()).unwrap(), source.listeners(key).unwrap());
    }

    source.remove_all_listeners(None).unwrap();
    assert_eq!(target.event_keys().len(), 2);
    target.emit("x", args![]).unwrap();
    assert_eq!(tags(&calls), vec!["a", "b"]);
}

// ─── Concurrency ─────────────────────────────────────────────────

#[test]
fn test_concurrent_registration_and_emission() {
    let ee = EventEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let (ee, count) = (ee.clone(), count.clone());
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let counter = count.clone();
                    let listener = ee
                        .on(
                            "tick",
                            Listener::sync(move |_| {
                                counter.fetch_add(1, Ordering::SeqCst);
                            }),
                        )
                        .unwrap();
                    ee.emit("tick", args![]).unwrap();
                    ee.remove_listener("tick", &listener).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert!(count.load(Ordering::SeqCst) >= 200);
    assert!(ee.listeners("tick").unwrap().is_empty());
}
