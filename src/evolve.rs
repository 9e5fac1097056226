//! Evolve: carry an emitter's listeners over to a new emitter

use crate::emitter::EventEmitter;

/// Build a new emitter with `make` and copy every listener of `source` into it
///
/// Each key's entries are copied in order, once-listeners included. The
/// two emitters share no table state afterwards. `make` may return any
/// emitter flavor, e.g. an `AsyncEventEmitter`.
pub fn evolve<E, F>(source: &EventEmitter, make: F) -> E
where
    E: AsRef<EventEmitter>,
    F: FnOnce() -> E,
{
    let target = make();
    target.as_ref().copy_from(source);
    tracing::debug!(
        source = %source.name(),
        target = %target.as_ref().name(),
        events = source.event_keys().len(),
        "Emitter evolved"
    );
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::listener::Listener;
    use crate::types::KeyMode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_evolve_copies_listeners_in_order() {
        let source = EventEmitter::new();
        let (a, b) = (Listener::sync(|_| {}), Listener::sync(|_| {}));
        source.on("x", a.clone()).unwrap();
        source.on("x", b.clone()).unwrap();
        source.on("y", a.clone()).unwrap();

        let target = evolve(&source, EventEmitter::new);
        assert_eq!(target.listeners("x").unwrap(), vec![a.clone(), b]);
        assert_eq!(target.listeners("y").unwrap(), vec![a]);
        assert_eq!(target.event_keys(), source.event_keys());
    }

    #[test]
    fn test_evolved_emitters_are_independent() {
        let source = EventEmitter::new();
        let listener = Listener::sync(|_| {});
        source.on("x", listener.clone()).unwrap();

        let target = evolve(&source, EventEmitter::new);
        target.remove_listener("x", &listener).unwrap();
        target.on("z", Listener::sync(|_| {})).unwrap();

        assert_eq!(source.listeners("x").unwrap(), vec![listener]);
        assert!(source.listeners("z").unwrap().is_empty());
    }

    #[test]
    fn test_once_listener_fires_once_per_emitter() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let source = EventEmitter::new();
        source
            .once(
                "x",
                Listener::sync(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let target = evolve(&source, EventEmitter::new);
        assert!(target.emit("x", args![]).unwrap());
        assert!(!target.emit("x", args![]).unwrap());
        assert!(source.emit("x", args![]).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_evolve_into_other_flavor() {
        let source = EventEmitter::builder().key_mode(KeyMode::Namespace).build();
        source.on("event", Listener::sync(|_| {})).unwrap();

        let target = evolve(&source, || {
            EventEmitter::builder().key_mode(KeyMode::Namespace).name("evolved").build()
        });
        assert_eq!(target.name(), "evolved");
        assert!(target.emit(["event", "sub"], args![]).unwrap());
    }
}
