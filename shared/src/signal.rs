//! Typed observer lists.
//!
//! A [`Signal`] owns a table of listeners keyed by [`ListenerId`]. Emitting
//! calls every listener synchronously in registration order on the emitting
//! thread. Removal is by id and reports whether the listener was still
//! registered, so callers can detect a double removal.

use std::fmt;

/// Handle returned by [`Signal::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Box<dyn FnMut(&T) + Send>;

pub struct Signal<T> {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener<T>)>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            listeners: Vec::new(),
        }
    }

    /// Registers a listener and returns the id needed to remove it.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&T) + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        match self.listeners.iter().position(|(listener_id, _)| *listener_id == id) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn emit(&mut self, value: &T) {
        for (_, listener) in &mut self.listeners {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_emit_reaches_listeners_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut signal = Signal::new();

        let first = Arc::clone(&seen);
        signal.subscribe(move |value: &u32| first.lock().unwrap().push(("first", *value)));
        let second = Arc::clone(&seen);
        signal.subscribe(move |value: &u32| second.lock().unwrap().push(("second", *value)));

        signal.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_unsubscribe_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut signal = Signal::new();

        let counter = Arc::clone(&calls);
        let id = signal.subscribe(move |_: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(&());
        assert!(signal.unsubscribe(id));
        assert!(!signal.unsubscribe(id));
        signal.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(signal.is_empty());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut signal: Signal<()> = Signal::new();
        let a = signal.subscribe(|_| {});
        signal.unsubscribe(a);
        let b = signal.subscribe(|_| {});
        assert_ne!(a, b);
        assert_eq!(signal.len(), 1);
    }
}
