//! Subscriber sets with isolated delivery.
//!
//! Each registration returns a [`Subscription`]. A handler that panics is
//! caught and logged; the remaining handlers still run.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::error;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;
type HandlerMap<T> = Mutex<BTreeMap<u64, Handler<T>>>;

/// An ordered set of handlers for one kind of event.
pub struct HandlerSet<T> {
    label: &'static str,
    next_id: AtomicU64,
    handlers: Arc<HandlerMap<T>>,
}

impl<T: 'static> HandlerSet<T> {
    /// Create an empty set. `label` names the set in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            next_id: AtomicU64::new(0),
            handlers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Register a handler. Handlers run in registration order.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(handler));

        let weak: Weak<HandlerMap<T>> = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(handlers) = weak.upgrade() {
                handlers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
            }
        })
    }

    /// Deliver `value` to every handler. Returns how many handlers panicked.
    pub fn emit(&self, value: &T) -> usize {
        // Snapshot so handlers may (un)subscribe while being called.
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut failures = 0;
        for handler in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(value))) {
                failures += 1;
                error!(
                    handlers = self.label,
                    reason = panic_message(&*panic),
                    "Subscriber panicked; continuing with remaining handlers"
                );
            }
        }
        failures
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by every `on_*` registration.
///
/// Call [`Subscription::unsubscribe`] to remove the handler, or
/// [`Subscription::detach`] to keep it for the lifetime of its owner.
/// Dropping the handle leaves the handler registered.
#[must_use = "keep the subscription to unsubscribe later, or call `detach()`"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            unsubscribe: Some(Box::new(f)),
        }
    }

    /// Remove the handler. No-op if its owner is already gone.
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }

    /// Give up the ability to unsubscribe. The handler stays registered.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_in_order() {
        let set = HandlerSet::<u32>::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3u32 {
            let seen = seen.clone();
            set.subscribe(move |v: &u32| seen.lock().unwrap().push((tag, *v)))
                .detach();
        }
        assert_eq!(set.emit(&7), 0);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_unsubscribe_removes_handler() {
        let set = HandlerSet::<u32>::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = set.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        set.emit(&1);
        sub.unsubscribe();
        set.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_detached_handler_stays_registered() {
        let set = HandlerSet::<u32>::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        set.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

        assert_eq!(set.len(), 1);
        set.emit(&1);
        set.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let set = HandlerSet::<String>::new("test");
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        let _a = set.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let _b = set.subscribe(|_| panic!("handler exploded"));
        let c2 = count.clone();
        let _c = set.subscribe(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        let failures = set.emit(&"hello".to_string());
        assert_eq!(failures, 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Still delivers on the next emit too.
        set.emit(&"again".to_string());
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unsubscribe_after_owner_dropped() {
        let set = HandlerSet::<u32>::new("test");
        let sub = set.subscribe(|_| {});
        drop(set);
        sub.unsubscribe();
    }
}
