//! Registry of live subscriptions torn down together on logout.
//!
//! The registry holds no business logic. Whoever owns a live resource adds a
//! cleanup unit; an external teardown signal calls [`SubscriptionRegistry::flush`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Something that can be torn down.
///
/// Implementations must tolerate being disposed more than once.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

impl<T: Disposable + ?Sized> Disposable for Arc<T> {
    fn dispose(&self) {
        (**self).dispose()
    }
}

impl<T: Disposable + ?Sized> Disposable for Box<T> {
    fn dispose(&self) {
        (**self).dispose()
    }
}

/// A recorded cleanup unit.
pub enum Teardown {
    /// Zero-argument teardown closure.
    Callback(Box<dyn FnOnce() + Send>),
    /// Object exposing `dispose()`.
    Object(Arc<dyn Disposable>),
}

impl Teardown {
    pub fn callback(f: impl FnOnce() + Send + 'static) -> Self {
        Teardown::Callback(Box::new(f))
    }

    pub fn object(d: impl Disposable + 'static) -> Self {
        Teardown::Object(Arc::new(d))
    }

    fn run(self) {
        match self {
            Teardown::Callback(f) => f(),
            Teardown::Object(d) => d.dispose(),
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Teardown::Callback(_) => f.write_str("Teardown::Callback"),
            Teardown::Object(_) => f.write_str("Teardown::Object"),
        }
    }
}

/// Key returned by [`SubscriptionRegistry::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationKey(pub u64);

/// Tracks cleanup units and runs them all on flush.
pub struct SubscriptionRegistry {
    /// Pending teardowns in registration order.
    entries: Mutex<Vec<(RegistrationKey, Teardown)>>,
    next_key: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_key: AtomicU64::new(1),
        }
    }

    /// Record a cleanup unit.
    pub fn add(&self, teardown: Teardown) -> RegistrationKey {
        let key = RegistrationKey(self.next_key.fetch_add(1, Ordering::SeqCst));
        self.entries.lock().push((key, teardown));
        key
    }

    /// Record a teardown closure.
    pub fn add_fn(&self, f: impl FnOnce() + Send + 'static) -> RegistrationKey {
        self.add(Teardown::callback(f))
    }

    /// Record a disposable object.
    pub fn add_disposable(&self, d: impl Disposable + 'static) -> RegistrationKey {
        self.add(Teardown::object(d))
    }

    /// Drop an entry without running it.
    ///
    /// Used when the owner already tore the resource down itself.
    pub fn release(&self, key: RegistrationKey) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(k, _)| *k != key);
        entries.len() != before
    }

    /// Run every recorded teardown once, in registration order, then clear.
    ///
    /// Returns how many teardowns ran. Teardowns run outside the internal
    /// lock, so they may add to or release from the registry.
    pub fn flush(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        let count = entries.len();
        for (_, teardown) in entries {
            teardown.run();
        }
        if count > 0 {
            debug!(count, "Flushed subscription registry");
        }
        count
    }

    /// Number of pending teardowns.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        disposed: AtomicUsize,
    }

    impl Disposable for Counter {
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_flush_runs_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            registry.add_fn(move || order.lock().push(i));
        }

        assert_eq!(registry.flush(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_flush_twice_is_noop() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(Counter {
            disposed: AtomicUsize::new(0),
        });
        registry.add_disposable(Arc::clone(&counter));

        assert_eq!(registry.flush(), 1);
        assert_eq!(registry.flush(), 0);
        assert_eq!(counter.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_already_disposed_object_flushes_cleanly() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(Counter {
            disposed: AtomicUsize::new(0),
        });
        counter.dispose();
        registry.add_disposable(Arc::clone(&counter));

        assert_eq!(registry.flush(), 1);
        assert_eq!(counter.disposed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_skips_teardown() {
        let registry = SubscriptionRegistry::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let key = registry.add_fn(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.release(key));
        assert!(!registry.release(key));
        assert_eq!(registry.flush(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_teardown_may_reenter_registry() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let inner = Arc::clone(&registry);
        registry.add_fn(move || {
            inner.add_fn(|| {});
        });

        assert_eq!(registry.flush(), 1);
        assert_eq!(registry.len(), 1);
    }
}
