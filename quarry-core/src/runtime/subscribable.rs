//! Listener sets.
//!
//! A `Subscribable` is the small primitive every notifying component in the
//! crate is built on: the focus and online managers, the registry, and
//! observers. It only stores listeners; what happens on the first subscribe
//! or the last unsubscribe is decided by the owner, which inspects the
//! listener count returned from [`Subscribable::add`] and
//! [`Subscribable::remove`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Unique identifier for a registered listener.
///
/// Each listener gets a unique ID when added. The ID is the only way to
/// remove it again, since closures cannot be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A listener callback receiving a borrowed event.
pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// An ordered set of listeners for events of type `A`.
pub struct Subscribable<A> {
    listeners: Mutex<Vec<(ListenerId, Listener<A>)>>,
}

impl<A> Subscribable<A> {
    /// Create an empty listener set.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Add a listener. Returns its ID and the listener count after insertion.
    pub fn add(&self, listener: Listener<A>) -> (ListenerId, usize) {
        let id = ListenerId::new();
        let mut listeners = self.listeners.lock();
        listeners.push((id, listener));
        (id, listeners.len())
    }

    /// Remove a listener. Returns the remaining count, or `None` if the ID
    /// was not registered (already removed).
    pub fn remove(&self, id: ListenerId) -> Option<usize> {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        (listeners.len() != before).then_some(listeners.len())
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Whether any listener is registered.
    pub fn has_listeners(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Clone out the current listeners so they can be invoked without
    /// holding the lock. Listeners may subscribe or unsubscribe while running.
    pub fn snapshot(&self) -> Vec<Listener<A>> {
        self.listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Invoke every listener with `event`, in registration order.
    pub fn emit(&self, event: &A) {
        for listener in self.snapshot() {
            listener(event);
        }
    }
}

impl<A> Default for Subscribable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Subscribable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribable")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Handle returned by every `subscribe` in the crate.
///
/// Dropping the handle unsubscribes. Calling [`Subscription::unsubscribe`]
/// does the same thing explicitly; either way the teardown runs exactly once.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    /// Keep the listener registered for the lifetime of its owner.
    pub fn detach(mut self) {
        self.teardown = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        let id3 = ListenerId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn add_and_remove_report_counts() {
        let set: Subscribable<i32> = Subscribable::new();

        let (a, count) = set.add(Arc::new(|_| {}));
        assert_eq!(count, 1);
        let (b, count) = set.add(Arc::new(|_| {}));
        assert_eq!(count, 2);

        assert_eq!(set.remove(a), Some(1));
        // Removing twice is a no-op
        assert_eq!(set.remove(a), None);
        assert_eq!(set.remove(b), Some(0));
        assert!(!set.has_listeners());
    }

    #[test]
    fn emit_calls_listeners_in_order() {
        let set: Subscribable<i32> = Subscribable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = seen.clone();
            let _ = set.add(Arc::new(move |value: &i32| {
                seen.lock().push((tag, *value));
            }));
        }

        set.emit(&7);
        assert_eq!(*seen.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn subscription_drop_runs_teardown_once() {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let subscription = Subscription::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let count_clone = count.clone();
        {
            let _subscription = Subscription::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn detached_subscription_never_tears_down() {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        Subscription::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
