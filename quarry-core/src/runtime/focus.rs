//! Window focus signal.
//!
//! The cache never looks at a real window. A host installs an event source
//! with [`FocusManager::set_event_listener`] or drives the signal directly
//! with [`FocusManager::set_focused`]. Until told otherwise the process is
//! considered focused.

use std::sync::Arc;

use super::signal::{EnvironmentSignal, SignalCleanup, SignalSetter};
use super::subscribable::Subscription;

/// Tracks whether the host considers the application focused.
#[derive(Clone, Debug)]
pub struct FocusManager {
    signal: Arc<EnvironmentSignal>,
}

impl FocusManager {
    pub fn new() -> Self {
        Self {
            signal: EnvironmentSignal::new("focus"),
        }
    }

    /// Current focus state. Unknown is treated as focused.
    pub fn is_focused(&self) -> bool {
        self.signal.get()
    }

    /// Record the focus state. Regaining focus notifies subscribers;
    /// `None` resets to unknown.
    pub fn set_focused(&self, focused: Option<bool>) {
        self.signal.set(focused);
    }

    /// Notify subscribers that focus was regained without changing state.
    pub fn on_focus(&self) {
        self.signal.broadcast();
    }

    /// Listen for focus events.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.signal.subscribe(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.signal.listener_count()
    }

    /// Install a host event source, tearing down the previous one.
    ///
    /// `setup` receives a setter and returns a cleanup that runs when the
    /// source is replaced or the manager is dropped.
    pub fn set_event_listener<F>(&self, setup: F)
    where
        F: FnOnce(SignalSetter) -> SignalCleanup,
    {
        self.signal.set_event_listener(setup);
    }
}

impl Default for FocusManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn unknown_focus_counts_as_focused() {
        let focus = FocusManager::new();
        assert!(focus.is_focused());

        focus.set_focused(Some(false));
        assert!(!focus.is_focused());

        focus.set_focused(None);
        assert!(focus.is_focused());
    }

    #[test]
    fn only_regaining_focus_notifies() {
        let focus = FocusManager::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let _subscription = focus.subscribe(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        focus.set_focused(Some(false));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        focus.set_focused(Some(true));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let focus = FocusManager::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let subscription = focus.subscribe(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(focus.listener_count(), 1);

        drop(subscription);
        assert_eq!(focus.listener_count(), 0);

        focus.on_focus();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn event_listener_drives_signal_and_is_replaced() {
        let focus = FocusManager::new();
        let setter_slot: Arc<Mutex<Option<SignalSetter>>> = Arc::new(Mutex::new(None));
        let cleaned = Arc::new(AtomicI32::new(0));

        let slot = setter_slot.clone();
        let cleaned_clone = cleaned.clone();
        focus.set_event_listener(move |setter| {
            *slot.lock() = Some(setter);
            Box::new(move || {
                cleaned_clone.fetch_add(1, Ordering::SeqCst);
            })
        });

        let setter = setter_slot.lock().clone().expect("setter installed");
        setter(Some(false));
        assert!(!focus.is_focused());

        let events = Arc::new(AtomicI32::new(0));
        let events_clone = events.clone();
        let _subscription = focus.subscribe(move || {
            events_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Broadcast without recording a value
        setter(None);
        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert!(!focus.is_focused());

        focus.set_event_listener(|_| Box::new(|| {}));
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }
}
