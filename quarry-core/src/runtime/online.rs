//! Network connectivity signal.

use std::sync::Arc;

use super::signal::{EnvironmentSignal, SignalCleanup, SignalSetter};
use super::subscribable::Subscription;

/// Tracks whether the host considers the network reachable.
///
/// Mirrors [`FocusManager`](super::FocusManager): unknown counts as online,
/// and only coming back online notifies subscribers.
#[derive(Clone, Debug)]
pub struct OnlineManager {
    signal: Arc<EnvironmentSignal>,
}

impl OnlineManager {
    pub fn new() -> Self {
        Self {
            signal: EnvironmentSignal::new("online"),
        }
    }

    pub fn is_online(&self) -> bool {
        self.signal.get()
    }

    pub fn set_online(&self, online: Option<bool>) {
        self.signal.set(online);
    }

    pub fn on_online(&self) {
        self.signal.broadcast();
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.signal.subscribe(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.signal.listener_count()
    }

    pub fn set_event_listener<F>(&self, setup: F)
    where
        F: FnOnce(SignalSetter) -> SignalCleanup,
    {
        self.signal.set_event_listener(setup);
    }
}

impl Default for OnlineManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn going_online_notifies() {
        let online = OnlineManager::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let _subscription = online.subscribe(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(online.is_online());
        online.set_online(Some(false));
        assert!(!online.is_online());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        online.set_online(Some(true));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_runs_when_manager_drops() {
        let cleaned = Arc::new(AtomicI32::new(0));
        let cleaned_clone = cleaned.clone();
        {
            let online = OnlineManager::new();
            online.set_event_listener(move |_| {
                Box::new(move || {
                    cleaned_clone.fetch_add(1, Ordering::SeqCst);
                })
            });
        }
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }
}
