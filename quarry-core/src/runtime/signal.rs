//! Shared implementation of the process-scoped boolean signals.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::subscribable::{Subscribable, Subscription};

/// Setter handed to a host event source. `Some(value)` records the value,
/// `None` only broadcasts a change without recording one.
pub type SignalSetter = Arc<dyn Fn(Option<bool>) + Send + Sync>;

/// Cleanup returned by a host event source.
pub type SignalCleanup = Box<dyn FnOnce() + Send>;

pub(crate) struct EnvironmentSignal {
    name: &'static str,
    value: Mutex<Option<bool>>,
    listeners: Subscribable<()>,
    cleanup: Mutex<Option<SignalCleanup>>,
}

impl EnvironmentSignal {
    pub(crate) fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            value: Mutex::new(None),
            listeners: Subscribable::new(),
            cleanup: Mutex::new(None),
        })
    }

    /// Unknown counts as favorable.
    pub(crate) fn get(&self) -> bool {
        self.value.lock().unwrap_or(true)
    }

    pub(crate) fn set(&self, value: Option<bool>) {
        *self.value.lock() = value;
        tracing::debug!(signal = self.name, ?value, "environment signal set");
        if value == Some(true) {
            self.broadcast();
        }
    }

    pub(crate) fn broadcast(&self) {
        self.listeners.emit(&());
    }

    pub(crate) fn subscribe(self: &Arc<Self>, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let (id, _) = self.listeners.add(Arc::new(move |_: &()| listener()));
        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(signal) = weak.upgrade() {
                signal.listeners.remove(id);
            }
        })
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn set_event_listener<F>(self: &Arc<Self>, setup: F)
    where
        F: FnOnce(SignalSetter) -> SignalCleanup,
    {
        let previous = self.cleanup.lock().take();
        if let Some(previous) = previous {
            previous();
        }

        let weak = Arc::downgrade(self);
        let setter: SignalSetter = Arc::new(move |value| {
            let Some(signal) = weak.upgrade() else {
                return;
            };
            match value {
                Some(_) => signal.set(value),
                None => signal.broadcast(),
            }
        });

        let cleanup = setup(setter);
        *self.cleanup.lock() = Some(cleanup);
    }
}

impl Drop for EnvironmentSignal {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.get_mut().take() {
            cleanup();
        }
    }
}

impl fmt::Debug for EnvironmentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentSignal")
            .field("name", &self.name)
            .field("value", &*self.value.lock())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
