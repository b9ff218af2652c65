//! Runtime Services
//!
//! The services every entry, retryer and observer needs from its
//! environment, bundled into one cloneable [`Runtime`]:
//!
//! - [`NotifyManager`]: batches and orders side-effect callbacks
//! - [`FocusManager`] / [`OnlineManager`]: environment signals
//! - [`Clock`]: millisecond timestamps that follow Tokio's clock
//!
//! A client constructs one runtime and hands it to everything it builds.
//! Tests construct their own to get isolated signals and schedulers.
//!
//! Fetching and timers run as Tokio tasks, so the cache must be driven from
//! inside a Tokio runtime. The notification scheduler is the exception: it
//! falls back to inline delivery when no runtime is present.

pub mod clock;
pub mod focus;
pub mod notify;
pub mod online;
mod signal;
pub mod subscribable;

pub use clock::Clock;
pub use focus::FocusManager;
pub use notify::NotifyManager;
pub use online::OnlineManager;
pub use signal::{SignalCleanup, SignalSetter};
pub use subscribable::{ListenerId, Subscribable, Subscription};

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Shared service bundle. Clones share the same services.
#[derive(Clone, Debug, Default)]
pub struct Runtime {
    notify: NotifyManager,
    focus: FocusManager,
    online: OnlineManager,
    clock: Clock,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) -> &NotifyManager {
        &self.notify
    }

    pub fn focus(&self) -> &FocusManager {
        &self.focus
    }

    pub fn online(&self) -> &OnlineManager {
        &self.online
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Whether retries may proceed: focused and online.
    pub fn is_favorable(&self) -> bool {
        self.focus.is_focused() && self.online.is_online()
    }
}

/// Spawn a timer task if a Tokio runtime is available.
///
/// Returns `None` outside a runtime; the timer simply never fires.
pub(crate) fn spawn_timer<F>(future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            tracing::warn!("no tokio runtime, timer not armed");
            None
        }
    }
}
