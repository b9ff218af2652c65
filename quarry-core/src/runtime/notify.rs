//! Notification Scheduler
//!
//! Every side effect the cache produces (observer listeners, `on_success`
//! callbacks, registry events) is routed through a [`NotifyManager`]. The
//! manager guarantees two things:
//!
//! 1. **No partial snapshots.** Callbacks scheduled inside a [`batch`] are
//!    held back until the outermost batch returns, so listeners never observe
//!    a result computed from half-applied mutations.
//!
//! 2. **FIFO delivery.** Flushed callbacks are appended to a single ready
//!    queue and drained in order by one pump. A callback that schedules more
//!    work (or opens its own batch) appends behind everything already queued.
//!
//! # Deferral
//!
//! Inside a Tokio runtime the pump is a spawned task, so delivery always
//! happens after the mutating code has returned. Without a runtime the pump
//! runs inline at the end of the outermost batch; ordering is unchanged.
//!
//! # Panics in callbacks
//!
//! A panicking callback is caught so the rest of the queue still runs. The
//! panic is logged and re-raised on its own Tokio task, where the global
//! panic hook and task join machinery can see it.
//!
//! [`batch`]: NotifyManager::batch

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::Notify;

/// A deferred side effect.
pub type Callback = Box<dyn FnOnce() + Send>;

/// Wraps the delivery of a single callback.
pub type NotifyFn = Arc<dyn Fn(Callback) + Send + Sync>;

/// Wraps the delivery of one flushed group of callbacks.
pub type BatchNotifyFn = Arc<dyn Fn(Callback) + Send + Sync>;

/// Batches and orders side-effect callbacks.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct NotifyManager {
    inner: Arc<NotifyInner>,
}

struct NotifyInner {
    state: Mutex<QueueState>,
    idle: Notify,
    notify_fn: RwLock<NotifyFn>,
    batch_notify_fn: RwLock<BatchNotifyFn>,
}

#[derive(Default)]
struct QueueState {
    /// Open `batch` calls.
    transactions: usize,
    /// Callbacks scheduled while a transaction is open.
    pending: Vec<Callback>,
    /// Flushed groups waiting for the pump.
    ready: VecDeque<Vec<Callback>>,
    /// Whether a pump is currently draining `ready`.
    pumping: bool,
}

impl NotifyManager {
    /// Create a manager with pass-through notify functions.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NotifyInner {
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
                notify_fn: RwLock::new(Arc::new(|callback: Callback| callback())),
                batch_notify_fn: RwLock::new(Arc::new(|callback: Callback| callback())),
            }),
        }
    }

    /// Run `f` as one transaction.
    ///
    /// Callbacks scheduled during `f`, including from nested `batch` calls,
    /// are flushed as a single unit when the outermost batch returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.state.lock().transactions += 1;
        let _transaction = Transaction { manager: self };
        f()
    }

    /// Whether a batch is currently open.
    pub fn is_batching(&self) -> bool {
        self.inner.state.lock().transactions > 0
    }

    /// Schedule a callback.
    ///
    /// Inside a batch the callback joins the batch's flush; otherwise it is
    /// queued for delivery on its own.
    pub fn schedule<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let callback: Callback = Box::new(callback);
        {
            let mut state = self.inner.state.lock();
            if state.transactions > 0 {
                state.pending.push(callback);
                return;
            }
        }
        self.enqueue(vec![callback]);
    }

    /// Wrap `f` so every call is scheduled instead of run directly.
    pub fn batch_calls<A, F>(&self, f: F) -> impl Fn(A) + Send + Sync + 'static
    where
        A: Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let manager = self.clone();
        let f = Arc::new(f);
        move |arg: A| {
            let f = Arc::clone(&f);
            manager.schedule(move || f(arg));
        }
    }

    /// Replace the function used to deliver each callback.
    pub fn set_notify_fn<F>(&self, f: F)
    where
        F: Fn(Callback) + Send + Sync + 'static,
    {
        *self.inner.notify_fn.write() = Arc::new(f);
    }

    /// Replace the function used to deliver each flushed group.
    pub fn set_batch_notify_fn<F>(&self, f: F)
    where
        F: Fn(Callback) + Send + Sync + 'static,
    {
        *self.inner.batch_notify_fn.write() = Arc::new(f);
    }

    /// Wait until every queued callback has been delivered.
    ///
    /// Callbacks still held by an open batch are not waited for.
    pub async fn settle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.inner.state.lock();
                if !state.pumping && state.ready.is_empty() {
                    return;
                }
            }

            notified.await;
        }
    }

    fn end_transaction(&self) {
        let flushed = {
            let mut state = self.inner.state.lock();
            state.transactions = state.transactions.saturating_sub(1);
            if state.transactions == 0 && !state.pending.is_empty() {
                Some(std::mem::take(&mut state.pending))
            } else {
                None
            }
        };

        if let Some(group) = flushed {
            tracing::trace!(callbacks = group.len(), "flushing batch");
            self.enqueue(group);
        }
    }

    fn enqueue(&self, group: Vec<Callback>) {
        let start_pump = {
            let mut state = self.inner.state.lock();
            state.ready.push_back(group);
            !std::mem::replace(&mut state.pumping, true)
        };

        if !start_pump {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move { inner.drain() });
            }
            Err(_) => self.inner.drain(),
        }
    }
}

impl NotifyInner {
    fn drain(&self) {
        loop {
            let group = {
                let mut state = self.state.lock();
                match state.ready.pop_front() {
                    Some(group) => group,
                    None => {
                        state.pumping = false;
                        break;
                    }
                }
            };

            // A panicking host batch function must not wedge the pump.
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.deliver(group))) {
                report_panic(payload);
            }
        }

        self.idle.notify_waiters();
    }

    fn deliver(&self, group: Vec<Callback>) {
        let notify_fn = Arc::clone(&*self.notify_fn.read());
        let batch_notify_fn = Arc::clone(&*self.batch_notify_fn.read());

        batch_notify_fn(Box::new(move || {
            for callback in group {
                notify_fn(isolate(callback));
            }
        }));
    }
}

impl Default for NotifyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotifyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("NotifyManager")
            .field("transactions", &state.transactions)
            .field("pending", &state.pending.len())
            .field("ready", &state.ready.len())
            .field("pumping", &state.pumping)
            .finish()
    }
}

/// Closes a transaction on drop, so a panicking batch body still flushes.
struct Transaction<'a> {
    manager: &'a NotifyManager,
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.manager.end_transaction();
    }
}

fn isolate(callback: Callback) -> Callback {
    Box::new(move || {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
            report_panic(payload);
        }
    })
}

fn report_panic(payload: Box<dyn Any + Send>) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    tracing::error!(panic = %message, "notification callback panicked");

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(async move { std::panic::resume_unwind(payload) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |tag: &'static str| -> Callback {
            let log = log_clone.clone();
            Box::new(move || log.lock().push(tag))
        };
        (log, make)
    }

    #[test]
    fn batch_returns_value() {
        let manager = NotifyManager::new();
        assert_eq!(manager.batch(|| 42), 42);
        assert!(!manager.is_batching());
    }

    #[test]
    fn schedule_without_runtime_runs_at_batch_end() {
        let manager = NotifyManager::new();
        let (log, make) = recorder();

        manager.batch(|| {
            manager.schedule(make("a"));
            manager.schedule(make("b"));
            assert!(log.lock().is_empty());
        });

        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn nested_batch_does_not_flush_early() {
        let manager = NotifyManager::new();
        let (log, make) = recorder();

        manager.batch(|| {
            manager.batch(|| manager.schedule(make("inner")));
            // Inner batch closed, outer still open
            assert!(log.lock().is_empty());
            manager.schedule(make("outer"));
        });

        assert_eq!(*log.lock(), vec!["inner", "outer"]);
    }

    #[test]
    fn reentrant_schedule_keeps_fifo_order() {
        let manager = NotifyManager::new();
        let (log, make) = recorder();

        let inner = manager.clone();
        let log_b = log.clone();
        let make_d = make("d");
        manager.batch(|| {
            manager.schedule(make("a"));
            manager.schedule(move || {
                log_b.lock().push("b");
                inner.batch(|| inner.schedule(make_d));
            });
            manager.schedule(make("c"));
        });

        assert_eq!(*log.lock(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn panicking_callback_does_not_stop_queue() {
        let manager = NotifyManager::new();
        let (log, make) = recorder();

        manager.batch(|| {
            manager.schedule(make("before"));
            manager.schedule(|| panic!("listener blew up"));
            manager.schedule(make("after"));
        });

        assert_eq!(*log.lock(), vec!["before", "after"]);
    }

    #[test]
    fn custom_notify_fns_wrap_delivery() {
        let manager = NotifyManager::new();
        let wrapped = Arc::new(AtomicUsize::new(0));
        let groups = Arc::new(AtomicUsize::new(0));

        let wrapped_clone = wrapped.clone();
        manager.set_notify_fn(move |callback| {
            wrapped_clone.fetch_add(1, Ordering::SeqCst);
            callback();
        });
        let groups_clone = groups.clone();
        manager.set_batch_notify_fn(move |callback| {
            groups_clone.fetch_add(1, Ordering::SeqCst);
            callback();
        });

        manager.batch(|| {
            manager.schedule(|| {});
            manager.schedule(|| {});
            manager.schedule(|| {});
        });

        assert_eq!(wrapped.load(Ordering::SeqCst), 3);
        assert_eq!(groups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_calls_defers_invocation() {
        let manager = NotifyManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let deferred = manager.batch_calls(move |value: i32| seen_clone.lock().push(value));

        manager.batch(|| {
            deferred(1);
            deferred(2);
            assert!(seen.lock().is_empty());
        });

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn runtime_delivery_is_deferred_until_settle() {
        let manager = NotifyManager::new();
        let (log, make) = recorder();

        manager.batch(|| {
            manager.schedule(make("a"));
            manager.schedule(make("b"));
            manager.schedule(make("c"));
        });

        // Nothing runs synchronously inside a runtime
        assert!(log.lock().is_empty());

        manager.settle().await;
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn settle_waits_for_work_scheduled_by_callbacks() {
        let manager = NotifyManager::new();
        let (log, make) = recorder();

        let inner = manager.clone();
        let make_late = make("late");
        manager.schedule(move || inner.schedule(make_late));

        manager.settle().await;
        assert_eq!(*log.lock(), vec!["late"]);
    }
}
