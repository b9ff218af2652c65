//! Cache Entry
//!
//! An [`Entry`] is the single writer of one key's state. Everything else
//! (observers, the registry, the client) either reads its state or asks it
//! to do something: fetch, cancel, set data.
//!
//! # Fetch lifecycle
//!
//! 1. A fetch while another is in flight joins it and returns the same
//!    pending result, unless `cancel_refetch` asks for a fresh one.
//!
//! 2. The state before the fetch is kept as the revert snapshot, then a
//!    `Fetch` action is dispatched and a [`Retryer`] run is started.
//!
//! 3. The run's outcome is dispatched as `Success` or `Error`. A reverting
//!    cancellation restores the snapshot instead.
//!
//! # Garbage collection
//!
//! An entry with no observers arms a timer for its cache time. When it
//! fires and the entry is still unobserved and idle, the entry removes
//! itself from the registry. Adding an observer disarms the timer.
//!
//! # Locking
//!
//! State lives behind one mutex that is never held while calling out to
//! observers, the registry or user code.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::task::JoinHandle;

use super::key::{QueryHash, QueryKey};
use super::options::{
    AbortSignal, FetchContext, FetchOptions, InitialData, QueryOptions, SetDataOptions, Updater,
    DEFAULT_CACHE_TIME,
};
use super::registry::{AnyEntry, CacheEvent, Registry};
use super::retryer::{Attempt, CancelOptions, PendingResult, Retryer, RetryerConfig};
use super::state::{reduce, Action, ActionKind, EntryState, QueryStatus, StatePatch};
use super::structural::{replace_equal_deep, QueryData};
use crate::error::{FetchError, QueryError};
use crate::runtime::clock::{millis, time_until_stale};
use crate::runtime::{spawn_timer, Runtime};

/// Identity of an observer attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// What an entry needs from the observers attached to it.
pub trait EntryObserver<T, E>: Send + Sync {
    fn id(&self) -> ObserverId;

    /// Called after every state transition, inside the dispatch batch.
    fn on_entry_update(&self, action: ActionKind);

    /// The observer's entry options, used when the entry has no fetch
    /// function of its own.
    fn query_options(&self) -> QueryOptions<T, E>;

    fn is_enabled(&self) -> bool;

    fn is_stale(&self) -> bool;

    fn should_fetch_on_window_focus(&self) -> bool;

    fn should_fetch_on_reconnect(&self) -> bool;

    /// Start a refetch without waiting for it.
    fn refetch(&self);
}

type ObserverList<T, E> = SmallVec<[Arc<dyn EntryObserver<T, E>>; 2]>;

struct EntryCore<T, E> {
    options: QueryOptions<T, E>,
    state: EntryState<T, E>,
    revert_state: Option<EntryState<T, E>>,
    cache_time: Duration,
    retryer: Option<Retryer<T, E>>,
    pending: Option<PendingResult<T, E>>,
    gc_timer: Option<JoinHandle<()>>,
    observers: ObserverList<T, E>,
    abort_consumed: Option<Arc<AtomicBool>>,
}

impl<T, E> EntryCore<T, E> {
    fn set_options(&mut self, options: &QueryOptions<T, E>) {
        self.options = self.options.overlay(options);
        let configured = self.options.cache_time.unwrap_or(DEFAULT_CACHE_TIME);
        self.cache_time = self.cache_time.max(configured);
    }

    fn clear_gc_timer(&mut self) {
        if let Some(timer) = self.gc_timer.take() {
            timer.abort();
        }
    }
}

/// One cached key.
pub struct Entry<T, E> {
    this: Weak<Self>,
    key: QueryKey,
    hash: QueryHash,
    registry: Weak<Registry>,
    runtime: Runtime,
    /// Serializes the fetch setup so concurrent callers dedup correctly.
    fetch_gate: Mutex<()>,
    core: Mutex<EntryCore<T, E>>,
}

impl<T, E> Entry<T, E>
where
    T: QueryData,
    E: FetchError,
{
    pub(crate) fn new(
        key: QueryKey,
        hash: QueryHash,
        options: QueryOptions<T, E>,
        state: Option<EntryState<T, E>>,
        registry: Weak<Registry>,
        runtime: Runtime,
    ) -> Arc<Self> {
        let state = state.unwrap_or_else(|| {
            EntryState::initial(
                options.initial_data.as_ref().and_then(InitialData::resolve),
                options.initial_data_updated_at,
                runtime.now_ms(),
            )
        });

        let mut core = EntryCore {
            options: QueryOptions::default(),
            state,
            revert_state: None,
            cache_time: Duration::ZERO,
            retryer: None,
            pending: None,
            gc_timer: None,
            observers: SmallVec::new(),
            abort_consumed: None,
        };
        core.set_options(&options);

        let entry = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            key,
            hash,
            registry,
            runtime,
            fetch_gate: Mutex::new(()),
            core: Mutex::new(core),
        });

        tracing::debug!(hash = %entry.hash, "entry created");
        entry.schedule_gc();
        entry
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn hash(&self) -> &QueryHash {
        &self.hash
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> EntryState<T, E> {
        self.core.lock().state.clone()
    }

    pub fn options(&self) -> QueryOptions<T, E> {
        self.core.lock().options.clone()
    }

    pub fn cache_time(&self) -> Duration {
        self.core.lock().cache_time
    }

    pub fn observer_count(&self) -> usize {
        self.core.lock().observers.len()
    }

    /// Whether any attached observer is enabled.
    pub fn is_active(&self) -> bool {
        let observers = self.core.lock().observers.clone();
        observers.iter().any(|observer| observer.is_enabled())
    }

    /// Stale when invalidated, never resolved, or older than `stale_time`.
    pub fn is_stale_by_time(&self, stale_time: Duration) -> bool {
        let (invalidated, updated_at) = {
            let core = self.core.lock();
            (core.state.is_invalidated, core.state.data_updated_at)
        };
        invalidated
            || updated_at == 0
            || time_until_stale(updated_at, stale_time, self.runtime.now_ms()).is_zero()
    }

    fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    fn erased(&self) -> Option<Arc<dyn AnyEntry>> {
        self.this.upgrade().map(|entry| entry as Arc<dyn AnyEntry>)
    }

    fn notify_registry(&self, event: impl FnOnce(Arc<dyn AnyEntry>) -> CacheEvent) {
        if let (Some(registry), Some(entry)) = (self.registry(), self.erased()) {
            registry.notify(event(entry));
        }
    }

    fn dispatch(&self, action: Action<T, E>) {
        let kind = action.kind();
        let observers = {
            let mut core = self.core.lock();
            let now = self.runtime.now_ms();
            core.state = reduce(&core.state, core.revert_state.as_ref(), action, now);
            core.observers.clone()
        };

        tracing::trace!(hash = %self.hash, action = ?kind, "entry updated");

        self.runtime.notify().batch(|| {
            for observer in &observers {
                observer.on_entry_update(kind);
            }
            self.notify_registry(|entry| CacheEvent::Updated { entry, action: kind });
        });
    }

    /// Replace the data, as if a fetch had just succeeded.
    pub fn set_data(&self, updater: impl Into<Updater<T>>, options: SetDataOptions) -> Arc<T> {
        let previous = self.core.lock().state.data.clone();
        let next = updater.into().apply(previous.as_ref());
        self.store_data(Arc::new(next), options.updated_at)
    }

    fn store_data(&self, next: Arc<T>, updated_at: Option<u64>) -> Arc<T> {
        let (previous, is_data_equal, sharing) = {
            let core = self.core.lock();
            (
                core.state.data.clone(),
                core.options.is_data_equal.clone(),
                core.options.structural_sharing != Some(false),
            )
        };

        let equal = is_data_equal.is_some_and(|eq| eq(previous.as_ref(), &next));
        let data = match previous {
            Some(previous) if equal => previous,
            previous if sharing => replace_equal_deep(previous.as_ref(), next),
            _ => next,
        };

        self.dispatch(Action::Success {
            data: Arc::clone(&data),
            updated_at,
        });
        data
    }

    /// Shallow-merge a manual state edit.
    pub fn set_state(&self, patch: StatePatch<T, E>) {
        self.dispatch(Action::SetState { patch });
    }

    /// Mark the data stale regardless of age.
    pub fn invalidate(&self) {
        if !self.core.lock().state.is_invalidated {
            self.dispatch(Action::Invalidate);
        }
    }

    /// Fetch, or join the fetch already in flight.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn fetch(
        &self,
        options: Option<QueryOptions<T, E>>,
        fetch_options: FetchOptions,
    ) -> PendingResult<T, E> {
        let _gate = self.fetch_gate.lock();

        let cancel_first = {
            let core = self.core.lock();
            if core.state.is_fetching {
                if core.state.data_updated_at != 0 && fetch_options.cancel_refetch {
                    true
                } else if let Some(pending) = &core.pending {
                    return pending.clone();
                } else {
                    false
                }
            } else {
                false
            }
        };

        if cancel_first {
            self.cancel_run(CancelOptions::silent());
        }

        let borrow_from = {
            let mut core = self.core.lock();
            if let Some(options) = &options {
                core.set_options(options);
            }
            if core.options.fetch_fn.is_none() {
                core.observers.clone()
            } else {
                SmallVec::new()
            }
        };

        for observer in borrow_from {
            let observer_options = observer.query_options();
            if observer_options.fetch_fn.is_some() {
                self.core.lock().set_options(&observer_options);
                break;
            }
        }

        let signal = AbortSignal::new();
        let (dispatch_fetch, fetch_fn, retry, retry_delay, meta) = {
            let mut core = self.core.lock();
            core.revert_state = Some(core.state.clone());
            core.abort_consumed = Some(Arc::clone(&signal.consumed));
            let dispatch_fetch =
                !core.state.is_fetching || core.state.fetch_meta != fetch_options.meta;
            (
                dispatch_fetch,
                core.options.fetch_fn.clone(),
                core.options.retry.clone().unwrap_or_default(),
                core.options.retry_delay.clone().unwrap_or_default(),
                core.options.meta.clone(),
            )
        };

        if dispatch_fetch {
            self.dispatch(Action::Fetch {
                meta: fetch_options.meta.clone(),
            });
        }

        tracing::debug!(hash = %self.hash, "fetch started");

        let key = self.key.clone();
        let hash = self.hash.clone();
        let attempt_signal = signal.clone();
        let mut config = RetryerConfig::new(self.runtime.clone(), move || match &fetch_fn {
            Some(fetch_fn) => {
                attempt_signal.consumed.store(false, Ordering::SeqCst);
                fetch_fn(FetchContext::new(key.clone(), meta.clone(), attempt_signal.clone()))
            }
            None => Attempt::failed(QueryError::MissingFetchFn { hash: hash.clone() }),
        });

        let token = signal.token.clone();
        config.abort = Some(Arc::new(move || token.cancel()));
        config.retry = retry;
        config.retry_delay = retry_delay;

        let weak = self.this.clone();
        config.on_success = Some(Arc::new(move |data| {
            if let Some(entry) = weak.upgrade() {
                entry.on_fetch_success(data);
            }
        }));
        let weak = self.this.clone();
        config.on_error = Some(Arc::new(move |error| {
            if let Some(entry) = weak.upgrade() {
                entry.on_fetch_error(error);
            }
        }));
        let weak = self.this.clone();
        config.on_fail = Some(Arc::new(move |_, _| {
            if let Some(entry) = weak.upgrade() {
                entry.dispatch(Action::Failed);
            }
        }));
        let weak = self.this.clone();
        config.on_pause = Some(Arc::new(move || {
            if let Some(entry) = weak.upgrade() {
                entry.dispatch(Action::Pause);
            }
        }));
        let weak = self.this.clone();
        config.on_continue = Some(Arc::new(move || {
            if let Some(entry) = weak.upgrade() {
                entry.dispatch(Action::Continue);
            }
        }));

        let retryer = Retryer::start(config);
        let pending = retryer.result();
        {
            let mut core = self.core.lock();
            core.retryer = Some(retryer);
            core.pending = Some(pending.clone());
        }
        pending
    }

    fn on_fetch_success(&self, data: Arc<T>) {
        self.runtime.notify().batch(|| {
            let data = self.store_data(data, None);

            if let Some(registry) = self.registry() {
                registry.report_success(data.as_ref() as &dyn Any, self.info());
            }

            if self.cache_time().is_zero() {
                self.optional_remove();
            }
        });
    }

    fn on_fetch_error(&self, error: QueryError<E>) {
        self.runtime.notify().batch(|| {
            let cancelled = error.as_cancelled().copied();

            if !cancelled.is_some_and(|cancelled| cancelled.silent) {
                self.dispatch(Action::Error {
                    error: error.clone(),
                });
            }

            if cancelled.is_none() {
                tracing::error!(hash = %self.hash, error = %error, "query failed");
                if let Some(registry) = self.registry() {
                    registry.report_error(&error, self.info());
                }
            }

            if self.cache_time().is_zero() {
                self.optional_remove();
            }
        });
    }

    fn info(&self) -> super::registry::EntryInfo {
        super::registry::EntryInfo {
            key: self.key.clone(),
            hash: self.hash.clone(),
            observers: self.observer_count(),
        }
    }

    fn cancel_run(&self, options: CancelOptions) {
        let retryer = self.core.lock().retryer.clone();
        if let Some(retryer) = retryer {
            retryer.cancel(options);
        }
    }

    /// Cancel the in-flight fetch. The returned future resolves once the
    /// run has settled and never fails.
    pub fn cancel(&self, options: CancelOptions) -> impl Future<Output = ()> + Send + 'static {
        let pending = self.core.lock().pending.clone();
        self.cancel_run(options);
        async move {
            if let Some(pending) = pending {
                let _ = pending.await;
            }
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn EntryObserver<T, E>>) {
        let added = {
            let mut core = self.core.lock();
            if core.observers.iter().any(|existing| existing.id() == observer.id()) {
                false
            } else {
                core.observers.push(observer);
                core.clear_gc_timer();
                true
            }
        };

        if added {
            self.notify_registry(|entry| CacheEvent::ObserverAdded { entry });
        }
    }

    pub fn remove_observer(&self, id: ObserverId) {
        let (removed, now_empty, retryer, abort_consumed, cache_time) = {
            let mut core = self.core.lock();
            let before = core.observers.len();
            core.observers.retain(|observer| observer.id() != id);
            (
                core.observers.len() != before,
                core.observers.is_empty(),
                core.retryer.clone(),
                core.abort_consumed
                    .as_ref()
                    .is_some_and(|consumed| consumed.load(Ordering::SeqCst)),
                core.cache_time,
            )
        };

        if !removed {
            return;
        }

        if now_empty {
            if let Some(retryer) = retryer {
                if retryer.is_transport_cancelable() || abort_consumed {
                    retryer.cancel(CancelOptions::revert());
                } else {
                    retryer.cancel_retry();
                }
            }

            if cache_time.is_zero() {
                self.optional_remove();
            } else {
                self.schedule_gc();
            }
        }

        self.notify_registry(|entry| CacheEvent::ObserverRemoved { entry });
    }

    fn schedule_gc(&self) {
        let mut core = self.core.lock();
        core.clear_gc_timer();

        let cache_time = core.cache_time;
        if cache_time == Duration::MAX {
            return;
        }

        tracing::debug!(hash = %self.hash, cache_time_ms = millis(cache_time), "gc scheduled");
        let weak = self.this.clone();
        core.gc_timer = spawn_timer(async move {
            tokio::time::sleep(cache_time).await;
            if let Some(entry) = weak.upgrade() {
                entry.optional_remove();
            }
        });
    }

    /// Remove from the registry if unobserved and idle.
    fn optional_remove(&self) {
        let removable = {
            let core = self.core.lock();
            core.observers.is_empty() && !core.state.is_fetching
        };

        if removable {
            if let (Some(registry), Some(entry)) = (self.registry(), self.erased()) {
                registry.remove(&entry);
            }
        }
    }

    fn observers(&self) -> ObserverList<T, E> {
        self.core.lock().observers.clone()
    }
}

impl<T, E> AnyEntry for Entry<T, E>
where
    T: QueryData,
    E: FetchError,
{
    fn hash(&self) -> &QueryHash {
        &self.hash
    }

    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn status(&self) -> QueryStatus {
        self.core.lock().state.status
    }

    fn data_updated_at(&self) -> u64 {
        self.core.lock().state.data_updated_at
    }

    fn is_fetching(&self) -> bool {
        self.core.lock().state.is_fetching
    }

    fn is_active(&self) -> bool {
        Entry::is_active(self)
    }

    fn is_stale(&self) -> bool {
        let (invalidated, updated_at) = {
            let core = self.core.lock();
            (core.state.is_invalidated, core.state.data_updated_at)
        };
        invalidated
            || updated_at == 0
            || self.observers().iter().any(|observer| observer.is_stale())
    }

    fn observer_count(&self) -> usize {
        Entry::observer_count(self)
    }

    fn invalidate(&self) {
        Entry::invalidate(self);
    }

    fn cancel(&self, options: CancelOptions) -> BoxFuture<'static, ()> {
        Entry::cancel(self, options).boxed()
    }

    fn refetch(&self) -> BoxFuture<'static, ()> {
        let pending = self.fetch(None, FetchOptions::default());
        async move {
            let _ = pending.await;
        }
        .boxed()
    }

    fn on_focus(&self) {
        let (observers, retryer) = {
            let core = self.core.lock();
            (core.observers.clone(), core.retryer.clone())
        };

        if let Some(observer) = observers
            .iter()
            .find(|observer| observer.should_fetch_on_window_focus())
        {
            observer.refetch();
        }

        if let Some(retryer) = retryer {
            retryer.resume();
        }
    }

    fn on_online(&self) {
        let (observers, retryer) = {
            let core = self.core.lock();
            (core.observers.clone(), core.retryer.clone())
        };

        if let Some(observer) = observers
            .iter()
            .find(|observer| observer.should_fetch_on_reconnect())
        {
            observer.refetch();
        }

        if let Some(retryer) = retryer {
            retryer.resume();
        }
    }

    fn destroy(&self) {
        self.core.lock().clear_gc_timer();
        self.cancel_run(CancelOptions::silent());
    }
}

impl<T, E> fmt::Debug for Entry<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Entry")
            .field("hash", &self.hash)
            .field("status", &core.state.status)
            .field("is_fetching", &core.state.is_fetching)
            .field("observers", &core.observers.len())
            .field("cache_time", &core.cache_time)
            .finish()
    }
}
