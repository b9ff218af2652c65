//! Query observer.
//!
//! An [`Observer`] binds one consumer to one entry. It stays detached until
//! its first listener subscribes, then attaches to the entry and fetches if
//! the entry is missing or stale. While attached it keeps the stale timeout
//! and the refetch interval running, and derives a [`QueryResult`] on every
//! entry update. [`NotifyOnChange`] decides which changes reach listeners.
//! When the last listener leaves it clears its timers and detaches, which
//! may cancel the entry's fetch and start garbage collection.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::options::{NotifyOnChange, ObserverOptions, Projection, RefetchInterval, RefetchOptions};
use super::predicates::{is_stale, should_fetch_on, should_fetch_on_mount, should_fetch_optionally};
use super::result::{FieldTracker, QueryResult, ResultHandle};
use crate::client::Client;
use crate::error::{CancelledError, ConfigError, FetchError, QueryError, SelectError};
use crate::query::{
    replace_equal_deep, ActionKind, AnyEntry, CacheEvent, Entry, EntryObserver, FetchOptions,
    ObserverId, PendingResult, QueryData, QueryOptions, QueryStatus,
};
use crate::runtime::clock::time_until_stale;
use crate::runtime::{spawn_timer, Subscribable, Subscription};

/// Which side effects a result update should run.
#[derive(Debug, Clone, Copy)]
struct NotifyFlags {
    on_success: bool,
    on_error: bool,
    listeners: bool,
}

impl Default for NotifyFlags {
    fn default() -> Self {
        Self {
            on_success: false,
            on_error: false,
            listeners: true,
        }
    }
}

struct ObserverCore<T, E, S> {
    options: ObserverOptions<T, E, S>,
    entry: Arc<Entry<T, E>>,
    /// Entry update counters when this observer switched to the entry.
    initial_counts: (u64, u64),
    result: Option<QueryResult<S, E>>,
    /// Entry data the current result was derived from.
    result_source: Option<Arc<T>>,
    result_select: Option<usize>,
    previous_entry_result: Option<QueryResult<S, E>>,
    previous_select_error: Option<QueryError<E>>,
    stale_timer: Option<JoinHandle<()>>,
    refetch_timer: Option<JoinHandle<()>>,
    current_refetch_interval: Option<Duration>,
}

impl<T, E, S> ObserverCore<T, E, S> {
    fn clear_stale_timer(&mut self) {
        if let Some(timer) = self.stale_timer.take() {
            timer.abort();
        }
    }

    fn clear_refetch_timer(&mut self) {
        if let Some(timer) = self.refetch_timer.take() {
            timer.abort();
        }
    }
}

fn update_counts<T, E>(entry: &Entry<T, E>) -> (u64, u64)
where
    T: QueryData,
    E: FetchError,
{
    let state = entry.state();
    (state.data_update_count, state.error_update_count)
}

pub(crate) struct ObserverInner<T, E, S> {
    this: Weak<Self>,
    id: ObserverId,
    client: Client,
    listeners: Subscribable<QueryResult<S, E>>,
    tracker: Arc<FieldTracker>,
    core: Mutex<ObserverCore<T, E, S>>,
}

/// Derives a presentation result from one entry for one consumer.
///
/// The observer attaches to its entry when the first listener subscribes
/// and detaches when the last one leaves. While attached it fetches on
/// mount and on option changes as its options dictate, and keeps a
/// staleness timer and an optional polling timer running.
///
/// Fetching runs on Tokio, so subscribing and changing options must
/// happen inside a Tokio runtime.
pub struct Observer<T, E, S = T> {
    inner: Arc<ObserverInner<T, E, S>>,
}

impl<T, E, S> Clone for Observer<T, E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E, S> Observer<T, E, S>
where
    T: QueryData,
    E: FetchError,
    S: QueryData,
{
    pub fn new(client: &Client, options: ObserverOptions<T, E, S>) -> Result<Self, ConfigError> {
        let options = client.default_observer_options(options);
        let entry = client.registry().build(options.query.clone(), None)?;

        let core = ObserverCore {
            options,
            initial_counts: update_counts(&entry),
            entry,
            result: None,
            result_source: None,
            result_select: None,
            previous_entry_result: None,
            previous_select_error: None,
            stale_timer: None,
            refetch_timer: None,
            current_refetch_interval: None,
        };

        let inner = Arc::new_cyclic(|this| ObserverInner {
            this: this.clone(),
            id: ObserverId::new(),
            client: client.clone(),
            listeners: Subscribable::new(),
            tracker: Arc::new(FieldTracker::default()),
            core: Mutex::new(core),
        });
        inner.update_result(NotifyFlags::default());

        Ok(Self { inner })
    }

    pub fn id(&self) -> ObserverId {
        self.inner.id
    }

    /// Change options. A changed key switches entries.
    pub fn set_options(&self, options: ObserverOptions<T, E, S>) -> Result<(), ConfigError> {
        self.inner.set_options(options)
    }

    pub fn options(&self) -> ObserverOptions<T, E, S> {
        self.inner.core.lock().options.clone()
    }

    pub fn entry(&self) -> Arc<Entry<T, E>> {
        self.inner.core.lock().entry.clone()
    }

    /// Subscribe to result changes. Dropping the returned handle
    /// unsubscribes; the last unsubscribe detaches the observer.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueryResult<S, E>) + Send + Sync + 'static,
    {
        self.inner.subscribe(Arc::new(listener))
    }

    pub fn has_listeners(&self) -> bool {
        self.inner.listeners.has_listeners()
    }

    pub fn current_result(&self) -> QueryResult<S, E> {
        self.inner.current_result()
    }

    /// The result `options` would produce right now, without switching
    /// to them.
    pub fn optimistic_result(&self, options: ObserverOptions<T, E, S>) -> Result<QueryResult<S, E>, ConfigError> {
        self.inner.optimistic_result(options)
    }

    pub fn refetch(
        &self,
        options: RefetchOptions,
    ) -> BoxFuture<'static, Result<QueryResult<S, E>, QueryError<E>>> {
        self.inner.refetch(options)
    }

    /// Remove the observed entry from the cache.
    pub fn remove(&self) {
        self.inner.remove();
    }

    /// Detach from the entry and stop all timers.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl<T, E, S> ObserverInner<T, E, S>
where
    T: QueryData,
    E: FetchError,
    S: QueryData,
{
    fn as_entry_observer(&self) -> Option<Arc<dyn EntryObserver<T, E>>> {
        self.this
            .upgrade()
            .map(|inner| inner as Arc<dyn EntryObserver<T, E>>)
    }

    fn handle(&self) -> Arc<dyn ResultHandle<S, E>> {
        Arc::new(ObserverHandle(self.this.clone()))
    }

    fn set_options(&self, mut options: ObserverOptions<T, E, S>) -> Result<(), ConfigError> {
        let (previous_options, previous_entry) = {
            let core = self.core.lock();
            (core.options.clone(), core.entry.clone())
        };

        if options.query.key.is_none() {
            options.query.key = previous_options.query.key.clone();
        }
        let options = self.client.default_observer_options(options);
        let entry = self.client.registry().build(options.query.clone(), None)?;

        let mounted = self.listeners.has_listeners();
        let entry_changed = !Arc::ptr_eq(&entry, &previous_entry);
        {
            let mut core = self.core.lock();
            if entry_changed {
                core.initial_counts = update_counts(&entry);
                core.previous_entry_result = core.result.clone();
                core.entry = Arc::clone(&entry);
            }
            core.options = options.clone();
        }

        if entry_changed {
            tracing::debug!(from = %previous_entry.hash(), to = %entry.hash(), "observer switched entry");
            if mounted {
                previous_entry.remove_observer(self.id);
                if let Some(observer) = self.as_entry_observer() {
                    entry.add_observer(observer);
                }
            }
        }

        if mounted && should_fetch_optionally(&entry, &previous_entry, &options, &previous_options) {
            self.start_fetch();
        }

        self.update_result(NotifyFlags::default());

        if mounted {
            if entry_changed
                || options.enabled != previous_options.enabled
                || options.stale_time != previous_options.stale_time
            {
                self.update_stale_timer();
            }

            let next_interval = self.compute_refetch_interval();
            let current_interval = self.core.lock().current_refetch_interval;
            if entry_changed
                || options.enabled != previous_options.enabled
                || next_interval != current_interval
            {
                self.update_refetch_interval(next_interval);
            }
        }

        Ok(())
    }

    fn subscribe(&self, listener: Arc<dyn Fn(&QueryResult<S, E>) + Send + Sync>) -> Subscription {
        let (id, count) = self.listeners.add(listener);
        if count == 1 {
            self.on_first_subscribe();
        }

        let this = self.this.clone();
        Subscription::new(move || {
            if let Some(inner) = this.upgrade() {
                if inner.listeners.remove(id) == Some(0) {
                    inner.destroy();
                }
            }
        })
    }

    fn on_first_subscribe(&self) {
        let (entry, options) = {
            let core = self.core.lock();
            (core.entry.clone(), core.options.clone())
        };

        if let Some(observer) = self.as_entry_observer() {
            entry.add_observer(observer);
        }

        if should_fetch_on_mount(&entry, &options) {
            self.start_fetch();
        }

        self.update_timers();
    }

    fn destroy(&self) {
        self.listeners.clear();
        let entry = {
            let mut core = self.core.lock();
            core.clear_stale_timer();
            core.clear_refetch_timer();
            core.entry.clone()
        };
        entry.remove_observer(self.id);
    }

    /// Fire-and-forget fetch. Outcomes reach listeners through the entry.
    fn start_fetch(&self) {
        let _pending = self.execute_fetch(FetchOptions::default());
    }

    fn execute_fetch(&self, fetch_options: FetchOptions) -> PendingResult<T, E> {
        let (entry, query) = {
            let core = self.core.lock();
            (core.entry.clone(), core.options.query.clone())
        };
        entry.fetch(Some(query), fetch_options)
    }

    fn refetch(
        &self,
        options: RefetchOptions,
    ) -> BoxFuture<'static, Result<QueryResult<S, E>, QueryError<E>>> {
        let pending = self.execute_fetch(FetchOptions {
            cancel_refetch: options.cancel_refetch,
            meta: None,
        });
        let this = self.this.clone();

        async move {
            let outcome = pending.await;
            let inner = this
                .upgrade()
                .ok_or_else(|| QueryError::from(CancelledError::default()))?;
            inner.update_result(NotifyFlags::default());

            match outcome {
                Err(error) if options.throw_on_error => Err(error),
                _ => Ok(inner.current_result()),
            }
        }
        .boxed()
    }

    fn remove(&self) {
        let entry: Arc<dyn AnyEntry> = self.core.lock().entry.clone();
        self.client.registry().remove(&entry);
    }

    fn current_result(&self) -> QueryResult<S, E> {
        if let Some(result) = self.core.lock().result.clone() {
            return result;
        }
        self.update_result(NotifyFlags::default());
        self.core.lock().result.clone().unwrap_or_default()
    }

    fn optimistic_result(&self, options: ObserverOptions<T, E, S>) -> Result<QueryResult<S, E>, ConfigError> {
        let options = self.client.default_observer_options(options);
        let entry = self.client.registry().build(options.query.clone(), None)?;
        let mut core = self.core.lock();
        Ok(self.create_result(&mut core, &entry, &options).0)
    }

    fn on_entry_update(&self, action: ActionKind) {
        let flags = NotifyFlags {
            on_success: action == ActionKind::Success,
            on_error: action == ActionKind::Error,
            listeners: true,
        };
        self.update_result(flags);

        if self.listeners.has_listeners() {
            self.update_timers();
        }
    }

    /// Derive a result for `entry` under `options`.
    ///
    /// Returns the result and the entry data it was derived from.
    fn create_result(
        &self,
        core: &mut ObserverCore<T, E, S>,
        entry: &Arc<Entry<T, E>>,
        options: &ObserverOptions<T, E, S>,
    ) -> (QueryResult<S, E>, Option<Arc<T>>) {
        let entry_changed = !Arc::ptr_eq(entry, &core.entry);
        let initial_counts = if entry_changed {
            update_counts(entry)
        } else {
            core.initial_counts
        };
        let previous_entry_result = if entry_changed {
            core.result.clone()
        } else {
            core.previous_entry_result.clone()
        };

        let state = entry.state();
        let mut status = state.status;
        let mut is_fetching = state.is_fetching;
        let mut data_updated_at = state.data_updated_at;
        let mut error = state.error.clone();
        let mut error_updated_at = state.error_updated_at;
        let mut data: Option<Arc<S>> = None;
        let mut is_previous_data = false;
        let mut is_placeholder_data = false;

        if options.is_optimistic() {
            let mounted = self.listeners.has_listeners();
            let fetch_on_mount = !mounted && should_fetch_on_mount(entry, options);
            let fetch_optionally =
                mounted && should_fetch_optionally(entry, &core.entry, options, &core.options);

            if fetch_on_mount || fetch_optionally {
                is_fetching = true;
                if data_updated_at == 0 {
                    status = QueryStatus::Loading;
                }
            }
        }

        let keep_previous = previous_entry_result.as_ref().filter(|previous| {
            options.keeps_previous_data()
                && state.data_update_count == 0
                && previous.status == QueryStatus::Success
                && status != QueryStatus::Error
        });

        if let Some(previous) = keep_previous {
            data = previous.data.clone();
            data_updated_at = previous.data_updated_at;
            status = previous.status;
            is_previous_data = true;
        } else if let Some(source) = &state.data {
            let select_id = options.projection.select_id();
            let memoized = select_id.is_some()
                && core.result_select == select_id
                && core.previous_select_error.is_none()
                && core
                    .result_source
                    .as_ref()
                    .is_some_and(|previous| Arc::ptr_eq(previous, source));

            if memoized {
                data = core.result.as_ref().and_then(|result| result.data.clone());
            } else {
                let previous = core.result.as_ref().and_then(|result| result.data.as_ref());
                match project(&options.projection, source, previous, options.shares_structure()) {
                    Ok(projected) => {
                        data = Some(projected);
                        core.previous_select_error = None;
                    }
                    Err(select_error) => {
                        tracing::error!(hash = %entry.hash(), error = %select_error, "select failed");
                        let select_error = QueryError::from(select_error);
                        error = Some(select_error.clone());
                        core.previous_select_error = Some(select_error);
                        error_updated_at = self.client.runtime().now_ms();
                        status = QueryStatus::Error;
                    }
                }
            }
        }

        if status == QueryStatus::Loading && data.is_none() {
            if let Some(placeholder) = options.placeholder_data.as_ref().and_then(|p| p.resolve()) {
                let previous = core.result.as_ref().and_then(|result| result.data.as_ref());
                match project(&options.projection, &placeholder, previous, options.shares_structure()) {
                    Ok(projected) => {
                        data = Some(projected);
                        status = QueryStatus::Success;
                        is_placeholder_data = true;
                    }
                    Err(select_error) => {
                        tracing::error!(hash = %entry.hash(), error = %select_error, "select failed on placeholder data");
                        error = Some(QueryError::from(select_error));
                        error_updated_at = self.client.runtime().now_ms();
                        status = QueryStatus::Error;
                    }
                }
            }
        }

        let result = QueryResult {
            status,
            data,
            data_updated_at,
            error,
            error_updated_at,
            failure_count: state.fetch_failure_count,
            is_fetched: state.data_update_count > 0 || state.error_update_count > 0,
            is_fetched_after_mount: state.data_update_count > initial_counts.0
                || state.error_update_count > initial_counts.1,
            is_fetching,
            is_loading_error: status == QueryStatus::Error && state.data_updated_at == 0,
            is_placeholder_data,
            is_previous_data,
            is_refetch_error: status == QueryStatus::Error && state.data_updated_at != 0,
            is_refetching: is_fetching && status != QueryStatus::Loading,
            is_stale: is_stale(entry, options),
            tracker: Some(Arc::clone(&self.tracker)),
            handle: Some(self.handle()),
        };

        (result, state.data)
    }

    fn update_result(&self, flags: NotifyFlags) {
        let (result, previous, options, entry) = {
            let mut core = self.core.lock();
            let entry = core.entry.clone();
            let options = core.options.clone();
            let (result, source) = self.create_result(&mut core, &entry, &options);

            core.result_source = source;
            core.result_select = options.projection.select_id();
            let previous = core.result.replace(result.clone());
            (result, previous, options, entry)
        };

        if previous.as_ref().is_some_and(|previous| previous.same_as(&result)) {
            return;
        }

        let notify_listeners =
            flags.listeners && self.should_notify_listeners(&result, previous.as_ref(), &options);
        self.notify(result, flags, notify_listeners, &options, entry);
    }

    fn should_notify_listeners(
        &self,
        result: &QueryResult<S, E>,
        previous: Option<&QueryResult<S, E>>,
        options: &ObserverOptions<T, E, S>,
    ) -> bool {
        let Some(previous) = previous else {
            return true;
        };

        let policy = options.notify_on_change.clone().unwrap_or_default();
        let exclusions = &options.notify_on_change_exclusions;
        if policy == NotifyOnChange::All && exclusions.is_empty() {
            return true;
        }

        let included = match policy {
            NotifyOnChange::All => None,
            NotifyOnChange::Props(fields) => Some(fields),
            NotifyOnChange::Tracked => {
                let tracked = self.tracker.fields();
                if tracked.is_empty() {
                    return true;
                }
                Some(tracked)
            }
        };

        super::result::ResultField::ALL.into_iter().any(|field| {
            result.differs(previous, field)
                && !exclusions.contains(&field)
                && included.as_ref().map_or(true, |fields| fields.contains(&field))
        })
    }

    fn notify(
        &self,
        result: QueryResult<S, E>,
        flags: NotifyFlags,
        notify_listeners: bool,
        options: &ObserverOptions<T, E, S>,
        entry: Arc<Entry<T, E>>,
    ) {
        let notify = self.client.runtime().notify();
        notify.batch(|| {
            if flags.on_success {
                if let Some(data) = result.data.clone() {
                    let on_success = options.on_success.clone();
                    let on_settled = options.on_settled.clone();
                    notify.schedule(move || {
                        if let Some(on_success) = on_success {
                            on_success(&data);
                        }
                        if let Some(on_settled) = on_settled {
                            on_settled(Some(&data), None);
                        }
                    });
                }
            } else if flags.on_error {
                if let Some(error) = result.error.clone() {
                    let on_error = options.on_error.clone();
                    let on_settled = options.on_settled.clone();
                    notify.schedule(move || {
                        if let Some(on_error) = on_error {
                            on_error(&error);
                        }
                        if let Some(on_settled) = on_settled {
                            on_settled(None, Some(&error));
                        }
                    });
                }
            }

            if notify_listeners {
                for listener in self.listeners.snapshot() {
                    let result = result.clone();
                    notify.schedule(move || listener(&result));
                }
            }

            self.client
                .registry()
                .notify(CacheEvent::ObserverResultUpdated { entry });
        });
    }

    fn update_timers(&self) {
        self.update_stale_timer();
        let interval = self.compute_refetch_interval();
        self.update_refetch_interval(interval);
    }

    fn update_stale_timer(&self) {
        let mut core = self.core.lock();
        core.clear_stale_timer();

        let stale_time = core.options.resolved_stale_time();
        let Some(result) = &core.result else {
            return;
        };
        if result.is_stale || stale_time == Duration::MAX {
            return;
        }

        let now = self.client.runtime().now_ms();
        let wait = time_until_stale(result.data_updated_at, stale_time, now) + Duration::from_millis(1);
        let this = self.this.clone();

        core.stale_timer = spawn_timer(async move {
            tokio::time::sleep(wait).await;
            if let Some(inner) = this.upgrade() {
                let already_stale = inner.core.lock().result.as_ref().is_some_and(|r| r.is_stale);
                if !already_stale {
                    inner.update_result(NotifyFlags::default());
                }
            }
        });
    }

    fn compute_refetch_interval(&self) -> Option<Duration> {
        let (interval, data, entry) = {
            let core = self.core.lock();
            (
                core.options.refetch_interval.clone(),
                core.result.as_ref().and_then(|result| result.data.clone()),
                core.entry.clone(),
            )
        };

        match interval? {
            RefetchInterval::Every(period) => Some(period),
            RefetchInterval::Dynamic(f) => f(data.as_ref(), &entry),
        }
    }

    fn update_refetch_interval(&self, next: Option<Duration>) {
        let mut core = self.core.lock();
        core.clear_refetch_timer();
        core.current_refetch_interval = next;

        if !core.options.is_enabled() {
            return;
        }
        let Some(period) = next.filter(|period| !period.is_zero()) else {
            return;
        };

        let in_background = core.options.polls_in_background();
        let focus = self.client.runtime().focus().clone();
        let this = self.this.clone();

        core.refetch_timer = spawn_timer(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = this.upgrade() else {
                    break;
                };
                if in_background || focus.is_focused() {
                    inner.start_fetch();
                }
            }
        });
    }
}

/// Apply the projection, sharing structure with the previous output.
fn project<T, S>(
    projection: &Projection<T, S>,
    source: &Arc<T>,
    previous: Option<&Arc<S>>,
    share: bool,
) -> Result<Arc<S>, SelectError>
where
    S: QueryData,
{
    match projection {
        Projection::Identity(identity) => Ok(identity(Arc::clone(source))),
        Projection::Select(select) => {
            let selected = Arc::new(select(source)?);
            Ok(if share {
                replace_equal_deep(previous, selected)
            } else {
                selected
            })
        }
    }
}

impl<T, E, S> EntryObserver<T, E> for ObserverInner<T, E, S>
where
    T: QueryData,
    E: FetchError,
    S: QueryData,
{
    fn id(&self) -> ObserverId {
        self.id
    }

    fn on_entry_update(&self, action: ActionKind) {
        ObserverInner::on_entry_update(self, action);
    }

    fn query_options(&self) -> QueryOptions<T, E> {
        self.core.lock().options.query.clone()
    }

    fn is_enabled(&self) -> bool {
        self.core.lock().options.is_enabled()
    }

    fn is_stale(&self) -> bool {
        let (entry, options) = {
            let core = self.core.lock();
            (core.entry.clone(), core.options.clone())
        };
        is_stale(&entry, &options)
    }

    fn should_fetch_on_window_focus(&self) -> bool {
        let (entry, options) = {
            let core = self.core.lock();
            (core.entry.clone(), core.options.clone())
        };
        should_fetch_on(options.refetch_on_window_focus, &entry, &options)
    }

    fn should_fetch_on_reconnect(&self) -> bool {
        let (entry, options) = {
            let core = self.core.lock();
            (core.entry.clone(), core.options.clone())
        };
        should_fetch_on(options.refetch_on_reconnect, &entry, &options)
    }

    fn refetch(&self) {
        self.start_fetch();
    }
}

struct ObserverHandle<T, E, S>(Weak<ObserverInner<T, E, S>>);

impl<T, E, S> ResultHandle<S, E> for ObserverHandle<T, E, S>
where
    T: QueryData,
    E: FetchError,
    S: QueryData,
{
    fn refetch(&self, options: RefetchOptions) -> BoxFuture<'static, Result<QueryResult<S, E>, QueryError<E>>> {
        match self.0.upgrade() {
            Some(inner) => inner.refetch(options),
            None => futures_util::future::ready(Err(CancelledError::default().into())).boxed(),
        }
    }

    fn remove(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.remove();
        }
    }
}
