//! Entry Registry
//!
//! Maps query hashes to live entries and fans cache events out to
//! registry listeners. Entries of different data types live side by side
//! behind the type-erased [`AnyEntry`] handle; typed access downcasts.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::RwLock;

use super::entry::Entry;
use super::filters::QueryFilters;
use super::key::{hash_key_by_options, QueryHash, QueryKey};
use super::options::QueryOptions;
use super::retryer::CancelOptions;
use super::state::{ActionKind, EntryState, QueryStatus};
use super::structural::QueryData;
use crate::error::{ConfigError, FetchError};
use crate::runtime::{Runtime, Subscribable, Subscription};

/// Type-erased view of an entry.
pub trait AnyEntry: Send + Sync + 'static {
    fn hash(&self) -> &QueryHash;

    fn key(&self) -> &QueryKey;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn status(&self) -> QueryStatus;

    fn data_updated_at(&self) -> u64;

    fn is_fetching(&self) -> bool;

    /// At least one enabled observer is attached.
    fn is_active(&self) -> bool;

    fn is_stale(&self) -> bool;

    fn observer_count(&self) -> usize;

    fn invalidate(&self);

    fn cancel(&self, options: CancelOptions) -> BoxFuture<'static, ()>;

    fn refetch(&self) -> BoxFuture<'static, ()>;

    fn on_focus(&self);

    fn on_online(&self);

    /// Stop timers and silently cancel any fetch.
    fn destroy(&self);
}

impl fmt::Debug for dyn AnyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyEntry")
            .field("hash", self.hash())
            .field("status", &self.status())
            .field("is_fetching", &self.is_fetching())
            .finish()
    }
}

/// Pointer identity, ignoring vtables.
fn same_entry(a: &Arc<dyn AnyEntry>, b: &Arc<dyn AnyEntry>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Registry-level notification.
#[derive(Clone)]
pub enum CacheEvent {
    Added { entry: Arc<dyn AnyEntry> },
    Removed { entry: Arc<dyn AnyEntry> },
    Updated { entry: Arc<dyn AnyEntry>, action: ActionKind },
    ObserverAdded { entry: Arc<dyn AnyEntry> },
    ObserverRemoved { entry: Arc<dyn AnyEntry> },
    ObserverResultUpdated { entry: Arc<dyn AnyEntry> },
}

impl CacheEvent {
    pub fn entry(&self) -> &Arc<dyn AnyEntry> {
        match self {
            CacheEvent::Added { entry }
            | CacheEvent::Removed { entry }
            | CacheEvent::Updated { entry, .. }
            | CacheEvent::ObserverAdded { entry }
            | CacheEvent::ObserverRemoved { entry }
            | CacheEvent::ObserverResultUpdated { entry } => entry,
        }
    }
}

impl fmt::Debug for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheEvent::Added { .. } => "Added",
            CacheEvent::Removed { .. } => "Removed",
            CacheEvent::Updated { .. } => "Updated",
            CacheEvent::ObserverAdded { .. } => "ObserverAdded",
            CacheEvent::ObserverRemoved { .. } => "ObserverRemoved",
            CacheEvent::ObserverResultUpdated { .. } => "ObserverResultUpdated",
        };
        let mut s = f.debug_struct(name);
        s.field("hash", self.entry().hash());
        if let CacheEvent::Updated { action, .. } = self {
            s.field("action", action);
        }
        s.finish()
    }
}

/// What cache-level hooks are told about the entry.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub key: QueryKey,
    pub hash: QueryHash,
    pub observers: usize,
}

type SuccessHook = Arc<dyn Fn(&dyn Any, &EntryInfo) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&dyn fmt::Display, &EntryInfo) + Send + Sync>;

/// Hooks run for every entry, after the entry's own dispatch.
#[derive(Clone, Default)]
pub struct CacheConfig {
    pub on_success: Option<SuccessHook>,
    pub on_error: Option<ErrorHook>,
}

impl CacheConfig {
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Any, &EntryInfo) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn fmt::Display, &EntryInfo) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Hash-keyed store of live entries.
pub struct Registry {
    this: Weak<Registry>,
    runtime: Runtime,
    config: CacheConfig,
    entries: RwLock<IndexMap<QueryHash, Arc<dyn AnyEntry>>>,
    listeners: Subscribable<CacheEvent>,
}

impl Registry {
    pub fn new(runtime: Runtime, config: CacheConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            runtime,
            config,
            entries: RwLock::new(IndexMap::new()),
            listeners: Subscribable::new(),
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Get the entry for `options`, creating it if absent.
    pub fn build<T, E>(
        &self,
        options: QueryOptions<T, E>,
        state: Option<EntryState<T, E>>,
    ) -> Result<Arc<Entry<T, E>>, ConfigError>
    where
        T: QueryData,
        E: FetchError,
    {
        let key = options.key.clone().ok_or(ConfigError::MissingKey)?;
        let hash = options
            .hash
            .clone()
            .unwrap_or_else(|| hash_key_by_options(&key, options.key_hash_fn.as_ref()));

        if let Some(existing) = self.get(&hash) {
            return downcast(existing);
        }

        let candidate = Entry::new(
            key,
            hash.clone(),
            options,
            state,
            self.this.clone(),
            self.runtime.clone(),
        );
        let erased: Arc<dyn AnyEntry> = candidate.clone();

        let (entry, inserted) = {
            let mut entries = self.entries.write();
            match entries.get(&hash) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    entries.insert(hash.clone(), Arc::clone(&erased));
                    (erased, true)
                }
            }
        };

        if inserted {
            tracing::debug!(hash = %hash, "entry added");
            self.notify(CacheEvent::Added {
                entry: Arc::clone(&entry),
            });
        } else {
            candidate.destroy();
        }

        downcast(entry)
    }

    pub fn get(&self, hash: &QueryHash) -> Option<Arc<dyn AnyEntry>> {
        self.entries.read().get(hash).cloned()
    }

    /// Typed lookup. Fails if the entry holds other types.
    pub fn get_typed<T, E>(&self, hash: &QueryHash) -> Result<Option<Arc<Entry<T, E>>>, ConfigError>
    where
        T: QueryData,
        E: FetchError,
    {
        self.get(hash).map(downcast).transpose()
    }

    /// Remove `entry` if it is still the one registered under its hash.
    pub fn remove(&self, entry: &Arc<dyn AnyEntry>) {
        let removed = {
            let mut entries = self.entries.write();
            match entries.get(entry.hash()) {
                Some(current) if same_entry(current, entry) => entries.shift_remove(entry.hash()),
                _ => None,
            }
        };

        if let Some(removed) = removed {
            removed.destroy();
            tracing::debug!(hash = %removed.hash(), "entry removed");
            self.notify(CacheEvent::Removed { entry: removed });
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.runtime.notify().batch(|| {
            for entry in self.all() {
                self.remove(&entry);
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every entry, in insertion order.
    pub fn all(&self) -> Vec<Arc<dyn AnyEntry>> {
        self.entries.read().values().cloned().collect()
    }

    /// First entry matching `filters`. Keys match exactly unless the
    /// filters say otherwise.
    pub fn find(&self, filters: &QueryFilters) -> Option<Arc<dyn AnyEntry>> {
        let mut filters = filters.clone();
        filters.exact = filters.exact.or(Some(true));
        self.all().into_iter().find(|entry| filters.matches(entry.as_ref()))
    }

    pub fn find_all(&self, filters: &QueryFilters) -> Vec<Arc<dyn AnyEntry>> {
        self.all()
            .into_iter()
            .filter(|entry| filters.matches(entry.as_ref()))
            .collect()
    }

    /// Deliver `event` to every registry listener through the scheduler.
    pub fn notify(&self, event: CacheEvent) {
        let listeners = self.listeners.snapshot();
        if listeners.is_empty() {
            return;
        }

        let notify = self.runtime.notify();
        notify.batch(|| {
            for listener in listeners {
                let event = event.clone();
                notify.schedule(move || listener(&event));
            }
        });
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let (id, _) = self.listeners.add(Arc::new(listener));
        let this = self.this.clone();
        Subscription::new(move || {
            if let Some(registry) = this.upgrade() {
                registry.listeners.remove(id);
            }
        })
    }

    pub fn on_focus(&self) {
        self.runtime.notify().batch(|| {
            for entry in self.all() {
                entry.on_focus();
            }
        });
    }

    pub fn on_online(&self) {
        self.runtime.notify().batch(|| {
            for entry in self.all() {
                entry.on_online();
            }
        });
    }

    pub(crate) fn report_success(&self, data: &dyn Any, info: EntryInfo) {
        if let Some(on_success) = &self.config.on_success {
            on_success(data, &info);
        }
    }

    pub(crate) fn report_error(&self, error: &dyn fmt::Display, info: EntryInfo) {
        if let Some(on_error) = &self.config.on_error {
            on_error(error, &info);
        }
    }
}

fn downcast<T, E>(entry: Arc<dyn AnyEntry>) -> Result<Arc<Entry<T, E>>, ConfigError>
where
    T: QueryData,
    E: FetchError,
{
    let hash = entry.hash().clone();
    entry
        .into_any()
        .downcast::<Entry<T, E>>()
        .map_err(|_| ConfigError::TypeMismatch { hash })
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.len())
            .field("listeners", &self.listeners.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::options::{fetch_fn, FetchOptions, SetDataOptions};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    fn registry() -> Arc<Registry> {
        Registry::new(Runtime::new(), CacheConfig::default())
    }

    fn options(key: &str) -> QueryOptions<u32, String> {
        QueryOptions::new(key)
    }

    #[tokio::test]
    async fn build_returns_the_same_entry() {
        let registry = registry();
        let a = registry.build(options("todos"), None).unwrap();
        let b = registry.build(options("todos"), None).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn build_requires_a_key() {
        let registry = registry();
        let result = registry.build::<u32, String>(QueryOptions::default(), None);
        assert!(matches!(result, Err(ConfigError::MissingKey)));
    }

    #[tokio::test]
    async fn typed_lookup_rejects_other_types() {
        let registry = registry();
        let entry = registry.build(options("n"), None).unwrap();

        let same = registry.get_typed::<u32, String>(entry.hash()).unwrap();
        assert!(same.is_some());

        let other = registry.get_typed::<String, String>(entry.hash());
        assert!(matches!(other, Err(ConfigError::TypeMismatch { .. })));

        let missing = registry
            .get_typed::<u32, String>(&QueryHash::from("[\"nope\"]"))
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_checks_identity() {
        let registry = registry();
        let entry: Arc<dyn AnyEntry> = registry.build(options("a"), None).unwrap();

        registry.remove(&entry);
        assert!(registry.is_empty());
        registry.remove(&entry);

        // A new entry under the same hash is not removed through the old handle
        let fresh: Arc<dyn AnyEntry> = registry.build(options("a"), None).unwrap();
        registry.remove(&entry);
        assert_eq!(registry.len(), 1);
        assert!(same_entry(&registry.get(fresh.hash()).unwrap(), &fresh));
    }

    #[tokio::test]
    async fn listeners_receive_events_in_order() {
        let registry = registry();
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        let _sub = registry.subscribe(move |event| log.lock().push(format!("{event:?}")));

        let entry = registry.build(options("a"), None).unwrap();
        entry.set_data(1_u32, SetDataOptions::default());
        registry.remove(&(entry as Arc<dyn AnyEntry>));
        registry.runtime().notify().settle().await;

        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert!(events[0].starts_with("Added"));
        assert!(events[1].starts_with("Updated"));
        assert!(events[1].contains("Success"));
        assert!(events[2].starts_with("Removed"));
    }

    #[tokio::test]
    async fn dropped_subscription_stops_events() {
        let registry = registry();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let sub = registry.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.build(options("a"), None).unwrap();
        registry.runtime().notify().settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(sub);
        registry.build(options("b"), None).unwrap();
        registry.runtime().notify().settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn find_uses_exact_keys_by_default() {
        let registry = registry();
        registry
            .build(QueryOptions::<u32, String>::new(QueryKey::from("todos").with(1)), None)
            .unwrap();
        registry
            .build(QueryOptions::<u32, String>::new(QueryKey::from("todos").with(2)), None)
            .unwrap();

        let prefix = QueryFilters::new().key("todos");
        assert!(registry.find(&prefix).is_none());
        assert_eq!(registry.find_all(&prefix).len(), 2);

        let exact = QueryFilters::new().key(QueryKey::from("todos").with(2));
        assert!(registry.find(&exact).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hooks_see_outcomes() {
        let successes = Arc::new(AtomicI32::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let successes_clone = successes.clone();
        let errors_clone = errors.clone();
        let config = CacheConfig::default()
            .on_success(move |data, info| {
                assert_eq!(data.downcast_ref::<u32>(), Some(&5));
                assert_eq!(info.observers, 0);
                successes_clone.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |error, info| {
                errors_clone.lock().push(format!("{}: {error}", info.hash));
            });
        let registry = Registry::new(Runtime::new(), config);

        let ok = registry
            .build(
                options("ok").fetch_fn(fetch_fn(|_ctx| async { Ok::<u32, String>(5) })),
                None,
            )
            .unwrap();
        ok.fetch(None, FetchOptions::default()).await.unwrap();

        let failing = registry
            .build(
                options("bad")
                    .retry(false)
                    .fetch_fn(fetch_fn(|_ctx| async { Err::<u32, String>("nope".into()) })),
                None,
            )
            .unwrap();
        failing.fetch(None, FetchOptions::default()).await.unwrap_err();

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(*errors.lock(), vec!["[\"bad\"]: nope".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unobserved_entries_are_collected() {
        let registry = registry();
        registry
            .build(options("short").cache_time(Duration::from_millis(50)), None)
            .unwrap();
        registry
            .build(options("forever").cache_time(Duration::MAX), None)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(51)).await;
        tokio::task::yield_now().await;

        let remaining: Vec<_> = registry.all().iter().map(|e| e.hash().to_string()).collect();
        assert_eq!(remaining, vec!["[\"forever\"]".to_string()]);
    }
}
