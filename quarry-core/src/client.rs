//! Client
//!
//! The consumer-facing handle: owns the registry and the runtime, applies
//! default options, wires focus and connectivity into the cache, and offers
//! bulk operations over entries selected by [`QueryFilters`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, ready, FutureExt};
use parking_lot::{Mutex, RwLock};

use crate::config::{ClientConfig, KeyedDefaults, QueryDefaults};
use crate::error::{ConfigError, FetchError, QueryError};
use crate::observer::ObserverOptions;
use crate::query::{
    hash_key_by_options, partial_match_key, CacheConfig, CancelOptions, EntryState, FetchOptions,
    QueryData, QueryFilters, QueryKey, QueryOptions, Registry, Retry, SetDataOptions, Updater,
};
use crate::runtime::{Runtime, Subscription};

struct ClientInner {
    registry: Arc<Registry>,
    runtime: Runtime,
    defaults: RwLock<QueryDefaults>,
    key_defaults: RwLock<Vec<KeyedDefaults>>,
    /// Focus and online subscriptions while mounted.
    mounted: Mutex<Vec<Subscription>>,
}

/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_runtime(Runtime::new(), config)
    }

    pub fn with_runtime(runtime: Runtime, config: ClientConfig) -> Self {
        Self::with_cache(runtime, config, CacheConfig::default())
    }

    /// Build with cache-level success and error hooks.
    pub fn with_cache(runtime: Runtime, config: ClientConfig, cache: CacheConfig) -> Self {
        let registry = Registry::new(runtime.clone(), cache);
        Self {
            inner: Arc::new(ClientInner {
                registry,
                runtime,
                defaults: RwLock::new(config.defaults),
                key_defaults: RwLock::new(config.key_defaults),
                mounted: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Forward focus and connectivity changes to the cache.
    ///
    /// Broadcasts only happen while the app is both focused and online.
    /// Mounting twice is a no-op.
    pub fn mount(&self) {
        let mut mounted = self.inner.mounted.lock();
        if !mounted.is_empty() {
            return;
        }

        let registry = Arc::downgrade(&self.inner.registry);
        let runtime = self.inner.runtime.clone();
        let on_focus = self.inner.runtime.focus().subscribe(move || {
            if let Some(registry) = registry.upgrade() {
                if runtime.is_favorable() {
                    registry.on_focus();
                }
            }
        });

        let registry = Arc::downgrade(&self.inner.registry);
        let runtime = self.inner.runtime.clone();
        let on_online = self.inner.runtime.online().subscribe(move || {
            if let Some(registry) = registry.upgrade() {
                if runtime.is_favorable() {
                    registry.on_online();
                }
            }
        });

        mounted.push(on_focus);
        mounted.push(on_online);
        tracing::debug!("client mounted");
    }

    pub fn unmount(&self) {
        let subscriptions = std::mem::take(&mut *self.inner.mounted.lock());
        if !subscriptions.is_empty() {
            tracing::debug!("client unmounted");
        }
        drop(subscriptions);
    }

    pub fn is_mounted(&self) -> bool {
        !self.inner.mounted.lock().is_empty()
    }

    pub fn query_defaults(&self) -> QueryDefaults {
        self.inner.defaults.read().clone()
    }

    pub fn set_default_options(&self, defaults: QueryDefaults) {
        *self.inner.defaults.write() = defaults;
    }

    /// Register defaults for keys matching `key`. Re-registering an equal
    /// key replaces its defaults.
    pub fn set_query_defaults(&self, key: impl Into<QueryKey>, defaults: QueryDefaults) {
        let key = key.into();
        let mut key_defaults = self.inner.key_defaults.write();
        match key_defaults.iter_mut().find(|existing| existing.key == key) {
            Some(existing) => existing.defaults = defaults,
            None => key_defaults.push(KeyedDefaults { key, defaults }),
        }
    }

    /// Defaults of the first registration whose key partially matches.
    pub fn get_query_defaults(&self, key: &QueryKey) -> Option<QueryDefaults> {
        self.inner
            .key_defaults
            .read()
            .iter()
            .find(|keyed| partial_match_key(key, &keyed.key))
            .map(|keyed| keyed.defaults.clone())
    }

    fn resolved_defaults(&self, key: Option<&QueryKey>) -> QueryDefaults {
        let client = self.inner.defaults.read().clone();
        match key.and_then(|key| self.get_query_defaults(key)) {
            Some(keyed) => keyed.merge(&client),
            None => client,
        }
    }

    /// Fill unset fields from per-key then client defaults, and resolve
    /// the hash.
    pub fn default_query_options<T, E>(&self, mut options: QueryOptions<T, E>) -> QueryOptions<T, E> {
        self.resolved_defaults(options.key.as_ref())
            .apply_to_query(&mut options);
        if options.hash.is_none() {
            options.hash = options
                .key
                .as_ref()
                .map(|key| hash_key_by_options(key, options.key_hash_fn.as_ref()));
        }
        options
    }

    pub fn default_observer_options<T, E, S>(
        &self,
        mut options: ObserverOptions<T, E, S>,
    ) -> ObserverOptions<T, E, S> {
        self.resolved_defaults(options.query.key.as_ref())
            .apply_to_observer(&mut options);
        options.query = self.default_query_options(options.query);
        options
    }

    pub fn get_query_data<T, E>(&self, key: impl Into<QueryKey>) -> Result<Option<Arc<T>>, ConfigError>
    where
        T: QueryData,
        E: FetchError,
    {
        let options: QueryOptions<T, E> = self.default_query_options(QueryOptions::new(key));
        let hash = options.hash.ok_or(ConfigError::MissingKey)?;
        let entry = self.inner.registry.get_typed::<T, E>(&hash)?;
        Ok(entry.and_then(|entry| entry.state().data))
    }

    pub fn get_query_state<T, E>(&self, key: impl Into<QueryKey>) -> Result<Option<EntryState<T, E>>, ConfigError>
    where
        T: QueryData,
        E: FetchError,
    {
        let options: QueryOptions<T, E> = self.default_query_options(QueryOptions::new(key));
        let hash = options.hash.ok_or(ConfigError::MissingKey)?;
        let entry = self.inner.registry.get_typed::<T, E>(&hash)?;
        Ok(entry.map(|entry| entry.state()))
    }

    /// Write data directly, creating the entry if needed.
    pub fn set_query_data<T, E>(
        &self,
        key: impl Into<QueryKey>,
        updater: impl Into<Updater<T>>,
        options: SetDataOptions,
    ) -> Result<Arc<T>, ConfigError>
    where
        T: QueryData,
        E: FetchError,
    {
        let query: QueryOptions<T, E> = self.default_query_options(QueryOptions::new(key));
        let entry = self.inner.registry.build(query, None)?;
        Ok(entry.set_data(updater, options))
    }

    /// Resolve with cached data if it is fresh under `stale_time`,
    /// otherwise fetch. Retries default to off.
    ///
    /// Must be awaited inside a Tokio runtime.
    pub fn fetch_query<T, E>(
        &self,
        options: QueryOptions<T, E>,
        stale_time: Option<Duration>,
    ) -> Result<impl Future<Output = Result<Arc<T>, QueryError<E>>> + Send + 'static, ConfigError>
    where
        T: QueryData,
        E: FetchError,
    {
        let mut options = self.default_query_options(options);
        if options.retry.is_none() {
            options.retry = Some(Retry::Never);
        }
        let entry = self.inner.registry.build(options.clone(), None)?;

        let state = entry.state();
        let stale_time = stale_time.unwrap_or(Duration::ZERO);
        if let Some(data) = state.data.filter(|_| !entry.is_stale_by_time(stale_time)) {
            tracing::trace!(hash = %entry.hash(), "fetch_query served from cache");
            return Ok(ready(Ok(data)).left_future());
        }

        Ok(entry.fetch(Some(options), FetchOptions::default()).right_future())
    }

    /// Mark matching entries invalid, then refetch the active ones.
    pub fn invalidate_queries(&self, filters: QueryFilters) -> impl Future<Output = ()> + Send + 'static {
        let entries = self.inner.registry.find_all(&filters);
        self.inner.runtime.notify().batch(|| {
            for entry in &entries {
                entry.invalidate();
            }
        });

        let refetches: Vec<_> = entries
            .iter()
            .filter(|entry| entry.is_active())
            .map(|entry| entry.refetch())
            .collect();
        tracing::debug!(invalidated = entries.len(), refetching = refetches.len(), "queries invalidated");

        join_all(refetches).map(|_| ())
    }

    /// Cancel in-flight fetches of matching entries. Resolves once every
    /// cancelled fetch has settled.
    pub fn cancel_queries(
        &self,
        filters: QueryFilters,
        options: CancelOptions,
    ) -> impl Future<Output = ()> + Send + 'static {
        let entries = self.inner.registry.find_all(&filters);
        let cancels: Vec<_> = self.inner.runtime.notify().batch(|| {
            entries.iter().map(|entry| entry.cancel(options)).collect()
        });
        join_all(cancels).map(|_| ())
    }

    pub fn remove_queries(&self, filters: QueryFilters) {
        let entries = self.inner.registry.find_all(&filters);
        self.inner.runtime.notify().batch(|| {
            for entry in &entries {
                self.inner.registry.remove(entry);
            }
        });
    }

    /// Number of matching entries with a fetch in flight.
    pub fn is_fetching(&self, filters: QueryFilters) -> usize {
        let filters = filters.fetching(true);
        self.inner.registry.find_all(&filters).len()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.registry.clear();
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("entries", &self.inner.registry.len())
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySetting;
    use crate::query::fetch_fn;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting(key: &str, calls: &Arc<AtomicI32>) -> QueryOptions<u32, String> {
        let counter = calls.clone();
        QueryOptions::new(key).fetch_fn(fetch_fn(move |_ctx| {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) as u32 + 1) }
        }))
    }

    #[tokio::test]
    async fn key_defaults_override_client_defaults() {
        let client = Client::new(ClientConfig {
            defaults: QueryDefaults {
                retry: Some(RetrySetting::Times(5)),
                cache_time_ms: Some(10),
                ..QueryDefaults::default()
            },
            key_defaults: Vec::new(),
        });
        client.set_query_defaults(
            "todos",
            QueryDefaults {
                retry: Some(RetrySetting::Enabled(false)),
                ..QueryDefaults::default()
            },
        );

        let todos = client.default_query_options::<u32, String>(QueryOptions::new(QueryKey::from("todos").with(1)));
        assert!(matches!(todos.retry, Some(Retry::Never)));
        assert_eq!(todos.cache_time, Some(Duration::from_millis(10)));
        assert_eq!(todos.hash.as_ref().map(|h| h.as_str()), Some(r#"["todos",1]"#));

        let other = client.default_query_options::<u32, String>(QueryOptions::new("users"));
        assert!(matches!(other.retry, Some(Retry::Times(5))));
    }

    #[tokio::test]
    async fn set_query_defaults_replaces_equal_keys() {
        let client = Client::default();
        client.set_query_defaults("a", QueryDefaults { enabled: Some(false), ..QueryDefaults::default() });
        client.set_query_defaults("a", QueryDefaults { enabled: Some(true), ..QueryDefaults::default() });

        let defaults = client.get_query_defaults(&QueryKey::from("a")).unwrap();
        assert_eq!(defaults.enabled, Some(true));
        assert!(client.get_query_defaults(&QueryKey::from("b")).is_none());
    }

    #[tokio::test]
    async fn query_data_round_trips_through_the_cache() {
        let client = Client::default();
        assert!(client.get_query_data::<u32, String>("n").unwrap().is_none());

        client.set_query_data::<u32, String>("n", 4_u32, SetDataOptions::default()).unwrap();
        let doubled = client
            .set_query_data::<u32, String>("n", Updater::with(|previous| previous.map_or(0, |n| **n * 2)), SetDataOptions::default())
            .unwrap();
        assert_eq!(*doubled, 8);
        assert_eq!(client.get_query_data::<u32, String>("n").unwrap().as_deref(), Some(&8));

        let state = client.get_query_state::<u32, String>("n").unwrap().unwrap();
        assert_eq!(state.data_update_count, 2);

        let mismatch = client.get_query_data::<String, String>("n");
        assert!(matches!(mismatch, Err(ConfigError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn fetch_query_serves_fresh_data_without_fetching() {
        let client = Client::default();
        let calls = Arc::new(AtomicI32::new(0));

        let first = client.fetch_query(counting("n", &calls), None).unwrap().await.unwrap();
        assert_eq!(*first, 1);

        let cached = client
            .fetch_query(counting("n", &calls), Some(Duration::from_secs(60)))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(*cached, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let refetched = client.fetch_query(counting("n", &calls), None).unwrap().await.unwrap();
        assert_eq!(*refetched, 2);
    }

    #[tokio::test]
    async fn fetch_query_requires_a_key() {
        let client = Client::default();
        let result = client.fetch_query::<u32, String>(QueryOptions::default(), None);
        assert!(matches!(result, Err(ConfigError::MissingKey)));
    }

    #[tokio::test]
    async fn invalidate_marks_entries_stale() {
        let client = Client::default();
        client.set_query_data::<u32, String>("a", 1_u32, SetDataOptions::default()).unwrap();
        client.set_query_data::<u32, String>("b", 2_u32, SetDataOptions::default()).unwrap();

        client.invalidate_queries(QueryFilters::new().key("a")).await;

        let a = client.get_query_state::<u32, String>("a").unwrap().unwrap();
        let b = client.get_query_state::<u32, String>("b").unwrap().unwrap();
        assert!(a.is_invalidated);
        assert!(!b.is_invalidated);
    }

    #[tokio::test]
    async fn remove_and_count_queries() {
        let client = Client::default();
        client.set_query_data::<u32, String>(QueryKey::from("todos").with(1), 1_u32, SetDataOptions::default()).unwrap();
        client.set_query_data::<u32, String>(QueryKey::from("todos").with(2), 2_u32, SetDataOptions::default()).unwrap();
        client.set_query_data::<u32, String>("users", 3_u32, SetDataOptions::default()).unwrap();

        assert_eq!(client.is_fetching(QueryFilters::new()), 0);

        client.remove_queries(QueryFilters::new().key("todos").exact(false));
        assert_eq!(client.registry().len(), 1);
    }

    #[tokio::test]
    async fn mount_is_idempotent() {
        let client = Client::default();
        client.mount();
        client.mount();
        assert_eq!(client.runtime().focus().listener_count(), 1);
        assert_eq!(client.runtime().online().listener_count(), 1);

        client.unmount();
        assert!(!client.is_mounted());
        assert_eq!(client.runtime().focus().listener_count(), 0);
    }
}
