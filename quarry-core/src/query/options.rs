//! Request-shaping options for an entry.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::key::{KeyHashFn, QueryHash, QueryKey};
use super::retryer::{Attempt, Retry, RetryDelay};

/// Default time an unobserved entry stays cached.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(30);

/// Caller-supplied fetch function.
pub type FetchFn<T, E> = Arc<dyn Fn(FetchContext) -> Attempt<T, E> + Send + Sync>;

/// Adapt an async closure into a [`FetchFn`].
pub fn fetch_fn<T, E, F, Fut>(f: F) -> FetchFn<T, E>
where
    T: Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Arc::new(move |ctx| Attempt::new(f(ctx)))
}

/// Equality override used instead of structural sharing.
pub type DataEqFn<T> = Arc<dyn Fn(Option<&Arc<T>>, &T) -> bool + Send + Sync>;

/// What a fetch function is told about the request.
#[derive(Debug, Clone)]
pub struct FetchContext {
    key: QueryKey,
    meta: Option<Value>,
    signal: AbortSignal,
}

impl FetchContext {
    pub(crate) fn new(key: QueryKey, meta: Option<Value>, signal: AbortSignal) -> Self {
        Self { key, meta, signal }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// Cancellation token for this fetch.
    ///
    /// Taking the token tells the entry the fetch honors cancellation, so
    /// losing the last observer cancels it outright instead of letting it
    /// finish.
    pub fn signal(&self) -> CancellationToken {
        self.signal.consumed.store(true, Ordering::SeqCst);
        self.signal.token.clone()
    }
}

/// Cancellation token plus a flag recording whether anyone took it.
#[derive(Debug, Clone)]
pub(crate) struct AbortSignal {
    pub(crate) token: CancellationToken,
    pub(crate) consumed: Arc<AtomicBool>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            consumed: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Seed data for a new entry.
pub enum InitialData<T> {
    Value(Arc<T>),
    With(Arc<dyn Fn() -> Option<T> + Send + Sync>),
}

impl<T> InitialData<T> {
    pub fn resolve(&self) -> Option<Arc<T>> {
        match self {
            InitialData::Value(data) => Some(Arc::clone(data)),
            InitialData::With(f) => f().map(Arc::new),
        }
    }
}

impl<T> Clone for InitialData<T> {
    fn clone(&self) -> Self {
        match self {
            InitialData::Value(data) => InitialData::Value(Arc::clone(data)),
            InitialData::With(f) => InitialData::With(Arc::clone(f)),
        }
    }
}

/// Options shaping one entry. Unset fields fall back to defaults.
pub struct QueryOptions<T, E> {
    pub key: Option<QueryKey>,
    /// Explicit hash, bypassing key hashing.
    pub hash: Option<QueryHash>,
    pub key_hash_fn: Option<KeyHashFn>,
    pub fetch_fn: Option<FetchFn<T, E>>,
    pub retry: Option<Retry<E>>,
    pub retry_delay: Option<RetryDelay<E>>,
    /// `Duration::MAX` keeps the entry forever.
    pub cache_time: Option<Duration>,
    pub is_data_equal: Option<DataEqFn<T>>,
    pub initial_data: Option<InitialData<T>>,
    pub initial_data_updated_at: Option<u64>,
    pub structural_sharing: Option<bool>,
    pub meta: Option<Value>,
}

impl<T, E> QueryOptions<T, E> {
    pub fn new(key: impl Into<QueryKey>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn fetch_fn(mut self, fetch_fn: FetchFn<T, E>) -> Self {
        self.fetch_fn = Some(fetch_fn);
        self
    }

    pub fn retry(mut self, retry: impl Into<Retry<E>>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    pub fn retry_delay(mut self, retry_delay: RetryDelay<E>) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    pub fn hash(mut self, hash: impl Into<QueryHash>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn key_hash_fn(mut self, key_hash_fn: KeyHashFn) -> Self {
        self.key_hash_fn = Some(key_hash_fn);
        self
    }

    pub fn is_data_equal<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Arc<T>>, &T) -> bool + Send + Sync + 'static,
    {
        self.is_data_equal = Some(Arc::new(f));
        self
    }

    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(InitialData::Value(Arc::new(data)));
        self
    }

    pub fn initial_data_with<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<T> + Send + Sync + 'static,
    {
        self.initial_data = Some(InitialData::With(Arc::new(f)));
        self
    }

    pub fn initial_data_updated_at(mut self, updated_at: u64) -> Self {
        self.initial_data_updated_at = Some(updated_at);
        self
    }

    pub fn structural_sharing(mut self, enabled: bool) -> Self {
        self.structural_sharing = Some(enabled);
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Layer `over` on top of `self`; fields set in `over` win.
    pub fn overlay(&self, over: &Self) -> Self {
        Self {
            key: over.key.clone().or_else(|| self.key.clone()),
            hash: over.hash.clone().or_else(|| self.hash.clone()),
            key_hash_fn: over.key_hash_fn.clone().or_else(|| self.key_hash_fn.clone()),
            fetch_fn: over.fetch_fn.clone().or_else(|| self.fetch_fn.clone()),
            retry: over.retry.clone().or_else(|| self.retry.clone()),
            retry_delay: over.retry_delay.clone().or_else(|| self.retry_delay.clone()),
            cache_time: over.cache_time.or(self.cache_time),
            is_data_equal: over.is_data_equal.clone().or_else(|| self.is_data_equal.clone()),
            initial_data: over.initial_data.clone().or_else(|| self.initial_data.clone()),
            initial_data_updated_at: over.initial_data_updated_at.or(self.initial_data_updated_at),
            structural_sharing: over.structural_sharing.or(self.structural_sharing),
            meta: over.meta.clone().or_else(|| self.meta.clone()),
        }
    }
}

impl<T, E> Default for QueryOptions<T, E> {
    fn default() -> Self {
        Self {
            key: None,
            hash: None,
            key_hash_fn: None,
            fetch_fn: None,
            retry: None,
            retry_delay: None,
            cache_time: None,
            is_data_equal: None,
            initial_data: None,
            initial_data_updated_at: None,
            structural_sharing: None,
            meta: None,
        }
    }
}

impl<T, E> Clone for QueryOptions<T, E> {
    fn clone(&self) -> Self {
        Self::default().overlay(self)
    }
}

impl<T, E> fmt::Debug for QueryOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .field("hash", &self.hash)
            .field("has_fetch_fn", &self.fetch_fn.is_some())
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay)
            .field("cache_time", &self.cache_time)
            .field("structural_sharing", &self.structural_sharing)
            .field("meta", &self.meta)
            .finish()
    }
}

/// Per-call fetch switches.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Cancel an in-flight refetch instead of joining it.
    pub cancel_refetch: bool,
    pub meta: Option<Value>,
}

/// New data for [`Entry::set_data`](super::Entry::set_data).
pub enum Updater<T> {
    Value(T),
    With(Box<dyn FnOnce(Option<&Arc<T>>) -> T + Send>),
}

impl<T> Updater<T> {
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(Option<&Arc<T>>) -> T + Send + 'static,
    {
        Updater::With(Box::new(f))
    }

    pub(crate) fn apply(self, previous: Option<&Arc<T>>) -> T {
        match self {
            Updater::Value(value) => value,
            Updater::With(f) => f(previous),
        }
    }
}

impl<T> From<T> for Updater<T> {
    fn from(value: T) -> Self {
        Updater::Value(value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SetDataOptions {
    /// Explicit `data_updated_at`, instead of now.
    pub updated_at: Option<u64>,
}
