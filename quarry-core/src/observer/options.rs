//! Observer options: request shaping plus presentation policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::result::ResultField;
use crate::error::{QueryError, SelectError};
use crate::query::{Entry, QueryKey, QueryOptions};

/// When a trigger (mount, focus, reconnect) refetches.
///
/// Deserializes from `true` (if stale), `false` (never) or `"always"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RefetchOnRepr", into = "RefetchOnRepr")]
pub enum RefetchOn {
    Never,
    #[default]
    IfStale,
    Always,
}

impl From<bool> for RefetchOn {
    fn from(enabled: bool) -> Self {
        if enabled {
            RefetchOn::IfStale
        } else {
            RefetchOn::Never
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum RefetchOnRepr {
    Flag(bool),
    Mode(RefetchMode),
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RefetchMode {
    Always,
}

impl From<RefetchOnRepr> for RefetchOn {
    fn from(repr: RefetchOnRepr) -> Self {
        match repr {
            RefetchOnRepr::Flag(enabled) => enabled.into(),
            RefetchOnRepr::Mode(RefetchMode::Always) => RefetchOn::Always,
        }
    }
}

impl From<RefetchOn> for RefetchOnRepr {
    fn from(policy: RefetchOn) -> Self {
        match policy {
            RefetchOn::Never => RefetchOnRepr::Flag(false),
            RefetchOn::IfStale => RefetchOnRepr::Flag(true),
            RefetchOn::Always => RefetchOnRepr::Mode(RefetchMode::Always),
        }
    }
}

type IntervalFn<T, E, S> = Arc<dyn Fn(Option<&Arc<S>>, &Entry<T, E>) -> Option<Duration> + Send + Sync>;

/// Polling period.
pub enum RefetchInterval<T, E, S> {
    Every(Duration),
    /// Recomputed from the latest data after every entry update. `None`
    /// stops polling.
    Dynamic(IntervalFn<T, E, S>),
}

impl<T, E, S> Clone for RefetchInterval<T, E, S> {
    fn clone(&self) -> Self {
        match self {
            RefetchInterval::Every(period) => RefetchInterval::Every(*period),
            RefetchInterval::Dynamic(f) => RefetchInterval::Dynamic(Arc::clone(f)),
        }
    }
}

impl<T, E, S> fmt::Debug for RefetchInterval<T, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefetchInterval::Every(period) => f.debug_tuple("Every").field(period).finish(),
            RefetchInterval::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Which result changes reach listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NotifyOnChange {
    #[default]
    All,
    Props(Vec<ResultField>),
    /// Only fields a listener has actually read.
    Tracked,
}

type SelectFn<T, S> = Arc<dyn Fn(&Arc<T>) -> Result<S, SelectError> + Send + Sync>;

/// How entry data becomes observer data.
pub enum Projection<T, S> {
    Identity(fn(Arc<T>) -> Arc<S>),
    Select(SelectFn<T, S>),
}

impl<T, S> Projection<T, S> {
    /// Identity of the select function, for memoization.
    pub(crate) fn select_id(&self) -> Option<usize> {
        match self {
            Projection::Identity(_) => None,
            Projection::Select(select) => Some(Arc::as_ptr(select) as *const () as usize),
        }
    }
}

impl<T, S> Clone for Projection<T, S> {
    fn clone(&self) -> Self {
        match self {
            Projection::Identity(f) => Projection::Identity(*f),
            Projection::Select(select) => Projection::Select(Arc::clone(select)),
        }
    }
}

/// Data shown while the first fetch is in flight. Never cached.
pub enum Placeholder<T> {
    Value(Arc<T>),
    With(Arc<dyn Fn() -> Option<T> + Send + Sync>),
}

impl<T> Placeholder<T> {
    pub fn resolve(&self) -> Option<Arc<T>> {
        match self {
            Placeholder::Value(data) => Some(Arc::clone(data)),
            Placeholder::With(f) => f().map(Arc::new),
        }
    }
}

impl<T> Clone for Placeholder<T> {
    fn clone(&self) -> Self {
        match self {
            Placeholder::Value(data) => Placeholder::Value(Arc::clone(data)),
            Placeholder::With(f) => Placeholder::With(Arc::clone(f)),
        }
    }
}

pub type SuccessCallback<S> = Arc<dyn Fn(&Arc<S>) + Send + Sync>;
pub type ErrorCallback<E> = Arc<dyn Fn(&QueryError<E>) + Send + Sync>;
pub type SettledCallback<S, E> = Arc<dyn Fn(Option<&Arc<S>>, Option<&QueryError<E>>) + Send + Sync>;

/// Options for one [`Observer`](super::Observer).
///
/// Unset fields fall back to per-key defaults, then client defaults, then
/// the built-in defaults returned by the resolving getters.
pub struct ObserverOptions<T, E, S = T> {
    pub query: QueryOptions<T, E>,
    pub enabled: Option<bool>,
    /// `Duration::MAX` never goes stale.
    pub stale_time: Option<Duration>,
    pub refetch_interval: Option<RefetchInterval<T, E, S>>,
    pub refetch_interval_in_background: Option<bool>,
    pub refetch_on_window_focus: Option<RefetchOn>,
    pub refetch_on_reconnect: Option<RefetchOn>,
    pub refetch_on_mount: Option<RefetchOn>,
    pub retry_on_mount: Option<bool>,
    pub notify_on_change: Option<NotifyOnChange>,
    pub notify_on_change_exclusions: Vec<ResultField>,
    pub on_success: Option<SuccessCallback<S>>,
    pub on_error: Option<ErrorCallback<E>>,
    pub on_settled: Option<SettledCallback<S, E>>,
    pub projection: Projection<T, S>,
    pub keep_previous_data: Option<bool>,
    pub placeholder_data: Option<Placeholder<T>>,
    pub optimistic_result: Option<bool>,
}

impl<T, E> ObserverOptions<T, E, T> {
    pub fn new(key: impl Into<QueryKey>) -> Self {
        Self::with_projection(QueryOptions::new(key), Projection::Identity(|data| data))
    }
}

impl<T, E, S> ObserverOptions<T, E, S> {
    /// Observe `key` through a select function.
    ///
    /// The select function runs while the observer derives its result and
    /// must not call back into the same observer.
    pub fn selecting<F>(key: impl Into<QueryKey>, select: F) -> Self
    where
        F: Fn(&Arc<T>) -> Result<S, SelectError> + Send + Sync + 'static,
    {
        Self::with_projection(QueryOptions::new(key), Projection::Select(Arc::new(select)))
    }

    fn with_projection(query: QueryOptions<T, E>, projection: Projection<T, S>) -> Self {
        Self {
            query,
            enabled: None,
            stale_time: None,
            refetch_interval: None,
            refetch_interval_in_background: None,
            refetch_on_window_focus: None,
            refetch_on_reconnect: None,
            refetch_on_mount: None,
            retry_on_mount: None,
            notify_on_change: None,
            notify_on_change_exclusions: Vec::new(),
            on_success: None,
            on_error: None,
            on_settled: None,
            projection,
            keep_previous_data: None,
            placeholder_data: None,
            optimistic_result: None,
        }
    }

    /// Replace the entry options, keeping the presentation policy.
    pub fn query(mut self, query: QueryOptions<T, E>) -> Self {
        self.query = query;
        self
    }

    /// Point at another key.
    pub fn key(mut self, key: impl Into<QueryKey>) -> Self {
        self.query.key = Some(key.into());
        self.query.hash = None;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn refetch_interval(mut self, period: Duration) -> Self {
        self.refetch_interval = Some(RefetchInterval::Every(period));
        self
    }

    pub fn refetch_interval_with<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Arc<S>>, &Entry<T, E>) -> Option<Duration> + Send + Sync + 'static,
    {
        self.refetch_interval = Some(RefetchInterval::Dynamic(Arc::new(f)));
        self
    }

    pub fn refetch_interval_in_background(mut self, enabled: bool) -> Self {
        self.refetch_interval_in_background = Some(enabled);
        self
    }

    pub fn refetch_on_window_focus(mut self, policy: impl Into<RefetchOn>) -> Self {
        self.refetch_on_window_focus = Some(policy.into());
        self
    }

    pub fn refetch_on_reconnect(mut self, policy: impl Into<RefetchOn>) -> Self {
        self.refetch_on_reconnect = Some(policy.into());
        self
    }

    pub fn refetch_on_mount(mut self, policy: impl Into<RefetchOn>) -> Self {
        self.refetch_on_mount = Some(policy.into());
        self
    }

    pub fn retry_on_mount(mut self, enabled: bool) -> Self {
        self.retry_on_mount = Some(enabled);
        self
    }

    pub fn notify_on_change(mut self, policy: NotifyOnChange) -> Self {
        self.notify_on_change = Some(policy);
        self
    }

    pub fn notify_on_change_exclusions(mut self, fields: Vec<ResultField>) -> Self {
        self.notify_on_change_exclusions = fields;
        self
    }

    pub fn on_success(mut self, f: impl Fn(&Arc<S>) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&QueryError<E>) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_settled(
        mut self,
        f: impl Fn(Option<&Arc<S>>, Option<&QueryError<E>>) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Arc::new(f));
        self
    }

    pub fn keep_previous_data(mut self, enabled: bool) -> Self {
        self.keep_previous_data = Some(enabled);
        self
    }

    pub fn placeholder_data(mut self, data: T) -> Self {
        self.placeholder_data = Some(Placeholder::Value(Arc::new(data)));
        self
    }

    pub fn placeholder_data_with(mut self, f: impl Fn() -> Option<T> + Send + Sync + 'static) -> Self {
        self.placeholder_data = Some(Placeholder::With(Arc::new(f)));
        self
    }

    pub fn optimistic_result(mut self, enabled: bool) -> Self {
        self.optimistic_result = Some(enabled);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn resolved_stale_time(&self) -> Duration {
        self.stale_time.unwrap_or(Duration::ZERO)
    }

    pub(crate) fn polls_in_background(&self) -> bool {
        self.refetch_interval_in_background.unwrap_or(false)
    }

    pub(crate) fn keeps_previous_data(&self) -> bool {
        self.keep_previous_data.unwrap_or(false)
    }

    pub(crate) fn is_optimistic(&self) -> bool {
        self.optimistic_result.unwrap_or(false)
    }

    pub(crate) fn shares_structure(&self) -> bool {
        self.query.structural_sharing != Some(false)
    }
}

impl<T, E, S> Clone for ObserverOptions<T, E, S> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            enabled: self.enabled,
            stale_time: self.stale_time,
            refetch_interval: self.refetch_interval.clone(),
            refetch_interval_in_background: self.refetch_interval_in_background,
            refetch_on_window_focus: self.refetch_on_window_focus,
            refetch_on_reconnect: self.refetch_on_reconnect,
            refetch_on_mount: self.refetch_on_mount,
            retry_on_mount: self.retry_on_mount,
            notify_on_change: self.notify_on_change.clone(),
            notify_on_change_exclusions: self.notify_on_change_exclusions.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
            projection: self.projection.clone(),
            keep_previous_data: self.keep_previous_data,
            placeholder_data: self.placeholder_data.clone(),
            optimistic_result: self.optimistic_result,
        }
    }
}

impl<T, E, S> fmt::Debug for ObserverOptions<T, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverOptions")
            .field("query", &self.query)
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("refetch_interval", &self.refetch_interval)
            .field("refetch_on_window_focus", &self.refetch_on_window_focus)
            .field("refetch_on_reconnect", &self.refetch_on_reconnect)
            .field("refetch_on_mount", &self.refetch_on_mount)
            .field("notify_on_change", &self.notify_on_change)
            .field("selects", &self.projection.select_id().is_some())
            .field("keep_previous_data", &self.keep_previous_data)
            .finish_non_exhaustive()
    }
}

/// Switches for [`Observer::refetch`](super::Observer::refetch).
#[derive(Debug, Clone, Copy, Default)]
pub struct RefetchOptions {
    /// Return the fetch error instead of the resulting observer state.
    pub throw_on_error: bool,
    pub cancel_refetch: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refetch_on_accepts_flags_and_always() {
        let parsed: Vec<RefetchOn> = serde_json::from_str(r#"[true, false, "always"]"#).unwrap();
        assert_eq!(parsed, vec![RefetchOn::IfStale, RefetchOn::Never, RefetchOn::Always]);

        assert_eq!(serde_json::to_string(&RefetchOn::Always).unwrap(), r#""always""#);
        assert!(serde_json::from_str::<RefetchOn>(r#""sometimes""#).is_err());
    }

    #[test]
    fn resolving_getters_use_builtin_defaults() {
        let options: ObserverOptions<u32, String> = ObserverOptions::new("a");
        assert!(options.is_enabled());
        assert_eq!(options.resolved_stale_time(), Duration::ZERO);
        assert!(!options.keeps_previous_data());
        assert!(options.shares_structure());
        assert!(options.projection.select_id().is_none());
    }

    #[test]
    fn key_change_clears_explicit_hash() {
        let mut options: ObserverOptions<u32, String> = ObserverOptions::new("a");
        options.query.hash = Some("custom".into());
        let options = options.key("b");
        assert_eq!(options.query.key, Some(QueryKey::from("b")));
        assert!(options.query.hash.is_none());
    }
}
