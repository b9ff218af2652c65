//! Observer results.
//!
//! A [`QueryResult`] is a snapshot: every recomputation produces a fresh
//! value that is compared field by field against the previous one. Fields
//! are read through accessors so the observer can learn which ones a
//! listener actually reads (`NotifyOnChange::Tracked`).

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use super::options::RefetchOptions;
use crate::error::{same_error, QueryError};
use crate::query::state::same_data;
use crate::query::QueryStatus;

/// A result field, for change tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultField {
    Status,
    Data,
    DataUpdatedAt,
    Error,
    ErrorUpdatedAt,
    FailureCount,
    IsError,
    IsFetched,
    IsFetchedAfterMount,
    IsFetching,
    IsIdle,
    IsLoading,
    IsLoadingError,
    IsPlaceholderData,
    IsPreviousData,
    IsRefetchError,
    IsRefetching,
    IsStale,
    IsSuccess,
}

impl ResultField {
    pub const ALL: [ResultField; 19] = [
        ResultField::Status,
        ResultField::Data,
        ResultField::DataUpdatedAt,
        ResultField::Error,
        ResultField::ErrorUpdatedAt,
        ResultField::FailureCount,
        ResultField::IsError,
        ResultField::IsFetched,
        ResultField::IsFetchedAfterMount,
        ResultField::IsFetching,
        ResultField::IsIdle,
        ResultField::IsLoading,
        ResultField::IsLoadingError,
        ResultField::IsPlaceholderData,
        ResultField::IsPreviousData,
        ResultField::IsRefetchError,
        ResultField::IsRefetching,
        ResultField::IsStale,
        ResultField::IsSuccess,
    ];

    fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Set of fields read by listeners, shared by every result of one observer.
#[derive(Debug, Default)]
pub(crate) struct FieldTracker(AtomicU32);

impl FieldTracker {
    fn mark(&self, field: ResultField) {
        self.0.fetch_or(field.bit(), Ordering::Relaxed);
    }

    pub(crate) fn fields(&self) -> Vec<ResultField> {
        let bits = self.0.load(Ordering::Relaxed);
        ResultField::ALL
            .into_iter()
            .filter(|field| bits & field.bit() != 0)
            .collect()
    }
}

/// Back-reference from a result to its observer.
pub(crate) trait ResultHandle<S, E>: Send + Sync {
    fn refetch(&self, options: RefetchOptions) -> BoxFuture<'static, Result<QueryResult<S, E>, QueryError<E>>>;

    fn remove(&self);
}

/// What an observer presents for its entry.
pub struct QueryResult<S, E> {
    pub(crate) status: QueryStatus,
    pub(crate) data: Option<Arc<S>>,
    pub(crate) data_updated_at: u64,
    pub(crate) error: Option<QueryError<E>>,
    pub(crate) error_updated_at: u64,
    pub(crate) failure_count: u32,
    pub(crate) is_fetched: bool,
    pub(crate) is_fetched_after_mount: bool,
    pub(crate) is_fetching: bool,
    pub(crate) is_loading_error: bool,
    pub(crate) is_placeholder_data: bool,
    pub(crate) is_previous_data: bool,
    pub(crate) is_refetch_error: bool,
    pub(crate) is_refetching: bool,
    pub(crate) is_stale: bool,
    pub(crate) tracker: Option<Arc<FieldTracker>>,
    pub(crate) handle: Option<Arc<dyn ResultHandle<S, E>>>,
}

macro_rules! tracked {
    ($($(#[$doc:meta])* $name:ident: $ty:ty => $field:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) -> $ty {
                self.track(ResultField::$field);
                self.$name
            }
        )*
    };
}

impl<S, E> QueryResult<S, E> {
    fn track(&self, field: ResultField) {
        if let Some(tracker) = &self.tracker {
            tracker.mark(field);
        }
    }

    tracked! {
        status: QueryStatus => Status;
        data_updated_at: u64 => DataUpdatedAt;
        error_updated_at: u64 => ErrorUpdatedAt;
        /// Failed attempts of the current or last fetch.
        failure_count: u32 => FailureCount;
        is_fetched: bool => IsFetched;
        /// Whether the entry resolved since this observer attached.
        is_fetched_after_mount: bool => IsFetchedAfterMount;
        is_fetching: bool => IsFetching;
        is_loading_error: bool => IsLoadingError;
        is_placeholder_data: bool => IsPlaceholderData;
        /// Data shown belongs to the previously observed entry.
        is_previous_data: bool => IsPreviousData;
        is_refetch_error: bool => IsRefetchError;
        is_refetching: bool => IsRefetching;
        is_stale: bool => IsStale;
    }

    pub fn data(&self) -> Option<&Arc<S>> {
        self.track(ResultField::Data);
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&QueryError<E>> {
        self.track(ResultField::Error);
        self.error.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.track(ResultField::IsIdle);
        self.status == QueryStatus::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.track(ResultField::IsLoading);
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.track(ResultField::IsSuccess);
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.track(ResultField::IsError);
        self.status == QueryStatus::Error
    }

    /// Refetch through the observer that produced this result.
    pub fn refetch(
        &self,
        options: RefetchOptions,
    ) -> BoxFuture<'static, Result<QueryResult<S, E>, QueryError<E>>>
    where
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        match &self.handle {
            Some(handle) => handle.refetch(options),
            None => future::ready(Ok(self.untracked())).boxed(),
        }
    }

    /// Remove the observed entry from the cache.
    pub fn remove(&self) {
        if let Some(handle) = &self.handle {
            handle.remove();
        }
    }

    /// Copy that does not report reads.
    pub fn untracked(&self) -> Self {
        Self {
            tracker: None,
            ..self.clone()
        }
    }

    /// Whether `field` differs between two results. Data and errors compare
    /// by identity.
    pub fn differs(&self, other: &Self, field: ResultField) -> bool {
        match field {
            ResultField::Status => self.status != other.status,
            ResultField::Data => !same_data(self.data.as_ref(), other.data.as_ref()),
            ResultField::DataUpdatedAt => self.data_updated_at != other.data_updated_at,
            ResultField::Error => !same_error(self.error.as_ref(), other.error.as_ref()),
            ResultField::ErrorUpdatedAt => self.error_updated_at != other.error_updated_at,
            ResultField::FailureCount => self.failure_count != other.failure_count,
            ResultField::IsFetched => self.is_fetched != other.is_fetched,
            ResultField::IsFetchedAfterMount => {
                self.is_fetched_after_mount != other.is_fetched_after_mount
            }
            ResultField::IsFetching => self.is_fetching != other.is_fetching,
            ResultField::IsLoadingError => self.is_loading_error != other.is_loading_error,
            ResultField::IsPlaceholderData => self.is_placeholder_data != other.is_placeholder_data,
            ResultField::IsPreviousData => self.is_previous_data != other.is_previous_data,
            ResultField::IsRefetchError => self.is_refetch_error != other.is_refetch_error,
            ResultField::IsRefetching => self.is_refetching != other.is_refetching,
            ResultField::IsStale => self.is_stale != other.is_stale,
            // Derived from status
            ResultField::IsError
            | ResultField::IsIdle
            | ResultField::IsLoading
            | ResultField::IsSuccess => self.status != other.status,
        }
    }

    /// Field-wise equality over every field.
    pub fn same_as(&self, other: &Self) -> bool {
        !ResultField::ALL
            .into_iter()
            .any(|field| self.differs(other, field))
    }
}

impl<S, E> Default for QueryResult<S, E> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            data_updated_at: 0,
            error: None,
            error_updated_at: 0,
            failure_count: 0,
            is_fetched: false,
            is_fetched_after_mount: false,
            is_fetching: false,
            is_loading_error: false,
            is_placeholder_data: false,
            is_previous_data: false,
            is_refetch_error: false,
            is_refetching: false,
            is_stale: true,
            tracker: None,
            handle: None,
        }
    }
}

impl<S, E> Clone for QueryResult<S, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            data_updated_at: self.data_updated_at,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            failure_count: self.failure_count,
            is_fetched: self.is_fetched,
            is_fetched_after_mount: self.is_fetched_after_mount,
            is_fetching: self.is_fetching,
            is_loading_error: self.is_loading_error,
            is_placeholder_data: self.is_placeholder_data,
            is_previous_data: self.is_previous_data,
            is_refetch_error: self.is_refetch_error,
            is_refetching: self.is_refetching,
            is_stale: self.is_stale,
            tracker: self.tracker.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<S, E: fmt::Display> fmt::Debug for QueryResult<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("status", &self.status)
            .field("has_data", &self.data.is_some())
            .field("data_updated_at", &self.data_updated_at)
            .field("error", &self.error.as_ref().map(ToString::to_string))
            .field("failure_count", &self.failure_count)
            .field("is_fetching", &self.is_fetching)
            .field("is_stale", &self.is_stale)
            .field("is_previous_data", &self.is_previous_data)
            .field("is_placeholder_data", &self.is_placeholder_data)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(data: Arc<u32>) -> QueryResult<u32, String> {
        QueryResult {
            status: QueryStatus::Success,
            data: Some(data),
            data_updated_at: 10,
            is_fetched: true,
            is_stale: false,
            ..QueryResult::default()
        }
    }

    #[test]
    fn data_compares_by_identity() {
        let data = Arc::new(1);
        let a = success(data.clone());
        let b = success(data);
        assert!(a.same_as(&b));

        let c = success(Arc::new(1));
        assert!(c.differs(&a, ResultField::Data));
        assert!(!c.differs(&a, ResultField::Status));
    }

    #[test]
    fn accessors_record_reads() {
        let tracker = Arc::new(FieldTracker::default());
        let result = QueryResult {
            tracker: Some(tracker.clone()),
            ..success(Arc::new(3))
        };

        assert!(tracker.fields().is_empty());
        assert_eq!(result.data().map(|d| **d), Some(3));
        assert!(result.is_success());
        assert_eq!(tracker.fields(), vec![ResultField::Data, ResultField::IsSuccess]);

        // Untracked copies stay silent
        let _ = result.untracked().is_fetching();
        assert_eq!(tracker.fields().len(), 2);
    }

    #[tokio::test]
    async fn detached_result_refetch_returns_itself() {
        let result = success(Arc::new(4));
        let refetched = result.refetch(RefetchOptions::default()).await.unwrap();
        assert!(refetched.same_as(&result));
    }
}
