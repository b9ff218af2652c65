//! Error types for Quarry operations

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::query::QueryHash;

/// Bounds every fetch error type must satisfy.
pub trait FetchError: fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<E> FetchError for E where E: fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// A fetch run was cancelled.
///
/// `revert` rolls the entry back to its state before the fetch started.
/// `silent` suppresses the error dispatch entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("query was cancelled (revert: {revert}, silent: {silent})")]
pub struct CancelledError {
    pub revert: bool,
    pub silent: bool,
}

/// A `select` projection failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("select failed: {message}")]
pub struct SelectError {
    pub message: String,
}

impl SelectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error carried by entry state and observer results.
///
/// Cloning is cheap. Two errors are the same error when [`same_as`]
/// says so; a fresh failure is never `same_as` an earlier one.
///
/// [`same_as`]: QueryError::same_as
#[derive(Debug, Error)]
pub enum QueryError<E> {
    #[error(transparent)]
    Cancelled(#[from] CancelledError),

    #[error("{0}")]
    Fetch(Arc<E>),

    #[error("no fetch function configured for query {hash}")]
    MissingFetchFn { hash: QueryHash },

    #[error("{0}")]
    Select(Arc<SelectError>),
}

impl<E> QueryError<E> {
    pub fn fetch(error: E) -> Self {
        Self::Fetch(Arc::new(error))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn as_cancelled(&self) -> Option<&CancelledError> {
        match self {
            Self::Cancelled(cancelled) => Some(cancelled),
            _ => None,
        }
    }

    /// The fetch function's own error, if that is what this is.
    pub fn as_fetch(&self) -> Option<&E> {
        match self {
            Self::Fetch(error) => Some(error),
            _ => None,
        }
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Cancelled(a), Self::Cancelled(b)) => a == b,
            (Self::Fetch(a), Self::Fetch(b)) => Arc::ptr_eq(a, b),
            (Self::MissingFetchFn { hash: a }, Self::MissingFetchFn { hash: b }) => a == b,
            (Self::Select(a), Self::Select(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<E> Clone for QueryError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Cancelled(cancelled) => Self::Cancelled(*cancelled),
            Self::Fetch(error) => Self::Fetch(Arc::clone(error)),
            Self::MissingFetchFn { hash } => Self::MissingFetchFn { hash: hash.clone() },
            Self::Select(error) => Self::Select(Arc::clone(error)),
        }
    }
}

impl<E> From<SelectError> for QueryError<E> {
    fn from(error: SelectError) -> Self {
        Self::Select(Arc::new(error))
    }
}

/// Identity comparison for optional errors.
pub(crate) fn same_error<E>(a: Option<&QueryError<E>>, b: Option<&QueryError<E>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_as(b),
        _ => false,
    }
}

/// Misuse of the cache API, reported at the point of misuse.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a query key is required")]
    MissingKey,

    #[error("query {hash} is cached with different data or error types")]
    TypeMismatch { hash: QueryHash },

    #[error("invalid client configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}
