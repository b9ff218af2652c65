//! Entry state and its reducer.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{same_error, QueryError};

/// Lifecycle status of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Never fetched and no initial data.
    #[default]
    Idle,
    /// First fetch in flight.
    Loading,
    Error,
    Success,
}

/// Versioned state of one entry.
///
/// `data_updated_at == 0` means the entry never resolved successfully.
pub struct EntryState<T, E> {
    pub data: Option<Arc<T>>,
    pub data_updated_at: u64,
    pub error: Option<QueryError<E>>,
    pub error_updated_at: u64,
    pub data_update_count: u64,
    pub error_update_count: u64,
    pub fetch_failure_count: u32,
    pub fetch_meta: Option<Value>,
    pub is_fetching: bool,
    pub is_invalidated: bool,
    pub is_paused: bool,
    pub status: QueryStatus,
}

impl<T, E> EntryState<T, E> {
    /// Default state for an entry, seeded with optional initial data.
    pub fn initial(data: Option<Arc<T>>, updated_at: Option<u64>, now: u64) -> Self {
        let has_data = data.is_some();
        Self {
            data,
            data_updated_at: if has_data { updated_at.unwrap_or(now) } else { 0 },
            status: if has_data {
                QueryStatus::Success
            } else {
                QueryStatus::Idle
            },
            ..Self::default()
        }
    }

    /// Field-wise comparison with pointer identity for data and error.
    pub fn same_as(&self, other: &Self) -> bool {
        same_data(self.data.as_ref(), other.data.as_ref())
            && same_error(self.error.as_ref(), other.error.as_ref())
            && self.data_updated_at == other.data_updated_at
            && self.error_updated_at == other.error_updated_at
            && self.data_update_count == other.data_update_count
            && self.error_update_count == other.error_update_count
            && self.fetch_failure_count == other.fetch_failure_count
            && self.fetch_meta == other.fetch_meta
            && self.is_fetching == other.is_fetching
            && self.is_invalidated == other.is_invalidated
            && self.is_paused == other.is_paused
            && self.status == other.status
    }
}

pub(crate) fn same_data<T>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

impl<T, E> Default for EntryState<T, E> {
    fn default() -> Self {
        Self {
            data: None,
            data_updated_at: 0,
            error: None,
            error_updated_at: 0,
            data_update_count: 0,
            error_update_count: 0,
            fetch_failure_count: 0,
            fetch_meta: None,
            is_fetching: false,
            is_invalidated: false,
            is_paused: false,
            status: QueryStatus::Idle,
        }
    }
}

impl<T, E> Clone for EntryState<T, E> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            data_updated_at: self.data_updated_at,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            data_update_count: self.data_update_count,
            error_update_count: self.error_update_count,
            fetch_failure_count: self.fetch_failure_count,
            fetch_meta: self.fetch_meta.clone(),
            is_fetching: self.is_fetching,
            is_invalidated: self.is_invalidated,
            is_paused: self.is_paused,
            status: self.status,
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for EntryState<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryState")
            .field("status", &self.status)
            .field("data", &self.data)
            .field("data_updated_at", &self.data_updated_at)
            .field("error", &self.error)
            .field("data_update_count", &self.data_update_count)
            .field("error_update_count", &self.error_update_count)
            .field("fetch_failure_count", &self.fetch_failure_count)
            .field("is_fetching", &self.is_fetching)
            .field("is_invalidated", &self.is_invalidated)
            .field("is_paused", &self.is_paused)
            .finish()
    }
}

/// Caller-supplied partial state for manual cache edits.
///
/// `None` leaves a field untouched.
pub struct StatePatch<T, E> {
    pub data: Option<Option<Arc<T>>>,
    pub data_updated_at: Option<u64>,
    pub error: Option<Option<QueryError<E>>>,
    pub error_updated_at: Option<u64>,
    pub data_update_count: Option<u64>,
    pub error_update_count: Option<u64>,
    pub fetch_failure_count: Option<u32>,
    pub fetch_meta: Option<Option<Value>>,
    pub is_fetching: Option<bool>,
    pub is_invalidated: Option<bool>,
    pub is_paused: Option<bool>,
    pub status: Option<QueryStatus>,
}

impl<T, E> StatePatch<T, E> {
    /// A patch that replaces every field.
    pub fn replace(state: EntryState<T, E>) -> Self {
        Self {
            data: Some(state.data),
            data_updated_at: Some(state.data_updated_at),
            error: Some(state.error),
            error_updated_at: Some(state.error_updated_at),
            data_update_count: Some(state.data_update_count),
            error_update_count: Some(state.error_update_count),
            fetch_failure_count: Some(state.fetch_failure_count),
            fetch_meta: Some(state.fetch_meta),
            is_fetching: Some(state.is_fetching),
            is_invalidated: Some(state.is_invalidated),
            is_paused: Some(state.is_paused),
            status: Some(state.status),
        }
    }

    fn apply(self, mut state: EntryState<T, E>) -> EntryState<T, E> {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    state.$field = value;
                })*
            };
        }
        merge!(
            data,
            data_updated_at,
            error,
            error_updated_at,
            data_update_count,
            error_update_count,
            fetch_failure_count,
            fetch_meta,
            is_fetching,
            is_invalidated,
            is_paused,
            status
        );
        state
    }
}

impl<T, E> Default for StatePatch<T, E> {
    fn default() -> Self {
        Self {
            data: None,
            data_updated_at: None,
            error: None,
            error_updated_at: None,
            data_update_count: None,
            error_update_count: None,
            fetch_failure_count: None,
            fetch_meta: None,
            is_fetching: None,
            is_invalidated: None,
            is_paused: None,
            status: None,
        }
    }
}

/// A discrete state transition.
pub enum Action<T, E> {
    /// An attempt failed and will be retried.
    Failed,
    Fetch { meta: Option<Value> },
    Success { data: Arc<T>, updated_at: Option<u64> },
    Error { error: QueryError<E> },
    Invalidate,
    Pause,
    Continue,
    SetState { patch: StatePatch<T, E> },
}

/// Payload-free tag of an [`Action`], used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Failed,
    Fetch,
    Success,
    Error,
    /// An error caused by cancellation.
    Cancelled,
    Invalidate,
    Pause,
    Continue,
    SetState,
}

impl<T, E> Action<T, E> {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Failed => ActionKind::Failed,
            Action::Fetch { .. } => ActionKind::Fetch,
            Action::Success { .. } => ActionKind::Success,
            Action::Error { error } if error.is_cancelled() => ActionKind::Cancelled,
            Action::Error { .. } => ActionKind::Error,
            Action::Invalidate => ActionKind::Invalidate,
            Action::Pause => ActionKind::Pause,
            Action::Continue => ActionKind::Continue,
            Action::SetState { .. } => ActionKind::SetState,
        }
    }
}

/// Apply `action` to `state`.
///
/// Pure: the result depends only on the arguments. `now` stamps
/// resolutions that carry no explicit timestamp.
pub fn reduce<T, E>(
    state: &EntryState<T, E>,
    revert: Option<&EntryState<T, E>>,
    action: Action<T, E>,
    now: u64,
) -> EntryState<T, E> {
    let mut next = state.clone();
    match action {
        Action::Failed => {
            next.fetch_failure_count += 1;
        }
        Action::Pause => {
            next.is_paused = true;
        }
        Action::Continue => {
            next.is_paused = false;
        }
        Action::Fetch { meta } => {
            next.fetch_failure_count = 0;
            next.fetch_meta = meta;
            next.is_fetching = true;
            next.is_paused = false;
            if state.data_updated_at == 0 {
                next.status = QueryStatus::Loading;
            }
        }
        Action::Success { data, updated_at } => {
            next.data = Some(data);
            next.data_update_count += 1;
            next.data_updated_at = updated_at.unwrap_or(now);
            next.error = None;
            next.fetch_failure_count = 0;
            next.is_fetching = false;
            next.is_invalidated = false;
            next.is_paused = false;
            next.status = QueryStatus::Success;
        }
        Action::Error { error } => {
            let reverting = error.as_cancelled().is_some_and(|cancelled| cancelled.revert);
            if let (true, Some(snapshot)) = (reverting, revert) {
                return snapshot.clone();
            }
            next.error = Some(error);
            next.error_update_count += 1;
            next.error_updated_at = now;
            next.fetch_failure_count += 1;
            next.is_fetching = false;
            next.is_paused = false;
            next.status = QueryStatus::Error;
        }
        Action::Invalidate => {
            next.is_invalidated = true;
        }
        Action::SetState { patch } => {
            next = patch.apply(next);
        }
    }
    next
}
