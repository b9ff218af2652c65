//! When an observer should fetch.

use std::sync::Arc;

use super::options::{ObserverOptions, RefetchOn};
use crate::error::FetchError;
use crate::query::{Entry, QueryData, QueryStatus};

pub(crate) fn is_stale<T, E, S>(entry: &Entry<T, E>, options: &ObserverOptions<T, E, S>) -> bool
where
    T: QueryData,
    E: FetchError,
{
    entry.is_stale_by_time(options.resolved_stale_time())
}

/// Never resolved, and not an error the options forbid retrying on mount.
fn should_load_on_mount<T, E, S>(entry: &Entry<T, E>, options: &ObserverOptions<T, E, S>) -> bool
where
    T: QueryData,
    E: FetchError,
{
    let state = entry.state();
    options.is_enabled()
        && state.data_updated_at == 0
        && !(state.status == QueryStatus::Error && options.retry_on_mount == Some(false))
}

fn should_refetch_on_mount<T, E, S>(entry: &Entry<T, E>, options: &ObserverOptions<T, E, S>) -> bool
where
    T: QueryData,
    E: FetchError,
{
    options.is_enabled()
        && entry.state().data_updated_at > 0
        && applies(options.refetch_on_mount, entry, options)
}

pub(crate) fn should_fetch_on_mount<T, E, S>(
    entry: &Entry<T, E>,
    options: &ObserverOptions<T, E, S>,
) -> bool
where
    T: QueryData,
    E: FetchError,
{
    should_load_on_mount(entry, options) || should_refetch_on_mount(entry, options)
}

/// Fetch after an options change: the entry changed or the observer was
/// just enabled, and the data is stale under the new options.
pub(crate) fn should_fetch_optionally<T, E, S>(
    entry: &Arc<Entry<T, E>>,
    previous_entry: &Arc<Entry<T, E>>,
    options: &ObserverOptions<T, E, S>,
    previous_options: &ObserverOptions<T, E, S>,
) -> bool
where
    T: QueryData,
    E: FetchError,
{
    let was_disabled = !previous_options.is_enabled();
    options.is_enabled()
        && (!Arc::ptr_eq(entry, previous_entry) || was_disabled)
        && (entry.state().status != QueryStatus::Error || was_disabled)
        && is_stale(entry, options)
}

/// Focus and reconnect triggers.
pub(crate) fn should_fetch_on<T, E, S>(
    policy: Option<RefetchOn>,
    entry: &Entry<T, E>,
    options: &ObserverOptions<T, E, S>,
) -> bool
where
    T: QueryData,
    E: FetchError,
{
    options.is_enabled() && applies(policy, entry, options)
}

fn applies<T, E, S>(policy: Option<RefetchOn>, entry: &Entry<T, E>, options: &ObserverOptions<T, E, S>) -> bool
where
    T: QueryData,
    E: FetchError,
{
    match policy.unwrap_or_default() {
        RefetchOn::Always => true,
        RefetchOn::IfStale => is_stale(entry, options),
        RefetchOn::Never => false,
    }
}
