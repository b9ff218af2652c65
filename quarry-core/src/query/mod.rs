//! Query Layer
//!
//! Everything below the observer: keys, state, the per-key [`Entry`], the
//! retry engine that drives its fetches, and the [`Registry`] that owns
//! the entries.

pub mod entry;
pub mod filters;
pub mod key;
pub mod options;
pub mod registry;
pub mod retryer;
pub mod state;
pub mod structural;

pub use entry::{Entry, EntryObserver, ObserverId};
pub use filters::QueryFilters;
pub use key::{hash_key, hash_key_by_options, partial_match_key, KeyHashFn, QueryHash, QueryKey};
pub use options::{
    fetch_fn, FetchContext, FetchFn, FetchOptions, InitialData, QueryOptions, SetDataOptions,
    Updater, DEFAULT_CACHE_TIME,
};
pub use registry::{AnyEntry, CacheConfig, CacheEvent, EntryInfo, Registry};
pub use retryer::{Attempt, CancelOptions, PendingResult, Retry, RetryDelay, Retryer};
pub use state::{Action, ActionKind, EntryState, QueryStatus, StatePatch};
pub use structural::{replace_equal_deep, QueryData, StructuralShare};
