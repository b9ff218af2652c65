//! Quarry Core
//!
//! This crate provides the cache engine for the Quarry data-fetching library.
//! It implements:
//!
//! - A keyed cache of asynchronous query results with request deduplication
//! - Retry with backoff, pause while offline or unfocused, and cancellation
//! - Staleness tracking, invalidation and garbage collection of unused entries
//! - Observers that derive presentation state and decide when to refetch
//! - A notification scheduler that batches side effects
//!
//! # Architecture
//!
//! - `runtime`: scheduler, focus and online signals, clock
//! - `query`: keys, entry state, the per-key entry, retry engine, registry
//! - `observer`: per-consumer result derivation, timers and listeners
//! - `client`: defaults, environment wiring and bulk operations
//! - `config`: serde-backed default options
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_core::{fetch_fn, Client, ClientConfig, Observer, ObserverOptions};
//!
//! let client = Client::new(ClientConfig::default());
//! client.mount();
//!
//! let options = ObserverOptions::<Vec<Arc<Todo>>, ApiError>::new("todos")
//!     .query(QueryOptions::new("todos").fetch_fn(fetch_fn(|_ctx| load_todos())));
//! let observer = Observer::new(&client, options)?;
//!
//! // The first subscriber mounts the observer and triggers the fetch.
//! let _subscription = observer.subscribe(|result| {
//!     if let Some(todos) = result.data() {
//!         println!("{} todos", todos.len());
//!     }
//! });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observer;
pub mod query;
pub mod runtime;

pub use client::Client;
pub use config::{ClientConfig, KeyedDefaults, QueryDefaults, RetrySetting};
pub use error::{CancelledError, ConfigError, FetchError, QueryError, SelectError};
pub use observer::{
    NotifyOnChange, Observer, ObserverOptions, QueryResult, RefetchOn, RefetchOptions, ResultField,
};
pub use query::{
    fetch_fn, CacheConfig, CacheEvent, CancelOptions, FetchContext, FetchOptions, QueryFilters,
    QueryKey, QueryOptions, QueryStatus, Retry, RetryDelay, SetDataOptions, Updater,
};
pub use runtime::{Runtime, Subscription};
