//! Observers
//!
//! An [`Observer`] binds one consumer to one entry. It derives a
//! [`QueryResult`] from the entry's state under its [`ObserverOptions`],
//! decides when to fetch, and delivers changed results to its listeners
//! through the notification scheduler.

pub mod options;
mod predicates;
mod query_observer;
pub mod result;

pub use options::{
    NotifyOnChange, ObserverOptions, Placeholder, Projection, RefetchInterval, RefetchOn,
    RefetchOptions,
};
pub use query_observer::Observer;
pub use result::{QueryResult, ResultField};
