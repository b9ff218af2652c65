//! Entry selection for bulk operations.

use std::fmt;
use std::sync::Arc;

use super::key::{partial_match_key, QueryKey};
use super::registry::AnyEntry;

pub type EntryPredicate = Arc<dyn Fn(&dyn AnyEntry) -> bool + Send + Sync>;

/// Which entries a bulk operation applies to. Unset fields match anything.
#[derive(Clone, Default)]
pub struct QueryFilters {
    /// Prefix / deep-subset key match, or exact with `exact`.
    pub key: Option<QueryKey>,
    pub exact: Option<bool>,
    /// `Some(true)`: only entries with an enabled observer.
    /// `Some(false)`: only entries without one.
    pub active: Option<bool>,
    pub stale: Option<bool>,
    pub fetching: Option<bool>,
    pub predicate: Option<EntryPredicate>,
}

impl QueryFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<QueryKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = Some(exact);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn stale(mut self, stale: bool) -> Self {
        self.stale = Some(stale);
        self
    }

    pub fn fetching(mut self, fetching: bool) -> Self {
        self.fetching = Some(fetching);
        self
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn AnyEntry) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, entry: &dyn AnyEntry) -> bool {
        if let Some(key) = &self.key {
            let matched = if self.exact == Some(true) {
                entry.key() == key
            } else {
                partial_match_key(entry.key(), key)
            };
            if !matched {
                return false;
            }
        }

        if self.active.is_some_and(|active| active != entry.is_active()) {
            return false;
        }

        if self.stale.is_some_and(|stale| stale != entry.is_stale()) {
            return false;
        }

        if self.fetching.is_some_and(|fetching| fetching != entry.is_fetching()) {
            return false;
        }

        self.predicate.as_ref().map_or(true, |predicate| predicate(entry))
    }
}

impl fmt::Debug for QueryFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilters")
            .field("key", &self.key)
            .field("exact", &self.exact)
            .field("active", &self.active)
            .field("stale", &self.stale)
            .field("fetching", &self.fetching)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::options::{QueryOptions, SetDataOptions};
    use crate::query::registry::{CacheConfig, Registry};
    use crate::runtime::Runtime;
    use serde_json::json;

    #[tokio::test]
    async fn key_stale_and_predicate_filters() {
        let registry = Registry::new(Runtime::new(), CacheConfig::default());
        let list = registry
            .build(
                QueryOptions::<u32, String>::new(QueryKey::from("todos").with(json!({"page": 1, "done": false}))),
                None,
            )
            .unwrap();
        list.set_data(1_u32, SetDataOptions::default());
        let detail = registry
            .build(QueryOptions::<u32, String>::new(QueryKey::from("todo").with(3)), None)
            .unwrap();

        let by_subset = QueryFilters::new().key(json!(["todos", {"page": 1}]));
        assert!(by_subset.matches(list.as_ref()));
        assert!(!by_subset.matches(detail.as_ref()));
        assert!(!by_subset.clone().exact(true).matches(list.as_ref()));

        // Never-fetched entries are stale
        assert!(QueryFilters::new().stale(true).matches(detail.as_ref()));
        assert!(!QueryFilters::new().stale(true).matches(list.as_ref()));

        assert!(QueryFilters::new().active(false).matches(list.as_ref()));
        assert!(!QueryFilters::new().fetching(true).matches(list.as_ref()));

        let only_todo = QueryFilters::new().predicate(|entry| entry.key().len() == 2 && entry.hash().as_str().starts_with("[\"todo\""));
        assert!(only_todo.matches(detail.as_ref()));
    }
}
