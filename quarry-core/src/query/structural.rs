//! Structural sharing.
//!
//! When new data arrives, parts that are deeply equal to the previous value
//! keep the previous allocation. Consumers comparing `Arc`s by pointer then
//! see "unchanged" for everything that did not change.
//!
//! Sharing happens at `Arc` boundaries. A container of `Arc`s can reuse each
//! child individually; a plain value can only be reused as a whole.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

/// Data that can take part in structural sharing.
///
/// Leaf types use the default, which never shares children. Containers of
/// `Arc`s override [`share_children`](StructuralShare::share_children).
pub trait StructuralShare: PartialEq + Sized {
    /// Rebuild `next` reusing children of `prev` that are deeply equal.
    ///
    /// Only called when `prev` and `next` are not equal as a whole.
    fn share_children(prev: &Self, next: Self) -> Self {
        let _ = prev;
        next
    }
}

/// Everything a cached value needs to be.
pub trait QueryData: Clone + StructuralShare + Send + Sync + 'static {}

impl<T> QueryData for T where T: Clone + StructuralShare + Send + Sync + 'static {}

/// Return `prev` itself when `next` is deeply equal to it, otherwise `next`
/// with as many of `prev`'s children reused as possible.
pub fn replace_equal_deep<T>(prev: Option<&Arc<T>>, next: Arc<T>) -> Arc<T>
where
    T: StructuralShare + Clone,
{
    let Some(prev) = prev else {
        return next;
    };

    if Arc::ptr_eq(prev, &next) || **prev == *next {
        return Arc::clone(prev);
    }

    Arc::new(T::share_children(prev, Arc::unwrap_or_clone(next)))
}

macro_rules! leaf {
    ($($ty:ty),* $(,)?) => {
        $(impl StructuralShare for $ty {})*
    };
}

leaf!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, serde_json::Value,
);

impl<U> StructuralShare for Vec<Arc<U>>
where
    U: StructuralShare + Clone,
{
    fn share_children(prev: &Self, next: Self) -> Self {
        next.into_iter()
            .enumerate()
            .map(|(i, item)| replace_equal_deep(prev.get(i), item))
            .collect()
    }
}

impl<U> StructuralShare for Option<Arc<U>>
where
    U: StructuralShare + Clone,
{
    fn share_children(prev: &Self, next: Self) -> Self {
        next.map(|item| replace_equal_deep(prev.as_ref(), item))
    }
}

impl<K, U> StructuralShare for BTreeMap<K, Arc<U>>
where
    K: Ord,
    U: StructuralShare + Clone,
{
    fn share_children(prev: &Self, next: Self) -> Self {
        next.into_iter()
            .map(|(key, item)| {
                let item = replace_equal_deep(prev.get(&key), item);
                (key, item)
            })
            .collect()
    }
}

impl<K, U> StructuralShare for HashMap<K, Arc<U>>
where
    K: Eq + Hash,
    U: StructuralShare + Clone,
{
    fn share_children(prev: &Self, next: Self) -> Self {
        next.into_iter()
            .map(|(key, item)| {
                let item = replace_equal_deep(prev.get(&key), item);
                (key, item)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Todo {
        id: u32,
        title: String,
    }

    impl StructuralShare for Todo {}

    fn todo(id: u32, title: &str) -> Arc<Todo> {
        Arc::new(Todo {
            id,
            title: title.to_string(),
        })
    }

    #[test]
    fn equal_values_keep_previous_allocation() {
        let prev = Arc::new(vec![todo(1, "a"), todo(2, "b")]);
        let next = Arc::new(vec![todo(1, "a"), todo(2, "b")]);

        let merged = replace_equal_deep(Some(&prev), next);
        assert!(Arc::ptr_eq(&merged, &prev));

        // Idempotent on its own output
        let again = replace_equal_deep(Some(&merged), Arc::new((*prev).clone()));
        assert!(Arc::ptr_eq(&again, &prev));
    }

    #[test]
    fn unchanged_children_are_reused() {
        let prev = Arc::new(vec![todo(1, "a"), todo(2, "b"), todo(3, "c")]);
        let next = Arc::new(vec![todo(1, "a"), todo(2, "changed"), todo(3, "c")]);

        let merged = replace_equal_deep(Some(&prev), next);
        assert!(!Arc::ptr_eq(&merged, &prev));
        assert!(Arc::ptr_eq(&merged[0], &prev[0]));
        assert!(!Arc::ptr_eq(&merged[1], &prev[1]));
        assert!(Arc::ptr_eq(&merged[2], &prev[2]));
        assert_eq!(merged[1].title, "changed");
    }

    #[test]
    fn maps_share_by_key() {
        let mut prev = BTreeMap::new();
        prev.insert("x", todo(1, "a"));
        prev.insert("y", todo(2, "b"));
        let prev = Arc::new(prev);

        let mut next = BTreeMap::new();
        next.insert("x", todo(1, "a"));
        next.insert("y", todo(2, "z"));
        next.insert("w", todo(3, "new"));

        let merged = replace_equal_deep(Some(&prev), Arc::new(next));
        assert!(Arc::ptr_eq(&merged["x"], &prev["x"]));
        assert!(!Arc::ptr_eq(&merged["y"], &prev["y"]));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn no_previous_value_passes_through() {
        let next = Arc::new(5_u32);
        let merged = replace_equal_deep(None, next.clone());
        assert!(Arc::ptr_eq(&merged, &next));
    }

    #[test]
    fn leaf_values_share_only_as_whole() {
        let prev = Arc::new(serde_json::json!({"a": 1}));
        let same = replace_equal_deep(Some(&prev), Arc::new(serde_json::json!({"a": 1})));
        assert!(Arc::ptr_eq(&same, &prev));

        let different = replace_equal_deep(Some(&prev), Arc::new(serde_json::json!({"a": 2})));
        assert!(!Arc::ptr_eq(&different, &prev));
    }
}
