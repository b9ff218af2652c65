//! Query keys and their canonical hashes.
//!
//! A key is an ordered list of JSON values. Two keys that differ only in the
//! order of object properties hash identically; array order is significant.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered key segments identifying one logical resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<Value>);

impl QueryKey {
    pub fn new(segments: Vec<Value>) -> Self {
        Self(segments)
    }

    /// Append a segment.
    pub fn with(mut self, segment: impl Into<Value>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.0.clone())
    }
}

impl From<&str> for QueryKey {
    fn from(segment: &str) -> Self {
        Self(vec![Value::String(segment.to_string())])
    }
}

impl From<String> for QueryKey {
    fn from(segment: String) -> Self {
        Self(vec![Value::String(segment)])
    }
}

/// An array becomes the key's segments; anything else is a single segment.
impl From<Value> for QueryKey {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(segments) => Self(segments),
            other => Self(vec![other]),
        }
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(segments: Vec<Value>) -> Self {
        Self(segments)
    }
}

impl FromIterator<Value> for QueryKey {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hash_key(self))
    }
}

/// Canonical string identifying one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHash(String);

impl QueryHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for QueryHash {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for QueryHash {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

impl From<&str> for QueryHash {
    fn from(hash: &str) -> Self {
        Self(hash.to_string())
    }
}

/// Caller-supplied key hashing.
pub type KeyHashFn = Arc<dyn Fn(&QueryKey) -> QueryHash + Send + Sync>;

/// Hash a key with sorted object properties.
pub fn hash_key(key: &QueryKey) -> QueryHash {
    let mut out = String::with_capacity(32);
    out.push('[');
    for (i, segment) in key.segments().iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_canonical(segment, &mut out);
    }
    out.push(']');
    QueryHash(out)
}

/// Hash a key with the custom hash function when one is configured.
pub fn hash_key_by_options(key: &QueryKey, hash_fn: Option<&KeyHashFn>) -> QueryHash {
    match hash_fn {
        Some(hash_fn) => hash_fn(key),
        None => hash_key(key),
    }
}

/// Canonical JSON for any value.
pub fn stable_value_hash(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (name, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(name, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::String(s) => write_string(s, out),
        // Scalars have a single canonical rendering
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

/// Whether `filter` is a prefix / deep subset of `key`.
pub fn partial_match_key(key: &QueryKey, filter: &QueryKey) -> bool {
    filter.len() <= key.len()
        && key
            .segments()
            .iter()
            .zip(filter.segments())
            .all(|(a, b)| partial_deep_equal(a, b))
}

/// Whether every property of `b` is present and partially equal in `a`.
///
/// Arrays match when `b` is an element-wise partial prefix of `a`.
pub fn partial_deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => b
            .iter()
            .all(|(name, expected)| a.get(name).is_some_and(|actual| partial_deep_equal(actual, expected))),
        (Value::Array(a), Value::Array(b)) => {
            b.len() <= a.len() && a.iter().zip(b).all(|(x, y)| partial_deep_equal(x, y))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_key_is_single_segment() {
        let key = QueryKey::from("todos");
        assert_eq!(key.segments(), &[json!("todos")]);
        assert_eq!(hash_key(&key), hash_key(&QueryKey::from(json!(["todos"]))));
        assert_eq!(hash_key(&key).as_str(), r#"["todos"]"#);
    }

    #[test]
    fn property_order_does_not_change_hash() {
        let a = QueryKey::from("todos").with(json!({"page": 1, "filter": {"done": true, "tag": "x"}}));
        let b = QueryKey::from("todos").with(json!({"filter": {"tag": "x", "done": true}, "page": 1}));

        assert_eq!(hash_key(&a), hash_key(&b));
        assert_eq!(
            hash_key(&a).as_str(),
            r#"["todos",{"filter":{"done":true,"tag":"x"},"page":1}]"#
        );
    }

    #[test]
    fn array_order_changes_hash() {
        let a = QueryKey::from(json!(["todos", [1, 2]]));
        let b = QueryKey::from(json!(["todos", [2, 1]]));
        assert_ne!(hash_key(&a), hash_key(&b));
    }

    #[test]
    fn strings_are_escaped() {
        let key = QueryKey::from("say \"hi\"");
        assert_eq!(hash_key(&key).as_str(), r#"["say \"hi\""]"#);
    }

    #[test]
    fn custom_hash_fn_wins() {
        let hash_fn: KeyHashFn = Arc::new(|_| QueryHash::new("fixed"));
        let key = QueryKey::from("anything");
        assert_eq!(hash_key_by_options(&key, Some(&hash_fn)).as_str(), "fixed");
        assert_eq!(hash_key_by_options(&key, None), hash_key(&key));
    }

    #[test]
    fn partial_matching() {
        let key = QueryKey::from(json!(["todos", {"page": 1, "filter": "all"}]));

        assert!(partial_match_key(&key, &QueryKey::from("todos")));
        assert!(partial_match_key(&key, &QueryKey::from(json!(["todos", {"page": 1}]))));
        assert!(!partial_match_key(&key, &QueryKey::from(json!(["todos", {"page": 2}]))));
        assert!(!partial_match_key(&key, &QueryKey::from("posts")));
        assert!(!partial_match_key(&QueryKey::from("todos"), &key));
        assert!(partial_match_key(&key, &QueryKey::default()));
    }
}
