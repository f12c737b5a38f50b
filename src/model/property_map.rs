//! PropertyMap, the key-value store on nodes, relationships and parameters.
//!
//! Ordered by key so prompt rendering, text summaries and result rows are
//! deterministic across runs.

use std::collections::BTreeMap;
use super::Value;

/// A map of property names to values.
pub type PropertyMap = BTreeMap<String, Value>;

/// Build a `Value::Map` from (key, value) pairs.
impl<K, V> From<Vec<(K, V)>> for Value
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Build a `PropertyMap` from (key, value) pairs.
pub fn props<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> PropertyMap
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
