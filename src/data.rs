// src/data.rs

//! Key/value payloads passed into and out of task units.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known key carrying an image location reference.
pub const KEY_IMAGE_URI: &str = "image_uri";

/// A primitive value stored in [`Data`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Bool(b) => write!(f, "{b}"),
            DataValue::Int(i) => write!(f, "{i}"),
            DataValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Bool(v)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Str(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Str(v)
    }
}

/// Ordered string-keyed mapping of primitive values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Data {
    values: BTreeMap<String, DataValue>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DataValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(DataValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(DataValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(DataValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Return `self` with every entry of `other` written over it.
    pub fn overlaid_with(&self, other: &Data) -> Data {
        let mut merged = self.clone();
        for (k, v) in other.values.iter() {
            merged.values.insert(k.clone(), v.clone());
        }
        merged
    }
}

impl<K, V> FromIterator<(K, V)> for Data
where
    K: Into<String>,
    V: Into<DataValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut data = Data::new();
        for (k, v) in iter {
            data.insert(k, v);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_only_match_their_variant() {
        let data = Data::new()
            .with(KEY_IMAGE_URI, "file:///tmp/a.png")
            .with("level", 3i64)
            .with("charging", true);

        assert_eq!(data.get_str(KEY_IMAGE_URI), Some("file:///tmp/a.png"));
        assert_eq!(data.get_int("level"), Some(3));
        assert_eq!(data.get_bool("charging"), Some(true));
        assert_eq!(data.get_str("level"), None);
        assert_eq!(data.get_int("missing"), None);
    }

    #[test]
    fn overlay_prefers_the_other_side() {
        let base = Data::new().with("a", "base").with("b", 1i64);
        let top = Data::new().with("a", "top");

        let merged = base.overlaid_with(&top);
        assert_eq!(merged.get_str("a"), Some("top"));
        assert_eq!(merged.get_int("b"), Some(1));
    }

    #[test]
    fn toml_tables_deserialize_into_primitives() {
        let data: Data = toml::from_str("uri = \"x\"\nn = 2\nflag = false\n").unwrap();
        assert_eq!(data.get_str("uri"), Some("x"));
        assert_eq!(data.get_int("n"), Some(2));
        assert_eq!(data.get_bool("flag"), Some(false));
    }
}
