//! Fields - nested string-keyed value map
//!
//! The `Fields` map stores event data as nested JSON-shaped values.
//! Keys passed to [`Fields::get`], [`Fields::put`] and [`Fields::delete`]
//! are dotted paths: `"host.name"` addresses `{"host": {"name": ...}}`.
//! Intermediate maps are created on demand when writing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Nested mapping from string keys to values
///
/// Values are scalars, nested maps, or ordered sequences
/// (`serde_json::Value`). Cloning is a deep copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Map<String, Value>);

impl Fields {
    /// Create an empty field map
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Number of top-level keys
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the map has no keys
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a value by dotted path
    ///
    /// Tries the full key as a literal top-level entry first, then walks
    /// the dotted path through nested maps.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.0.get(key) {
            return Some(v);
        }

        let mut current: &Map<String, Value> = &self.0;
        let mut parts = key.split('.').peekable();
        while let Some(part) = parts.next() {
            let value = current.get(part)?;
            if parts.peek().is_none() {
                return Some(value);
            }
            current = value.as_object()?;
        }
        None
    }

    /// Check whether a dotted path exists
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value at a dotted path, creating intermediate maps
    ///
    /// An intermediate value that is not a map is replaced by one.
    /// Returns the previous value at the path, if any.
    pub fn put(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        let mut current: &mut Map<String, Value> = &mut self.0;
        let mut parts = key.split('.').peekable();

        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                return current.insert(part.to_string(), value.into());
            }

            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            // Safe: just ensured the slot is an object.
            current = slot.as_object_mut().unwrap();
        }
        None
    }

    /// Remove a value by dotted path, returning it
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        if let Some(v) = self.0.remove(key) {
            return Some(v);
        }

        let (parent_path, leaf) = key.rsplit_once('.')?;
        let mut current: &mut Map<String, Value> = &mut self.0;
        for part in parent_path.split('.') {
            current = current.get_mut(part)?.as_object_mut()?;
        }
        current.remove(leaf)
    }

    /// Recursively merge `other` into `self`
    ///
    /// Nested maps merge key by key; any other value in `other` replaces
    /// the value in `self`.
    pub fn deep_update(&mut self, other: Fields) {
        deep_update_map(&mut self.0, other.0);
    }

    /// Iterate over top-level entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Access the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying map
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Fields {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn deep_update_map(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Object(dst_obj)), Value::Object(src_obj)) => {
                deep_update_map(dst_obj, src_obj);
            }
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}
