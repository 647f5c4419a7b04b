use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key/value annotations attached to a single filesystem entity.
///
/// Every [`File`](crate::File) and [`Directory`](crate::Directory) owns one
/// of these. Tasks may read and write it in place through shared references;
/// writes become visible to every later step. The lock serializes individual
/// map operations only. Two tasks in the same step writing the same key race,
/// and which write wins is up to the caller to avoid.
#[derive(Default)]
pub struct Metadata {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing any previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.write().insert(key.into(), value.into());
    }

    /// Read a key, cloning the value out of the map.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy every entry of `other` into this map, overwriting on conflict.
    pub fn merge(&self, other: &Metadata) {
        let incoming = other.snapshot();
        self.entries.write().extend(incoming);
    }

    /// A point-in-time copy of the whole map.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.read().clone()
    }
}

impl From<BTreeMap<String, Value>> for Metadata {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl Clone for Metadata {
    fn clone(&self) -> Self {
        Self::from(self.snapshot())
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, Value>::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let meta = Metadata::new();
        assert!(meta.is_empty());

        meta.insert("pages", 42);
        meta.insert("title", "report");

        assert_eq!(meta.get("pages"), Some(Value::from(42)));
        assert_eq!(meta.get("title"), Some(Value::from("report")));
        assert_eq!(meta.get("missing"), None);
        assert_eq!(meta.len(), 2);
    }

    #[test]
    fn insert_replaces_previous_value() {
        let meta = Metadata::new();
        meta.insert("state", "raw");
        meta.insert("state", "refined");
        assert_eq!(meta.get("state"), Some(Value::from("refined")));
        assert_eq!(meta.len(), 1);
    }

    #[test]
    fn merge_overwrites_on_conflict() {
        let left = Metadata::new();
        left.insert("a", 1);
        left.insert("b", 1);

        let right = Metadata::new();
        right.insert("b", 2);
        right.insert("c", 2);

        left.merge(&right);

        assert_eq!(left.get("a"), Some(Value::from(1)));
        assert_eq!(left.get("b"), Some(Value::from(2)));
        assert_eq!(left.get("c"), Some(Value::from(2)));
    }

    #[test]
    fn concurrent_inserts_are_not_lost() {
        let meta = Metadata::new();

        std::thread::scope(|scope| {
            for thread in 0..8 {
                let meta = &meta;
                scope.spawn(move || {
                    for i in 0..100 {
                        meta.insert(format!("{thread}-{i}"), i);
                    }
                });
            }
        });

        assert_eq!(meta.len(), 800);
    }

    #[test]
    fn serde_round_trip() {
        let meta = Metadata::new();
        meta.insert("pages", 3);
        meta.insert("lang", "en");

        let json = serde_json::to_string(&meta).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();

        assert_eq!(back.snapshot(), meta.snapshot());
    }
}
