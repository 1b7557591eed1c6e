use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::query::path;

/// Primary and secondary indexes over the live document set.
///
/// The primary index maps `_id` to the shared document node; the secondary
/// index maps (collection, field, stringified value) to the set of documents
/// carrying that value. Both hold the same `Arc` nodes as the live list, so
/// membership is pointer identity, not structural equality.
pub struct IndexManager {
    primary: HashMap<String, HashMap<String, Arc<Value>>>,
    secondary: HashMap<String, HashMap<String, HashMap<String, Vec<Arc<Value>>>>>,
    registered: HashMap<String, BTreeSet<String>>,
}

impl IndexManager {
    pub fn new() -> Self {
        IndexManager {
            primary: HashMap::new(),
            secondary: HashMap::new(),
            registered: HashMap::new(),
        }
    }

    /// Canonical index key for a field value.
    ///
    /// Strings key as themselves. Numbers are unified through `f64` and
    /// rendered with Rust's shortest round-trip formatting, so `100`, `100.0`
    /// and `1e2` all share the key `"100"`. Other types are not indexed.
    pub fn index_key(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => n.as_f64().map(|f| f.to_string()),
            _ => None,
        }
    }

    /// Registers a secondary-index field. Returns false if already present.
    pub fn register_field(&mut self, collection: &str, field: &str) -> bool {
        self.registered
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string())
    }

    pub fn is_registered(&self, collection: &str, field: &str) -> bool {
        self.registered
            .get(collection)
            .map_or(false, |fields| fields.contains(field))
    }

    /// The full (collection, field) catalog, in stable order.
    pub fn registrations(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .registered
            .iter()
            .flat_map(|(collection, fields)| {
                fields
                    .iter()
                    .map(move |field| (collection.clone(), field.clone()))
            })
            .collect();
        entries.sort();
        entries
    }

    pub fn insert_doc(&mut self, collection: &str, doc: &Arc<Value>) {
        if let Some(id) = doc.get("_id").and_then(|v| v.as_str()) {
            self.primary
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), doc.clone());
        }

        if let Some(fields) = self.registered.get(collection) {
            let buckets = self.secondary.entry(collection.to_string()).or_default();
            for field in fields {
                if let Some(key) = path::lookup(doc, field).and_then(Self::index_key) {
                    buckets
                        .entry(field.clone())
                        .or_default()
                        .entry(key)
                        .or_default()
                        .push(doc.clone());
                }
            }
        }
    }

    pub fn remove_doc(&mut self, collection: &str, doc: &Arc<Value>) {
        if let Some(id) = doc.get("_id").and_then(|v| v.as_str()) {
            if let Some(ids) = self.primary.get_mut(collection) {
                ids.remove(id);
            }
        }

        let fields = match self.registered.get(collection) {
            Some(fields) => fields,
            None => return,
        };
        if let Some(by_field) = self.secondary.get_mut(collection) {
            for field in fields {
                if let Some(key) = path::lookup(doc, field).and_then(Self::index_key) {
                    if let Some(buckets) = by_field.get_mut(field) {
                        if let Some(bucket) = buckets.get_mut(&key) {
                            bucket.retain(|entry| !Arc::ptr_eq(entry, doc));
                            if bucket.is_empty() {
                                buckets.remove(&key);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Wipes and re-inserts a collection's indexes from its live sequence.
    pub fn rebuild(&mut self, collection: &str, docs: &[Arc<Value>]) {
        self.primary.insert(collection.to_string(), HashMap::new());
        self.secondary.insert(collection.to_string(), HashMap::new());
        for doc in docs {
            self.insert_doc(collection, doc);
        }
    }

    pub fn lookup_by_id(&self, collection: &str, id: &str) -> Option<&Arc<Value>> {
        self.primary.get(collection)?.get(id)
    }

    pub fn lookup_by_field(&self, collection: &str, field: &str, key: &str) -> &[Arc<Value>] {
        self.secondary
            .get(collection)
            .and_then(|by_field| by_field.get(field))
            .and_then(|buckets| buckets.get(key))
            .map_or(&[], |bucket| bucket.as_slice())
    }

    pub fn primary_ids(&self, collection: &str) -> Vec<String> {
        self.primary
            .get(collection)
            .map_or_else(Vec::new, |ids| ids.keys().cloned().collect())
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}
