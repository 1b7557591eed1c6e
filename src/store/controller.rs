use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::id;
use crate::index::manager::IndexManager;
use crate::query::{executor, update};
use crate::schema::validator;
use crate::storage::engine::LogEngine;
use crate::store::auth::{self, Role};

pub const AUTH_COLLECTION: &str = "_auth";
pub const SCHEMAS_COLLECTION: &str = "_schemas";
pub const INDEXES_COLLECTION: &str = "_indexes";

/// One entry of the persisted secondary-index catalog in `_indexes`.
#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    collection: String,
    field: String,
}

/// Principal record as persisted in `_auth`.
#[derive(Debug, Serialize)]
struct UserRecord<'a> {
    _id: String,
    key_hash: String,
    role: &'a str,
    created_at: i64,
}

struct StoreInner {
    collections: HashMap<String, Vec<Arc<Value>>>,
    indexes: IndexManager,
    schemas: HashMap<String, Value>,
    auth: HashMap<String, Role>, // key hash -> role
}

/// The storage kernel: durable, concurrent, policy-enforcing orchestrator.
///
/// A single readers-writer lock guards the live set, the indexes, the
/// schemas, and the auth cache. Writers append to the log before installing
/// the change in memory, so a reader observes either pre-write or post-write
/// state, never a half-applied change. Documents are shared `Arc` nodes
/// internally and deep-copied at every store boundary.
pub struct Store {
    engine: LogEngine,
    inner: RwLock<StoreInner>,
}

impl Store {
    /// Opens the store: replays every collection log, rebuilds indexes, and
    /// bootstraps a default admin principal when the auth store is empty.
    pub fn open(config: &Config) -> Result<Store> {
        info!("Core: initializing AevumDB storage engine");
        let engine = LogEngine::new(config.data_dir.clone());
        engine.init()?;

        let mut inner = StoreInner {
            collections: HashMap::new(),
            indexes: IndexManager::new(),
            schemas: HashMap::new(),
            auth: HashMap::new(),
        };
        load_all(&engine, &mut inner)?;

        if inner.auth.is_empty() {
            warn!("Security: auth store empty, bootstrapping default admin principal");
            create_user_locked(&engine, &mut inner, &config.bootstrap_key, "admin")?;
        }

        info!("Core: engine online, accepting commands");
        Ok(Store {
            engine,
            inner: RwLock::new(inner),
        })
    }

    /// Resolves an API key to its role; failures resolve to `Role::None`.
    pub fn authenticate(&self, key: &str) -> Role {
        if key.is_empty() {
            return Role::None;
        }
        let hashed = auth::hash_key(key);
        self.inner
            .read()
            .auth
            .get(&hashed)
            .copied()
            .unwrap_or(Role::None)
    }

    /// Registers a principal and persists its record to `_auth`.
    pub fn create_user(&self, key: &str, role_name: &str) -> Result<()> {
        let mut guard = self.inner.write();
        create_user_locked(&self.engine, &mut guard, key, role_name)
    }

    /// Validate, assign `_id`, append, then publish to the live set.
    pub fn insert(&self, collection: &str, data: Value) -> Result<()> {
        validate_collection_name(collection)?;
        let mut guard = self.inner.write();
        insert_locked(&self.engine, &mut guard, collection, data)
    }

    /// Updates matches when the query selects anything, inserts otherwise.
    pub fn upsert(&self, collection: &str, query: &Value, data: Value) -> Result<()> {
        validate_collection_name(collection)?;
        let mut guard = self.inner.write();
        let existing = guard.collections.get(collection).map_or(0, |docs| {
            if is_absent(query) {
                docs.len()
            } else {
                executor::count(docs, query)
            }
        });
        if existing > 0 {
            update_locked(&self.engine, &mut guard, collection, query, &data)
        } else {
            insert_locked(&self.engine, &mut guard, collection, data)
        }
    }

    /// Runs the query executor's update over a snapshot, swaps the collection
    /// in, rebuilds its indexes, and compacts the log to persist the result.
    pub fn update(&self, collection: &str, query: &Value, update_doc: &Value) -> Result<()> {
        validate_collection_name(collection)?;
        let mut guard = self.inner.write();
        update_locked(&self.engine, &mut guard, collection, query, update_doc)
    }

    /// Turbo-delete: one tombstone frame per victim, then detach from the
    /// primary index, the secondary indexes, and the live list. Space is
    /// reclaimed at the next compaction.
    pub fn delete(&self, collection: &str, query: &Value) -> Result<usize> {
        validate_collection_name(collection)?;
        let mut guard = self.inner.write();
        delete_locked(&self.engine, &mut guard, collection, query)
    }

    /// Three-tier read path; the result is always a fresh deep-copied array.
    pub fn find(
        &self,
        collection: &str,
        query: &Value,
        sort: &Value,
        projection: &Value,
        limit: usize,
        skip: usize,
    ) -> Result<Value> {
        validate_collection_name(collection)?;
        let inner = self.inner.read();
        let docs = match inner.collections.get(collection) {
            Some(docs) => docs,
            None => return Ok(Value::Array(Vec::new())),
        };

        let unshaped = is_absent(sort) && is_absent(projection);
        if unshaped {
            if let Some(conditions) = query.as_object() {
                if conditions.len() == 1 {
                    // Tier 1: primary-key point lookup.
                    if let Some(id) = conditions.get("_id").and_then(|v| v.as_str()) {
                        debug!(collection, id, "Query: primary index point lookup");
                        let mut out = Vec::new();
                        if let Some(doc) = inner.indexes.lookup_by_id(collection, id) {
                            out.push(doc.as_ref().clone());
                        }
                        return Ok(Value::Array(out));
                    }

                    // Tier 2: secondary-index bucket. Only string/number
                    // equality can be served here; other values are not in
                    // the index and must fall through to the scan.
                    if let Some((field, value)) = conditions.iter().next() {
                        if inner.indexes.is_registered(collection, field) {
                            if let Some(key) = IndexManager::index_key(value) {
                                debug!(collection, field = %field, "Query: using secondary index");
                                let bucket = inner.indexes.lookup_by_field(collection, field, &key);
                                let total = bucket.len();
                                if skip >= total {
                                    return Ok(Value::Array(Vec::new()));
                                }
                                let end = if limit > 0 { (skip + limit).min(total) } else { total };
                                return Ok(Value::Array(
                                    bucket[skip..end]
                                        .iter()
                                        .map(|doc| doc.as_ref().clone())
                                        .collect(),
                                ));
                            }
                        }
                    }
                }
            }
        }

        // Tier 3: full scan through the query executor.
        warn!(collection, "Query: full scan triggered");
        Ok(Value::Array(executor::find(
            docs, query, sort, projection, limit, skip,
        )?))
    }

    /// Collection size for an empty query, executor count otherwise.
    pub fn count(&self, collection: &str, query: &Value) -> Result<usize> {
        validate_collection_name(collection)?;
        let inner = self.inner.read();
        let docs = match inner.collections.get(collection) {
            Some(docs) => docs,
            None => return Ok(0),
        };
        if is_absent(query) {
            Ok(docs.len())
        } else {
            Ok(executor::count(docs, query))
        }
    }

    /// Replaces the in-memory schema and appends it to the `_schemas` log.
    pub fn set_schema(&self, collection: &str, schema: &Value) -> Result<()> {
        validate_collection_name(collection)?;
        if !schema.is_object() {
            return Err(Error::new(
                ErrorKind::Validation,
                "Schema must be a JSON object",
            ));
        }
        let mut guard = self.inner.write();

        // The frame carries its target collection so replay can route it.
        let mut frame = schema.clone();
        if let Some(obj) = frame.as_object_mut() {
            obj.insert("collection".to_string(), Value::String(collection.to_string()));
        }
        self.engine
            .append(SCHEMAS_COLLECTION, &serde_json::to_string(&frame)?)?;

        guard.schemas.insert(collection.to_string(), schema.clone());
        info!(collection, "Schema: definition updated");
        Ok(())
    }

    /// Registers a secondary index, backfills it from the live documents, and
    /// rewrites `_indexes` as a single catalog frame.
    pub fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        validate_collection_name(collection)?;
        if field.is_empty() {
            return Err(Error::new(ErrorKind::Protocol, "Missing argument: 'field'"));
        }
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if inner.indexes.is_registered(collection, field) {
            return Ok(());
        }

        info!(collection, field, "Index: creating secondary index");
        inner.indexes.register_field(collection, field);
        if let Some(docs) = inner.collections.get(collection) {
            inner.indexes.rebuild(collection, docs);
        }

        let entries: Vec<IndexEntry> = inner
            .indexes
            .registrations()
            .into_iter()
            .map(|(collection, field)| IndexEntry { collection, field })
            .collect();
        self.engine
            .compact(INDEXES_COLLECTION, &[serde_json::to_string(&entries)?])?;
        Ok(())
    }

    /// Serializes the live sequence and rewrites the collection log.
    pub fn trigger_compaction(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let guard = self.inner.write();
        compact_collection(&self.engine, &guard, collection)
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::Protocol,
            format!("Invalid collection name: '{}'", name),
        ))
    }
}

/// An absent query/sort/projection: null, a non-object, or an empty object.
fn is_absent(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => obj.is_empty(),
        None => true,
    }
}

/// Replays every collection log into memory.
///
/// `_indexes` is loaded first because its catalog configures the secondary
/// indexes every other collection rebuilds into. `_schemas` frames route by
/// their `collection` attribute, last one wins. `_auth` replays like any data
/// collection and then seeds the authentication cache.
fn load_all(engine: &LogEngine, inner: &mut StoreInner) -> Result<()> {
    debug!("Core: replaying collection logs");
    let mut names = engine.list_collections()?;
    names.sort();

    if names.iter().any(|name| name == INDEXES_COLLECTION) {
        let frames = engine.load_log(INDEXES_COLLECTION)?;
        if let Some(catalog) = frames.last() {
            match serde_json::from_str::<Vec<IndexEntry>>(catalog) {
                Ok(entries) => {
                    for entry in entries {
                        inner.indexes.register_field(&entry.collection, &entry.field);
                    }
                }
                Err(_) => warn!("Core: malformed index catalog frame, ignoring"),
            }
        }
    }

    for name in &names {
        if name == INDEXES_COLLECTION {
            continue;
        }
        let frames = engine.load_log(name)?;

        if name == SCHEMAS_COLLECTION {
            for frame in &frames {
                match serde_json::from_str::<Value>(frame) {
                    Ok(schema) => {
                        let target = schema
                            .get("collection")
                            .and_then(|c| c.as_str())
                            .map(str::to_string);
                        match target {
                            Some(target) => {
                                inner.schemas.insert(target, schema);
                            }
                            None => warn!("Core: schema frame without a collection, skipping"),
                        }
                    }
                    Err(_) => warn!("Core: skipping corrupt schema frame"),
                }
            }
            continue;
        }

        let frame_count = frames.len();
        let live = replay_frames(name, frames);
        let live_count = live.len();

        inner.indexes.rebuild(name, &live);
        inner.collections.insert(name.clone(), live);

        if name == AUTH_COLLECTION {
            seed_auth_cache(inner);
            info!("Security: RBAC policies loaded");
        }

        // Fragmentation heuristic: rewrite a log dominated by dead frames.
        if frame_count > live_count * 2 && live_count > 100 {
            info!(
                collection = %name,
                frames = frame_count,
                live = live_count,
                "Maintenance: auto-compacting fragmented log"
            );
            compact_collection(engine, inner, name)?;
        }
    }
    Ok(())
}

/// Applies upserts and tombstones in log order: the latest frame per `_id`
/// wins, a tombstone erases, and survivors keep first-insertion order.
/// Malformed frames are skipped so later frames stay durable.
fn replay_frames(collection: &str, frames: Vec<String>) -> Vec<Arc<Value>> {
    let mut slots: Vec<Option<Arc<Value>>> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for frame in frames {
        let doc: Value = match serde_json::from_str(&frame) {
            Ok(doc) => doc,
            Err(_) => {
                warn!(collection, "Core: detected corrupt frame, skipping");
                continue;
            }
        };
        let doc_id = match doc.get("_id").and_then(|v| v.as_str()) {
            Some(doc_id) => doc_id.to_string(),
            None => {
                warn!(collection, "Core: frame without _id, skipping");
                continue;
            }
        };
        let deleted = doc
            .get("_deleted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        match positions.get(&doc_id).copied() {
            Some(slot) => {
                if deleted {
                    slots[slot] = None;
                    positions.remove(&doc_id);
                } else {
                    slots[slot] = Some(Arc::new(doc));
                }
            }
            None => {
                if !deleted {
                    positions.insert(doc_id, slots.len());
                    slots.push(Some(Arc::new(doc)));
                }
            }
        }
    }

    slots.into_iter().flatten().collect()
}

fn seed_auth_cache(inner: &mut StoreInner) {
    let docs = match inner.collections.get(AUTH_COLLECTION) {
        Some(docs) => docs,
        None => return,
    };
    for doc in docs {
        let key_hash = doc.get("key_hash").and_then(|v| v.as_str());
        let role = doc.get("role").and_then(|v| v.as_str());
        if let (Some(key_hash), Some(role)) = (key_hash, role) {
            inner.auth.insert(key_hash.to_string(), Role::parse(role));
        }
    }
}

fn create_user_locked(
    engine: &LogEngine,
    inner: &mut StoreInner,
    key: &str,
    role_name: &str,
) -> Result<()> {
    let hashed = auth::hash_key(key);
    let record = UserRecord {
        _id: id::generate(),
        key_hash: hashed.clone(),
        role: role_name,
        created_at: Utc::now().timestamp(),
    };

    let frame = serde_json::to_string(&record)?;
    engine.append(AUTH_COLLECTION, &frame)?;

    let doc = Arc::new(serde_json::to_value(&record)?);
    inner
        .collections
        .entry(AUTH_COLLECTION.to_string())
        .or_default()
        .push(doc.clone());
    inner.indexes.insert_doc(AUTH_COLLECTION, &doc);
    inner.auth.insert(hashed, Role::parse(role_name));

    info!(role = role_name, "Security: user provisioned");
    Ok(())
}

fn insert_locked(
    engine: &LogEngine,
    inner: &mut StoreInner,
    collection: &str,
    mut data: Value,
) -> Result<()> {
    if !data.is_object() {
        return Err(Error::new(
            ErrorKind::Validation,
            "Document must be a JSON object",
        ));
    }

    if let Some(schema) = inner.schemas.get(collection) {
        if !validator::validate(&data, schema) {
            warn!(collection, "Validation: schema violation detected");
            return Err(Error::new(
                ErrorKind::Validation,
                format!("Schema violation in collection '{}'", collection),
            ));
        }
    }

    let doc_id = match data.get("_id") {
        Some(Value::String(existing)) => existing.clone(),
        Some(_) => {
            return Err(Error::new(
                ErrorKind::Validation,
                "Field '_id' must be a string",
            ))
        }
        None => {
            let generated = id::generate();
            if let Some(obj) = data.as_object_mut() {
                obj.insert("_id".to_string(), Value::String(generated.clone()));
            }
            generated
        }
    };

    if inner.indexes.lookup_by_id(collection, &doc_id).is_some() {
        return Err(Error::new(
            ErrorKind::Validation,
            format!("Document with _id '{}' already exists", doc_id),
        ));
    }

    // Durability first: the frame hits the log before readers can see it.
    engine.append(collection, &serde_json::to_string(&data)?)?;

    let doc = Arc::new(data);
    inner
        .collections
        .entry(collection.to_string())
        .or_default()
        .push(doc.clone());
    inner.indexes.insert_doc(collection, &doc);

    debug!(collection, id = %doc_id, "CRUD: document inserted");
    Ok(())
}

fn update_locked(
    engine: &LogEngine,
    inner: &mut StoreInner,
    collection: &str,
    query: &Value,
    update_doc: &Value,
) -> Result<()> {
    let snapshot = inner.collections.get(collection).ok_or_else(|| {
        Error::new(
            ErrorKind::NotFound,
            format!("Collection '{}' not found", collection),
        )
    })?;

    debug!(collection, "CRUD: executing update");
    let (next, matched) = update::apply(snapshot, query, update_doc)?;
    if matched == 0 {
        return Err(Error::new(ErrorKind::NotFound, "No documents matched"));
    }

    // Atomic swap of the live list, then full index rebuild.
    inner.indexes.rebuild(collection, &next);
    inner.collections.insert(collection.to_string(), next);

    // The rewritten collection is persisted through compaction.
    compact_collection(engine, inner, collection)
}

fn delete_locked(
    engine: &LogEngine,
    inner: &mut StoreInner,
    collection: &str,
    query: &Value,
) -> Result<usize> {
    if !inner.collections.contains_key(collection) {
        return Err(Error::new(
            ErrorKind::NotFound,
            "No documents matched or collection not found",
        ));
    }

    let victims = candidate_ids(inner, collection, query)?;
    if victims.is_empty() {
        return Err(Error::new(
            ErrorKind::NotFound,
            "No documents matched or collection not found",
        ));
    }

    debug!(collection, count = victims.len(), "CRUD: turbo delete removing documents");
    for doc_id in &victims {
        let doc = match inner.indexes.lookup_by_id(collection, doc_id) {
            Some(doc) => doc.clone(),
            None => continue,
        };

        let tombstone = json!({"_id": doc_id, "_deleted": true});
        engine.append(collection, &serde_json::to_string(&tombstone)?)?;

        inner.indexes.remove_doc(collection, &doc);
        if let Some(live) = inner.collections.get_mut(collection) {
            live.retain(|entry| !Arc::ptr_eq(entry, &doc));
        }
    }
    Ok(victims.len())
}

/// Candidate selection for turbo-delete: primary lookup for an exact `_id`
/// query, secondary lookup for a single indexed equality, full scan
/// otherwise.
fn candidate_ids(inner: &StoreInner, collection: &str, query: &Value) -> Result<Vec<String>> {
    if let Some(conditions) = query.as_object() {
        if conditions.len() == 1 {
            if let Some(doc_id) = conditions.get("_id").and_then(|v| v.as_str()) {
                return Ok(match inner.indexes.lookup_by_id(collection, doc_id) {
                    Some(_) => vec![doc_id.to_string()],
                    None => Vec::new(),
                });
            }

            if let Some((field, value)) = conditions.iter().next() {
                if inner.indexes.is_registered(collection, field) {
                    if let Some(key) = IndexManager::index_key(value) {
                        debug!(collection, field = %field, "CRUD: delete via secondary index");
                        return Ok(inner
                            .indexes
                            .lookup_by_field(collection, field, &key)
                            .iter()
                            .filter_map(|doc| doc.get("_id").and_then(|v| v.as_str()))
                            .map(str::to_string)
                            .collect());
                    }
                }
            }
        }
    }

    warn!(collection, "CRUD: full scan required for delete");
    let docs = inner
        .collections
        .get(collection)
        .map(|docs| docs.as_slice())
        .unwrap_or(&[]);
    let matches = executor::find(docs, query, &Value::Null, &Value::Null, 0, 0)?;
    Ok(matches
        .iter()
        .filter_map(|doc| doc.get("_id").and_then(|v| v.as_str()))
        .map(str::to_string)
        .collect())
}

/// Rewrites a collection log to exactly one frame per live document.
/// A failure leaves the original file intact.
fn compact_collection(engine: &LogEngine, inner: &StoreInner, collection: &str) -> Result<()> {
    let docs = inner.collections.get(collection).ok_or_else(|| {
        Error::new(
            ErrorKind::NotFound,
            format!("Collection '{}' not found", collection),
        )
    })?;

    let mut frames = Vec::with_capacity(docs.len());
    for doc in docs {
        frames.push(serde_json::to_string(doc.as_ref())?);
    }
    engine.compact(collection, &frames)?;
    debug!(collection, "Maintenance: compaction complete");
    Ok(())
}
