//! Object store that migrations persist into
//!
//! `ObjectStore` is the seam to whatever backend holds the resources. The
//! in-memory implementation applies resourceVersion-based optimistic
//! concurrency so that stale writes surface as conflicts, which the engine
//! retries with a fresh visit.

use crate::error::{StoreError, StoreResult};
use crate::resource::{ResourceInfo, ResourceKey};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Backend holding resources, shared across worker threads
pub trait ObjectStore: Send + Sync {
    /// Fetch the current object
    fn get(&self, key: &ResourceKey) -> StoreResult<ResourceInfo>;

    /// Replace an object, returning the stored result with its new version
    fn update(&self, info: &ResourceInfo) -> StoreResult<ResourceInfo>;

    /// All objects, ordered by key
    fn list(&self) -> StoreResult<Vec<ResourceInfo>>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    info: ResourceInfo,
    version: u64,
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<ResourceKey, StoredObject>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load objects, assigning each an initial resourceVersion of 1
    pub fn with_objects(objects: impl IntoIterator<Item = ResourceInfo>) -> Self {
        let store = Self::new();
        for info in objects {
            store.insert(info);
        }
        store
    }

    /// Insert or overwrite an object without a version check
    pub fn insert(&self, mut info: ResourceInfo) {
        let mut objects = self.objects.write();
        let version = objects.get(&info.key).map(|o| o.version + 1).unwrap_or(1);
        set_resource_version(&mut info.object, version);
        objects.insert(info.key.clone(), StoredObject { info, version });
    }

    /// Successful updates performed through `ObjectStore::update`
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, key: &ResourceKey) -> StoreResult<ResourceInfo> {
        self.objects
            .read()
            .get(key)
            .map(|o| o.info.clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: key.kind.clone(),
                key: key.range_key(),
            })
    }

    fn update(&self, info: &ResourceInfo) -> StoreResult<ResourceInfo> {
        if !info.object.is_object() {
            return Err(StoreError::Invalid(format!("{} is not a JSON object", info.key)));
        }

        let mut objects = self.objects.write();
        let stored = objects.get_mut(&info.key).ok_or_else(|| StoreError::NotFound {
            kind: info.key.kind.clone(),
            key: info.key.range_key(),
        })?;

        if let Some(expected) = info.resource_version() {
            if expected != stored.version.to_string() {
                return Err(StoreError::Conflict {
                    kind: info.key.kind.clone(),
                    key: info.key.range_key(),
                    expected: expected.to_string(),
                    current: stored.version.to_string(),
                });
            }
        }

        let version = stored.version + 1;
        let mut updated = info.clone();
        updated.origin = stored.info.origin.clone();
        set_resource_version(&mut updated.object, version);
        stored.info = updated.clone();
        stored.version = version;
        self.writes.fetch_add(1, Ordering::Relaxed);

        Ok(updated)
    }

    fn list(&self) -> StoreResult<Vec<ResourceInfo>> {
        Ok(self.objects.read().values().map(|o| o.info.clone()).collect())
    }
}

fn set_resource_version(object: &mut Value, version: u64) {
    if let Some(obj) = object.as_object_mut() {
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".into(), Value::String(version.to_string()));
        }
    }
}
