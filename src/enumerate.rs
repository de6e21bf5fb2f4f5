//! Resource enumeration
//!
//! An `Enumerator` streams the resources a run should visit. Problems with a
//! single resource are handed to the sink alongside a placeholder descriptor
//! and become failed work items; an `Err` from `visit` means the listing
//! itself broke and the run is aborted after draining.

use crate::error::EnumerationError;
use crate::resource::{ResourceInfo, ResourceKey};
use crate::store::ObjectStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Callback receiving each enumerated resource
pub type Sink<'a> = dyn FnMut(ResourceInfo, Option<EnumerationError>) + 'a;

/// Lazy, finite source of resources
pub trait Enumerator {
    fn visit(&mut self, sink: &mut Sink<'_>) -> Result<(), EnumerationError>;
}

/// Which resources a live enumeration selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Restrict to one namespace; `None` visits cluster-wide
    pub namespace: Option<String>,

    /// Lowercased kinds; `*` selects every kind
    pub include: Vec<String>,
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            namespace: None,
            include: vec!["*".to_string()],
        }
    }
}

impl Selector {
    pub fn matches(&self, key: &ResourceKey) -> bool {
        if let Some(ns) = &self.namespace {
            if key.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }
        self.includes_kind(&key.kind)
    }

    pub fn includes_kind(&self, kind: &str) -> bool {
        self.include
            .iter()
            .any(|k| k == "*" || k.eq_ignore_ascii_case(kind))
    }
}

/// Enumerator over a fixed list, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct StaticEnumerator {
    items: Vec<(ResourceInfo, Option<EnumerationError>)>,
    abort: Option<EnumerationError>,
}

impl StaticEnumerator {
    pub fn new(resources: impl IntoIterator<Item = ResourceInfo>) -> Self {
        Self {
            items: resources.into_iter().map(|r| (r, None)).collect(),
            abort: None,
        }
    }

    /// Append a resource that failed to load
    pub fn with_failure(mut self, info: ResourceInfo, error: EnumerationError) -> Self {
        self.items.push((info, Some(error)));
        self
    }

    /// Fail the listing after every queued item has been yielded
    pub fn abort_with(mut self, error: EnumerationError) -> Self {
        self.abort = Some(error);
        self
    }
}

impl Enumerator for StaticEnumerator {
    fn visit(&mut self, sink: &mut Sink<'_>) -> Result<(), EnumerationError> {
        for (info, err) in self.items.drain(..) {
            sink(info, err);
        }
        match self.abort.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Enumerates the contents of an `ObjectStore`
pub struct StoreEnumerator {
    store: Arc<dyn ObjectStore>,
    selector: Selector,
    failures: Vec<(ResourceInfo, EnumerationError)>,
}

impl StoreEnumerator {
    pub fn new(store: Arc<dyn ObjectStore>, selector: Selector) -> Self {
        Self {
            store,
            selector,
            failures: Vec::new(),
        }
    }

    /// Report resources that could not be loaded into the store
    pub fn with_failures(mut self, failures: Vec<(ResourceInfo, EnumerationError)>) -> Self {
        self.failures = failures;
        self
    }
}

impl Enumerator for StoreEnumerator {
    fn visit(&mut self, sink: &mut Sink<'_>) -> Result<(), EnumerationError> {
        for (info, err) in self.failures.drain(..) {
            sink(info, Some(err));
        }

        let objects = self
            .store
            .list()
            .map_err(|e| EnumerationError::Backend(e.to_string()))?;

        let mut selected = 0usize;
        for info in objects {
            if self.selector.matches(&info.key) {
                selected += 1;
                sink(info, None);
            }
        }
        debug!(selected, "Store enumeration complete");
        Ok(())
    }
}

/// Objects decoded from input files
#[derive(Debug, Default)]
pub struct LoadedFiles {
    pub resources: Vec<ResourceInfo>,
    pub failures: Vec<(ResourceInfo, EnumerationError)>,
}

/// Read JSON objects from files
///
/// Each file may hold one object, an array of objects, or a `List` with
/// `items`. Unreadable files and malformed objects are returned as failures.
/// Every decoded resource remembers its file and position for `write_files`.
pub fn load_files(paths: &[PathBuf]) -> LoadedFiles {
    let mut loaded = LoadedFiles::default();

    for path in paths {
        let source = path.display().to_string();
        let doc = match read_json(path) {
            Ok(doc) => doc,
            Err(err) => {
                let key = ResourceKey::new("File", None, source);
                loaded.failures.push((ResourceInfo::placeholder(key), err));
                continue;
            }
        };

        for (index, object) in split_document(doc).into_iter().enumerate() {
            match ResourceInfo::from_object(object) {
                Some(info) => loaded.resources.push(info.with_origin(source.as_str(), index)),
                None => {
                    let what = format!("{}#{}", source, index);
                    let key = ResourceKey::new("Unknown", None, what.clone());
                    let err = EnumerationError::Decode {
                        what,
                        reason: "object is missing kind or metadata.name".into(),
                    };
                    loaded
                        .failures
                        .push((ResourceInfo::placeholder(key).with_origin(source.as_str(), index), err));
                }
            }
        }
    }

    loaded
}

fn read_json(path: &Path) -> Result<Value, EnumerationError> {
    let text = fs::read_to_string(path).map_err(|e| EnumerationError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| EnumerationError::Decode {
        what: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn is_list(doc: &Value) -> bool {
    doc.get("kind").and_then(Value::as_str) == Some("List")
}

fn split_document(mut doc: Value) -> Vec<Value> {
    if is_list(&doc) {
        return match doc.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
    }
    match doc {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// The entry `split_document` yields at `index`, in place
fn entry_mut(doc: &mut Value, index: usize) -> Option<&mut Value> {
    if is_list(doc) {
        return doc.get_mut("items")?.get_mut(index);
    }
    match doc {
        Value::Array(items) => items.get_mut(index),
        other if index == 0 => Some(other),
        _ => None,
    }
}

/// Write resources back to the files they were loaded from
///
/// Each file is re-read and only the entries at the resources' recorded
/// positions are replaced, so the document keeps its shape and entries that
/// were never loaded (undecodable or duplicated) stay as they were. The
/// entry's original `resourceVersion` is kept; store-assigned ones are
/// dropped. Files with no changed entry are not touched. Returns the number
/// of files written.
pub fn write_files(resources: &[ResourceInfo]) -> io::Result<usize> {
    let mut by_path: BTreeMap<&str, Vec<(usize, &ResourceInfo)>> = BTreeMap::new();
    for info in resources {
        if let Some(origin) = &info.origin {
            by_path
                .entry(origin.path.as_str())
                .or_default()
                .push((origin.index, info));
        }
    }

    let mut written = 0;
    for (path, entries) in by_path {
        let mut doc = read_json(Path::new(path)).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut changed = 0usize;
        for (index, info) in entries {
            let entry = match entry_mut(&mut doc, index) {
                Some(entry) if holds(entry, info) => entry,
                _ => {
                    warn!(path, index, resource = %info.key, "Entry moved since load, leaving it unchanged");
                    continue;
                }
            };

            let mut object = info.object.clone();
            keep_resource_version(&mut object, entry);
            if *entry != object {
                *entry = object;
                changed += 1;
            }
        }

        if changed == 0 {
            trace!(path, "No changes to write");
            continue;
        }
        let mut text = serde_json::to_string_pretty(&doc)?;
        text.push('\n');
        fs::write(path, text)?;
        debug!(path, changed, "Wrote migrated objects");
        written += 1;
    }

    Ok(written)
}

/// Whether a document entry is still the object `info` was loaded from
fn holds(entry: &Value, info: &ResourceInfo) -> bool {
    ResourceInfo::from_object(entry.clone()).map_or(false, |loaded| loaded.key == info.key)
}

/// Give `object` the resourceVersion `original` carried, or none
fn keep_resource_version(object: &mut Value, original: &Value) {
    let version = original
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .cloned();
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        match version {
            Some(v) => {
                metadata.insert("resourceVersion".into(), v);
            }
            None => {
                metadata.remove("resourceVersion");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use tempfile::tempdir;

    fn pod(ns: &str, name: &str) -> ResourceInfo {
        ResourceInfo::from_object(json!({
            "kind": "Pod",
            "metadata": {"name": name, "namespace": ns}
        }))
        .unwrap()
    }

    fn collect(enumerator: &mut dyn Enumerator) -> (Vec<(ResourceInfo, Option<EnumerationError>)>, Result<(), EnumerationError>) {
        let mut seen = Vec::new();
        let result = enumerator.visit(&mut |info, err| seen.push((info, err)));
        (seen, result)
    }

    #[test]
    fn test_selector_namespace_and_kind() {
        let selector = Selector {
            namespace: Some("prod".into()),
            include: vec!["pod".into()],
        };
        assert!(selector.matches(&pod("prod", "a").key));
        assert!(!selector.matches(&pod("dev", "a").key));
        assert!(!selector.matches(&ResourceKey::new("Secret", Some("prod"), "s")));
    }

    #[test]
    fn test_static_enumerator_abort_after_items() {
        let mut e = StaticEnumerator::new([pod("a", "1"), pod("a", "2")])
            .abort_with(EnumerationError::Backend("connection refused".into()));
        let (seen, result) = collect(&mut e);
        assert_eq!(seen.len(), 2);
        assert!(result.is_err());
    }

    #[test]
    fn test_store_enumerator_filters() {
        let store = Arc::new(MemoryStore::with_objects([pod("a", "1"), pod("b", "2")]));
        let selector = Selector {
            namespace: Some("b".into()),
            ..Selector::default()
        };
        let mut e = StoreEnumerator::new(store, selector);
        let (seen, result) = collect(&mut e);
        assert!(result.is_ok());
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.name(), "2");
    }

    #[test]
    fn test_load_files() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("list.json");
        fs::write(
            &list,
            json!({
                "kind": "List",
                "items": [
                    {"kind": "Pod", "metadata": {"name": "a", "namespace": "x"}},
                    {"kind": "Pod", "metadata": {}}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let missing = dir.path().join("missing.json");

        let loaded = load_files(&[list.clone(), missing]);
        assert_eq!(loaded.resources.len(), 1);
        let origin = loaded.resources[0].origin.as_ref().unwrap();
        assert_eq!(origin.path, list.display().to_string());
        assert_eq!(origin.index, 0);
        assert_eq!(loaded.failures.len(), 2);
        assert!(matches!(loaded.failures[0].1, EnumerationError::Decode { .. }));
        assert!(matches!(loaded.failures[1].1, EnumerationError::Read { .. }));
    }

    fn migrate(store: &MemoryStore, key: &ResourceKey) {
        let mut info = store.get(key).unwrap();
        info.object["apiVersion"] = json!("apps/v1");
        info.origin = None;
        store.update(&info).unwrap();
    }

    #[test]
    fn test_write_files_keeps_document_shape() {
        let dir = tempdir().unwrap();
        let single = dir.path().join("single.json");
        let list = dir.path().join("list.json");
        let untouched = dir.path().join("untouched.json");
        fs::write(
            &single,
            json!({"apiVersion": "extensions/v1beta1", "kind": "Deployment", "metadata": {"name": "a", "namespace": "x"}})
                .to_string(),
        )
        .unwrap();
        fs::write(
            &list,
            json!({
                "kind": "List",
                "items": [
                    {"apiVersion": "extensions/v1beta1", "kind": "Deployment", "metadata": {"name": "b", "namespace": "x", "resourceVersion": "881"}},
                    {"kind": "ConfigMap", "metadata": {}},
                    {"apiVersion": "v1", "kind": "Service", "metadata": {"name": "b", "namespace": "x"}}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let untouched_text = json!([{"kind": "Pod", "metadata": {"name": "p", "namespace": "x"}}]).to_string();
        fs::write(&untouched, &untouched_text).unwrap();

        let loaded = load_files(&[single.clone(), list.clone(), untouched.clone()]);
        assert_eq!(loaded.failures.len(), 1);
        let store = MemoryStore::with_objects(loaded.resources);
        migrate(&store, &ResourceKey::new("Deployment", Some("x"), "a"));
        migrate(&store, &ResourceKey::new("Deployment", Some("x"), "b"));

        let written = write_files(&store.list().unwrap()).unwrap();
        assert_eq!(written, 2);

        let single_doc: Value = serde_json::from_str(&fs::read_to_string(&single).unwrap()).unwrap();
        assert_eq!(single_doc["apiVersion"], "apps/v1");
        assert!(single_doc["metadata"].get("resourceVersion").is_none());

        let list_doc: Value = serde_json::from_str(&fs::read_to_string(&list).unwrap()).unwrap();
        assert_eq!(list_doc["kind"], "List");
        let items = list_doc["items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["apiVersion"], "apps/v1");
        assert_eq!(items[0]["metadata"]["resourceVersion"], "881");
        // The undecodable entry survives the rewrite
        assert_eq!(items[1], json!({"kind": "ConfigMap", "metadata": {}}));
        assert_eq!(items[2]["kind"], "Service");

        assert_eq!(fs::read_to_string(&untouched).unwrap(), untouched_text);
    }

    #[test]
    fn test_write_files_keeps_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dupes.json");
        fs::write(
            &path,
            json!([
                {"apiVersion": "extensions/v1beta1", "kind": "Deployment", "metadata": {"name": "a", "namespace": "x"}},
                {"apiVersion": "extensions/v1beta1", "kind": "Deployment", "metadata": {"name": "a", "namespace": "x"}, "spec": {"replicas": 2}}
            ])
            .to_string(),
        )
        .unwrap();

        let loaded = load_files(&[path.clone()]);
        assert_eq!(loaded.resources.len(), 2);
        let store = MemoryStore::with_objects(loaded.resources);
        migrate(&store, &ResourceKey::new("Deployment", Some("x"), "a"));
        assert_eq!(write_files(&store.list().unwrap()).unwrap(), 1);

        let doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let items = doc.as_array().unwrap();
        assert_eq!(items.len(), 2);
        // Only the copy the store kept was migrated
        assert_eq!(items[0]["apiVersion"], "extensions/v1beta1");
        assert_eq!(items[1]["apiVersion"], "apps/v1");
        assert_eq!(items[1]["spec"]["replicas"], 2);
    }
}
