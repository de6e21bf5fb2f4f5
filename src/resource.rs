//! Resource descriptors and the migration reporter capability

use serde_json::Value;
use std::fmt;

/// Identity of a single cluster resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// Resource kind (e.g. "ConfigMap")
    pub kind: String,

    /// Namespace, `None` for cluster-scoped resources
    pub namespace: Option<String>,

    /// Object name
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }

    /// Lexical range key: `namespace/name`, or `name` when cluster-scoped
    pub fn range_key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "-n {} {}/{}", ns, self.kind.to_lowercase(), self.name),
            None => write!(f, "{}/{}", self.kind.to_lowercase(), self.name),
        }
    }
}

/// Where a file-loaded resource sits in its input document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub path: String,

    /// Position among the document's entries (0 for a bare object)
    pub index: usize,
}

/// A resource instance as yielded by an enumerator
///
/// Visit and action callbacks receive this mutably and may rewrite `object`
/// in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    pub key: ResourceKey,

    /// Current serialized representation
    pub object: Value,

    /// Where the resource came from, for static file input
    pub origin: Option<Origin>,
}

impl ResourceInfo {
    pub fn new(key: ResourceKey, object: Value) -> Self {
        Self {
            key,
            object,
            origin: None,
        }
    }

    /// Build a descriptor from an object's `kind` and `metadata`
    ///
    /// Returns `None` if the object has no kind or name.
    pub fn from_object(object: Value) -> Option<Self> {
        let kind = object.get("kind")?.as_str()?.to_string();
        let metadata = object.get("metadata")?;
        let name = metadata.get("name")?.as_str()?.to_string();
        let namespace = metadata.get("namespace").and_then(Value::as_str);
        let key = ResourceKey::new(kind, namespace, name);
        Some(Self::new(key, object))
    }

    /// Descriptor for a resource that failed to load, with no object body
    pub fn placeholder(key: ResourceKey) -> Self {
        Self::new(key, Value::Null)
    }

    pub fn with_origin(mut self, path: impl Into<String>, index: usize) -> Self {
        self.origin = Some(Origin {
            path: path.into(),
            index,
        });
        self
    }

    pub fn kind(&self) -> &str {
        &self.key.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.key.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// `metadata.resourceVersion`, if present
    pub fn resource_version(&self) -> Option<&str> {
        self.object
            .get("metadata")
            .and_then(|m| m.get("resourceVersion"))
            .and_then(Value::as_str)
    }
}

/// Answers whether a visited resource needs migration
pub trait Reporter: Send {
    fn changed(&self) -> bool;

    /// What the migration changed, for verbose logging
    fn detail(&self) -> Option<&str> {
        None
    }
}

impl Reporter for bool {
    fn changed(&self) -> bool {
        *self
    }
}

/// Reporter that also carries a human-readable description of the change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub changed: bool,
    pub detail: String,
}

impl Reporter for ChangeReport {
    fn changed(&self) -> bool {
        self.changed
    }

    fn detail(&self) -> Option<&str> {
        Some(&self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_object() {
        let info = ResourceInfo::from_object(json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod", "resourceVersion": "7"}
        }))
        .unwrap();
        assert_eq!(info.kind(), "Deployment");
        assert_eq!(info.namespace(), Some("prod"));
        assert_eq!(info.resource_version(), Some("7"));
        assert_eq!(info.key.range_key(), "prod/web");
        assert_eq!(info.key.to_string(), "-n prod deployment/web");
    }

    #[test]
    fn test_cluster_scoped_key() {
        let key = ResourceKey::new("Node", Some(""), "worker-1");
        assert_eq!(key.namespace, None);
        assert_eq!(key.range_key(), "worker-1");
        assert_eq!(key.to_string(), "node/worker-1");
    }

    #[test]
    fn test_from_object_requires_name() {
        assert!(ResourceInfo::from_object(json!({"kind": "Pod", "metadata": {}})).is_none());
    }
}
