//! apiVersion rewrite migration
//!
//! Moves every object of one kind from a deprecated `apiVersion` to its
//! replacement. Objects already on the target version are unchanged; objects
//! on some third version are left alone.

use crate::error::{ActionError, ConfigError};
use crate::migrate::Migration;
use crate::resource::{ChangeReport, Reporter, ResourceInfo};
use serde_json::Value;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiVersionMigration {
    kind: String,
    from: String,
    to: String,
}

impl ApiVersionMigration {
    pub fn new(kind: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Result<Self, ConfigError> {
        let (kind, from, to) = (kind.into(), from.into(), to.into());
        if kind.is_empty() || from.is_empty() || to.is_empty() {
            return Err(ConfigError::InvalidMigration(
                "kind, from and to must be non-empty".into(),
            ));
        }
        if from == to {
            return Err(ConfigError::InvalidMigration(format!(
                "source and target apiVersion are both {}",
                from
            )));
        }
        Ok(Self { kind, from, to })
    }

    /// Short description for headers and logs
    pub fn describe(&self) -> String {
        format!("{} {} -> {}", self.kind, self.from, self.to)
    }
}

impl Migration for ApiVersionMigration {
    fn visit(&self, info: &mut ResourceInfo) -> Result<Option<Box<dyn Reporter>>, ActionError> {
        if !info.kind().eq_ignore_ascii_case(&self.kind) {
            return Ok(None);
        }

        let current = match info.object.get("apiVersion").and_then(Value::as_str) {
            Some(v) => v.to_string(),
            None => return Err(ActionError::not_retriable("object has no apiVersion")),
        };

        if current == self.to {
            return Ok(Some(Box::new(false)));
        }
        if current != self.from {
            trace!(resource = %info.key, api_version = %current, "Unrelated apiVersion");
            return Ok(None);
        }

        match info.object.as_object_mut() {
            Some(map) => {
                map.insert("apiVersion".into(), Value::String(self.to.clone()));
            }
            None => return Err(ActionError::not_retriable("object is not a JSON map")),
        }

        Ok(Some(Box::new(ChangeReport {
            changed: true,
            detail: format!("apiVersion {} -> {}", self.from, self.to),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn migration() -> ApiVersionMigration {
        ApiVersionMigration::new("Deployment", "extensions/v1beta1", "apps/v1").unwrap()
    }

    fn object(kind: &str, api_version: Option<&str>) -> ResourceInfo {
        let mut obj = json!({"kind": kind, "metadata": {"name": "web", "namespace": "prod"}});
        if let Some(v) = api_version {
            obj["apiVersion"] = json!(v);
        }
        ResourceInfo::from_object(obj).unwrap()
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(ApiVersionMigration::new("", "a/v1", "b/v1").is_err());
        assert!(ApiVersionMigration::new("Pod", "v1", "v1").is_err());
    }

    #[test]
    fn test_rewrites_source_version() {
        let mut info = object("Deployment", Some("extensions/v1beta1"));
        let report = migration().visit(&mut info).unwrap().unwrap();
        assert!(report.changed());
        assert_eq!(report.detail(), Some("apiVersion extensions/v1beta1 -> apps/v1"));
        assert_eq!(info.object["apiVersion"], "apps/v1");
    }

    #[test]
    fn test_already_migrated_is_unchanged() {
        let mut info = object("Deployment", Some("apps/v1"));
        let report = migration().visit(&mut info).unwrap().unwrap();
        assert!(!report.changed());
    }

    #[test]
    fn test_other_kind_and_version_ignored() {
        let mut other_kind = object("Service", Some("extensions/v1beta1"));
        assert!(migration().visit(&mut other_kind).unwrap().is_none());

        let mut other_version = object("deployment", Some("apps/v1beta2"));
        assert!(migration().visit(&mut other_version).unwrap().is_none());
        assert_eq!(other_version.object["apiVersion"], "apps/v1beta2");
    }

    #[test]
    fn test_missing_api_version_fails() {
        let mut info = object("Deployment", None);
        let err = migration().visit(&mut info).err().unwrap();
        assert!(!err.is_retriable());
    }
}
