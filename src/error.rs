//! Error types for resource-migrator
//!
//! This module defines the error hierarchy that covers:
//! - Per-resource action errors and their retry classification
//! - Enumeration errors (single resource vs. aborted listing)
//! - Object store errors
//! - Configuration and worker errors
//!
//! Per-resource errors never leave a worker through the return path. They are
//! turned into result events and counted by the tracker. Only an aborted
//! enumeration or a non-zero error count surfaces as a top-level error.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error used by callbacks that wrap arbitrary causes
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Top-level error type for resource-migrator
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Object store errors outside of a migration attempt
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors (file operations, output writers)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The resource listing itself failed; the run drained and stopped
    #[error("Enumeration aborted: {0}")]
    EnumerationAborted(#[source] EnumerationError),

    /// The run finished but some resources could not be migrated
    #[error("{failed} resources failed to migrate")]
    ResourcesFailed { failed: u64 },
}

impl MigrateError {
    /// True when the run completed its drain but must exit non-zero.
    ///
    /// Details have already been written to the output stream by the
    /// tracker, so callers only need to signal failure.
    pub fn is_exit_without_success(&self) -> bool {
        matches!(
            self,
            MigrateError::EnumerationAborted(_) | MigrateError::ResourcesFailed { .. }
        )
    }
}

/// Error returned by a visit or action callback for one resource
#[derive(Error, Debug)]
pub enum ActionError {
    /// The object turned out not to need migration
    #[error("object does not need migration")]
    Unchanged,

    /// The object changed underneath us; visit and act again
    #[error("object changed during migration and must be recalculated")]
    Recalculate,

    /// Transient failure, eligible for another attempt
    #[error("{0}")]
    Retriable(BoxError),

    /// Permanent failure, never retried
    #[error("{0}")]
    NotRetriable(BoxError),

    /// Untyped failure; retried only if its cause chain is temporary
    #[error("{0}")]
    Failed(BoxError),
}

impl ActionError {
    /// Wrap a cause as retriable
    pub fn retriable(err: impl Into<BoxError>) -> Self {
        ActionError::Retriable(err.into())
    }

    /// Wrap a cause as permanently failed
    pub fn not_retriable(err: impl Into<BoxError>) -> Self {
        ActionError::NotRetriable(err.into())
    }

    /// Wrap an unclassified cause
    pub fn failed(err: impl Into<BoxError>) -> Self {
        ActionError::Failed(err.into())
    }

    /// Whether another visit + action attempt may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            ActionError::Recalculate | ActionError::Retriable(_) => true,
            ActionError::Unchanged | ActionError::NotRetriable(_) => false,
            ActionError::Failed(cause) => is_temporary(cause.as_ref()),
        }
    }

    /// The wrapped cause, if any
    pub fn cause(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ActionError::Retriable(e) | ActionError::NotRetriable(e) | ActionError::Failed(e) => {
                Some(e.as_ref() as &(dyn StdError + 'static))
            }
            ActionError::Unchanged | ActionError::Recalculate => None,
        }
    }
}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => ActionError::Recalculate,
            StoreError::NotFound { .. } => ActionError::not_retriable(err),
            _ => ActionError::failed(err),
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        ActionError::not_retriable(err)
    }
}

/// Walk an error's source chain looking for a temporary condition
pub fn is_temporary(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(store) = e.downcast_ref::<StoreError>() {
            return store.is_temporary();
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            );
        }
        current = e.source();
    }
    false
}

/// Why a single resource ended in the Error outcome
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The enumerator could not produce this resource
    #[error("{0}")]
    Enumeration(EnumerationError),

    /// The filter could not decide
    #[error("filter failed: {0}")]
    Filter(ActionError),

    /// The visit callback failed
    #[error("{0}")]
    Visit(ActionError),

    /// The action failed, possibly after retries
    #[error("{0}")]
    Action(ActionError),

    /// A callback panicked
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Errors produced while enumerating resources
#[derive(Error, Debug, Clone)]
pub enum EnumerationError {
    /// An input could not be read
    #[error("unable to read '{path}': {reason}")]
    Read { path: PathBuf, reason: String },

    /// A single object could not be decoded
    #[error("unable to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    /// The listing backend failed
    #[error("resource listing failed: {0}")]
    Backend(String),
}

/// Errors from the object store that migrations persist into
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No object under this key
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    /// Optimistic concurrency check failed
    #[error("conflict updating {kind} '{key}': resourceVersion {expected} is stale (current {current})")]
    Conflict {
        kind: String,
        key: String,
        expected: String,
        current: String,
    },

    /// Store cannot be reached right now
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Request did not complete in time
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Object is malformed
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Check if the failure is transient
    pub fn is_temporary(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid parallel worker count {count}: must be between 1 and {max}")]
    InvalidParallel { count: usize, max: usize },

    /// Invalid queue size
    #[error("Invalid queue size {size}: must be at least {min}")]
    InvalidQueueSize { size: usize, min: usize },

    /// Nothing to migrate
    #[error("No input: provide at least one --filename")]
    NoInput,

    /// Empty include list
    #[error("No resource kinds selected by --include")]
    EmptyInclude,

    /// from/to keys out of order
    #[error("Invalid key range: --from-key '{from}' must sort before --to-key '{to}'")]
    InvalidKeyRange { from: String, to: String },

    /// Unknown -o value
    #[error("Invalid output format '{0}': expected 'json' or 'name'")]
    InvalidOutputFormat(String),

    /// Malformed migration arguments
    #[error("Invalid migration arguments: {0}")]
    InvalidMigration(String),
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Tracker thread panicked
    #[error("Tracker panicked: {0}")]
    TrackerPanicked(String),

    /// Thread could not be started
    #[error("Failed to start {name}: {reason}")]
    SpawnFailed { name: String, reason: String },

    /// Work queue closed while items were still being produced
    #[error("Work queue closed unexpectedly")]
    QueueClosed,
}

/// Result type alias for MigrateError
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_retriable() {
        assert!(ActionError::Recalculate.is_retriable());
        assert!(ActionError::retriable("flaky").is_retriable());
        assert!(!ActionError::not_retriable("denied").is_retriable());
        assert!(!ActionError::Unchanged.is_retriable());
        assert!(!ActionError::failed("boom").is_retriable());
    }

    #[test]
    fn test_untyped_error_temporary_detection() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded");
        assert!(ActionError::failed(timeout).is_retriable());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "forbidden");
        assert!(!ActionError::failed(denied).is_retriable());

        let unavailable = StoreError::Unavailable("etcd leader lost".into());
        assert!(ActionError::failed(unavailable).is_retriable());
    }

    #[test]
    fn test_store_error_conversion() {
        let conflict = StoreError::Conflict {
            kind: "ConfigMap".into(),
            key: "default/a".into(),
            expected: "1".into(),
            current: "2".into(),
        };
        assert!(matches!(ActionError::from(conflict), ActionError::Recalculate));

        let missing = StoreError::NotFound {
            kind: "ConfigMap".into(),
            key: "default/a".into(),
        };
        assert!(!ActionError::from(missing).is_retriable());

        let timeout = StoreError::Timeout("PUT".into());
        assert!(ActionError::from(timeout).is_retriable());
    }

    #[test]
    fn test_exit_without_success() {
        assert!(MigrateError::ResourcesFailed { failed: 3 }.is_exit_without_success());
        let aborted = MigrateError::EnumerationAborted(EnumerationError::Backend("refused".into()));
        assert!(aborted.is_exit_without_success());
        assert!(!MigrateError::Config(ConfigError::NoInput).is_exit_without_success());
        assert_eq!(
            MigrateError::ResourcesFailed { failed: 3 }.to_string(),
            "3 resources failed to migrate"
        );
    }
}
