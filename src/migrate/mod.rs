//! Parallel resource migration engine
//!
//! # Architecture
//!
//! ```text
//!   Enumerator ──► Work Queue (bounded) ──► Worker 1..N ──► Result Queue ──► Tracker
//!                                           filter                          counters
//!                                           visit                           report lines
//!                                           action + retry                  summary
//! ```
//!
//! Workers apply filter, visit and action to each resource, retrying
//! retriable action failures on the same worker. Every work item yields
//! exactly one counted result event; retry notices are uncounted. The
//! tracker is the only owner of the counters.

pub mod api_version;
pub mod queue;
pub mod tracker;
pub mod visitor;
pub mod worker;

pub use api_version::ApiVersionMigration;
pub use queue::{MigrationOutcome, ResultEvent, WorkItem, WorkQueue};
pub use tracker::{Tracker, TrackerSummary};
pub use visitor::ResourceVisitor;

use crate::config::OutputFormat;
use crate::error::ActionError;
use crate::output::SharedWriter;
use crate::resource::{ResourceInfo, Reporter};
use crate::store::ObjectStore;
use std::sync::Arc;
use tracing::trace;

/// Inspect a resource and report whether it needs migration
///
/// `Ok(None)` means the resource is ignored. The callback may rewrite the
/// object in place.
pub type VisitFn =
    Arc<dyn Fn(&mut ResourceInfo) -> Result<Option<Box<dyn Reporter>>, ActionError> + Send + Sync>;

/// Persist (or print) a migrated resource
pub type ActionFn =
    Arc<dyn Fn(&mut ResourceInfo, &dyn Reporter) -> Result<(), ActionError> + Send + Sync>;

/// Decide whether a resource is visited at all
pub type FilterFn = Arc<dyn Fn(&ResourceInfo) -> Result<bool, ActionError> + Send + Sync>;

/// A migration for some set of resource kinds
pub trait Migration: Send + Sync {
    /// Inspect and transform one resource
    fn visit(&self, info: &mut ResourceInfo) -> Result<Option<Box<dyn Reporter>>, ActionError>;
}

/// Adapt a migration into a visit callback
pub fn visit_fn<M: Migration + 'static>(migration: Arc<M>) -> VisitFn {
    Arc::new(move |info: &mut ResourceInfo| migration.visit(info))
}

/// Combine filters; a resource must pass all of them
pub fn all_filters(filters: Vec<FilterFn>) -> Option<FilterFn> {
    match filters.len() {
        0 => None,
        1 => filters.into_iter().next(),
        _ => {
            let combined: FilterFn = Arc::new(move |info: &ResourceInfo| -> Result<bool, ActionError> {
                for filter in &filters {
                    if !filter(info)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            });
            Some(combined)
        }
    }
}

/// Action that writes the migrated object to a store
///
/// On a retriable failure (conflict or temporary outage) the local copy is
/// refreshed from the store before the error is returned, so the retried
/// visit starts from persisted state rather than its own unsaved edit. If the
/// refresh fails too, the failure is final: retrying on the edited copy would
/// see no change and report success without a write.
pub fn save_to_store(store: Arc<dyn ObjectStore>) -> ActionFn {
    Arc::new(move |info: &mut ResourceInfo, _reporter: &dyn Reporter| -> Result<(), ActionError> {
        match store.update(info) {
            Ok(updated) => {
                *info = updated;
                Ok(())
            }
            Err(err) => {
                let err = ActionError::from(err);
                if !err.is_retriable() {
                    return Err(err);
                }
                trace!(resource = %info.key, error = %err, "Refreshing before retry");
                match store.get(&info.key) {
                    Ok(current) => {
                        *info = current;
                        Err(err)
                    }
                    Err(refresh) => Err(ActionError::not_retriable(format!(
                        "{}; refresh before retry failed: {}",
                        err, refresh
                    ))),
                }
            }
        }
    })
}

/// Action that prints the migrated object instead of saving it
pub fn print_to(out: SharedWriter, format: OutputFormat) -> ActionFn {
    Arc::new(move |info: &mut ResourceInfo, _reporter: &dyn Reporter| -> Result<(), ActionError> {
        let text = match format {
            OutputFormat::Json => serde_json::to_string_pretty(&info.object)?,
            OutputFormat::Name => format!("{}/{}", info.kind().to_lowercase(), info.name()),
        };
        out.write_line(&text).map_err(ActionError::failed)
    })
}
