//! resource-migrator - Parallel Bulk Resource Migration
//!
//! Applies a migration to every resource a source enumerates, fanning the
//! work out over a bounded pool of worker threads and reporting per-resource
//! outcomes plus a final summary.
//!
//! # Features
//!
//! - **Bounded Parallelism**: A fixed pool of workers pulls from a bounded
//!   queue, so enumeration blocks instead of buffering without limit.
//!
//! - **Retry on the Same Worker**: Conflicts and temporary failures are
//!   retried in place, up to a configurable limit (10 by default).
//!
//! - **Serial Tracking**: A single tracker owns all counters; workers only
//!   send events.
//!
//! - **Dry Run by Default**: Nothing is persisted without `--confirm`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  Enumerator (files / store)  │
//! └──────────────┬───────────────┘
//!                │ WorkItem
//!                ▼
//! ┌──────────────────────────────┐
//! │   Work Queue (crossbeam)     │
//! │   - Backpressure support     │
//! └──────────────┬───────────────┘
//!                │
//!   ┌────────────┼────────────┐
//!   ▼            ▼            ▼
//! ┌────────┐ ┌────────┐  ┌────────┐
//! │Worker 1│ │Worker 2│..│Worker N│   filter -> visit -> action (+ retry)
//! └───┬────┘ └───┬────┘  └───┬────┘
//!     └──────────┼───────────┘
//!                │ ResultEvent
//!                ▼
//! ┌──────────────────────────────┐
//! │  Tracker                     │
//! │  - counters, report lines    │
//! │  - summary + rerun hint      │
//! └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Preview which Deployments would move to apps/v1
//! resource-migrator -f deployments.json api-version --kind Deployment \
//!     --from extensions/v1beta1 --to apps/v1
//!
//! # Apply, 8 workers, across all namespaces
//! resource-migrator -A --parallel 8 --confirm -f cluster.json \
//!     api-version --kind Deployment --from extensions/v1beta1 --to apps/v1
//! ```

pub mod config;
pub mod enumerate;
pub mod error;
pub mod error_sink;
pub mod migrate;
pub mod output;
pub mod progress;
pub mod resource;
pub mod store;

pub use config::{CliArgs, MigrateConfig, OutputFormat};
pub use enumerate::{Enumerator, Selector, StaticEnumerator, StoreEnumerator};
pub use error::{ActionError, MigrateError, Result};
pub use migrate::{ResourceVisitor, TrackerSummary};
pub use resource::{ChangeReport, Origin, Reporter, ResourceInfo, ResourceKey};
pub use store::{MemoryStore, ObjectStore};
