//! Result tracker
//!
//! The tracker is the single consumer of result events. It owns the run
//! counters outright, so no locking is needed: the result channel serializes
//! every update. It runs until the channel closes, which is the orchestrator's
//! signal that all workers are done.

use crate::error::{EnumerationError, ResourceError, WorkerError};
use crate::error_sink::ErrorSink;
use crate::migrate::queue::{MigrationOutcome, ResultEvent};
use crate::output::{report_line, summary_line, SharedWriter};
use crate::progress::{MigrateProgress, ProgressReporter};
use crossbeam_channel::Receiver;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::debug;

/// Final counters of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerSummary {
    pub found: u64,
    pub errors: u64,
    pub ignored: u64,
    pub unchanged: u64,
    pub retries: u64,

    /// Lowercased kinds with at least one error, sorted
    pub error_kinds: Vec<String>,

    /// Inputs that could not be read or decoded, sorted
    pub unreadable: Vec<String>,

    pub dry_run: bool,
}

impl TrackerSummary {
    /// Resources that ended in Success
    pub fn migrated(&self) -> u64 {
        self.found
            .saturating_sub(self.errors)
            .saturating_sub(self.unchanged)
            .saturating_sub(self.ignored)
    }

    pub fn summary_line(&self) -> String {
        summary_line(
            self.found,
            self.errors,
            self.ignored,
            self.unchanged,
            self.migrated(),
            self.dry_run,
        )
    }

    /// Hint for re-running only the failing kinds, if any failed
    pub fn hint_line(&self) -> Option<String> {
        if self.error_kinds.is_empty() {
            return None;
        }
        Some(format!(
            "info: to rerun only failing resources, add --include={}",
            self.error_kinds.join(",")
        ))
    }

    /// Names the inputs that never became resources, if any
    pub fn inputs_line(&self) -> Option<String> {
        if self.unreadable.is_empty() {
            return None;
        }
        Some(format!(
            "info: could not load {}; fix them before rerunning",
            self.unreadable.join(", ")
        ))
    }
}

/// Serial aggregator of result events
pub struct Tracker {
    out: SharedWriter,
    dry_run: bool,
    verbosity: u8,
    error_sink: Option<Arc<ErrorSink>>,
    progress: Option<ProgressReporter>,
    started: Instant,

    found: u64,
    ignored: u64,
    unchanged: u64,
    errors: u64,
    retries: u64,
    error_kinds: BTreeSet<String>,
    unreadable: BTreeSet<String>,
}

impl Tracker {
    pub fn new(out: SharedWriter, dry_run: bool, verbosity: u8) -> Self {
        Self {
            out,
            dry_run,
            verbosity,
            error_sink: None,
            progress: None,
            started: Instant::now(),
            found: 0,
            ignored: 0,
            unchanged: 0,
            errors: 0,
            retries: 0,
            error_kinds: BTreeSet::new(),
            unreadable: BTreeSet::new(),
        }
    }

    /// Forward error lines to the log through a de-duplicating sink
    pub fn with_error_sink(mut self, sink: Arc<ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Spawn the tracker on its own thread
    pub fn spawn(self, results: Receiver<ResultEvent>) -> Result<JoinHandle<TrackerSummary>, WorkerError> {
        thread::Builder::new()
            .name("migrate-tracker".into())
            .spawn(move || self.run(results))
            .map_err(|e| WorkerError::SpawnFailed {
                name: "tracker".into(),
                reason: e.to_string(),
            })
    }

    /// Consume events until the channel closes
    pub fn run(mut self, results: Receiver<ResultEvent>) -> TrackerSummary {
        for event in results.iter() {
            self.record(event);
        }
        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }
        debug!(found = self.found, errors = self.errors, "Tracker drained");
        self.summary()
    }

    /// Apply one event to the counters and emit its report line
    pub fn record(&mut self, event: ResultEvent) {
        if event.retry {
            self.retries += 1;
            self.report("retry:", &event);
            self.update_progress();
            return;
        }

        if !event.counted {
            debug!(resource = %event.key, outcome = ?event.outcome, "Ignoring uncounted event");
            return;
        }
        self.found += 1;

        match event.outcome {
            MigrationOutcome::Error => {
                self.errors += 1;
                match &event.error {
                    // Placeholder kinds are not resource kinds; --include cannot select them
                    Some(ResourceError::Enumeration(EnumerationError::Read { .. } | EnumerationError::Decode { .. })) => {
                        self.unreadable.insert(event.key.name.clone());
                    }
                    _ => {
                        self.error_kinds.insert(event.key.kind.to_lowercase());
                    }
                }
                self.report("error:", &event);
            }
            MigrationOutcome::Ignore => {
                self.ignored += 1;
                if self.verbosity >= 2 {
                    self.report("ignored:", &event);
                }
            }
            MigrationOutcome::Unchanged => {
                self.unchanged += 1;
                if self.verbosity >= 2 {
                    self.report("unchanged:", &event);
                }
            }
            MigrationOutcome::Success => {
                if self.verbosity >= 1 {
                    let prefix = if self.dry_run { "migrated (dry run):" } else { "migrated:" };
                    self.report(prefix, &event);
                }
            }
        }
        self.update_progress();
    }

    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            found: self.found,
            errors: self.errors,
            ignored: self.ignored,
            unchanged: self.unchanged,
            retries: self.retries,
            error_kinds: self.error_kinds.iter().cloned().collect(),
            unreadable: self.unreadable.iter().cloned().collect(),
            dry_run: self.dry_run,
        }
    }

    fn report(&self, prefix: &str, event: &ResultEvent) {
        let line = match &event.error {
            Some(err) => {
                if let Some(sink) = &self.error_sink {
                    sink.report(&format_args!("{} {}: {}", prefix, event.key, err));
                }
                report_line(prefix, &event.key, Some(err as &dyn Display))
            }
            None => report_line(prefix, &event.key, None),
        };
        if let Err(e) = self.out.write_line(&line) {
            debug!(error = %e, "Failed to write report line");
        }
    }

    fn update_progress(&self) {
        if let Some(progress) = &self.progress {
            progress.update(&MigrateProgress {
                found: self.found,
                errors: self.errors,
                ignored: self.ignored,
                unchanged: self.unchanged,
                retries: self.retries,
                elapsed: self.started.elapsed(),
            });
        }
    }
}
