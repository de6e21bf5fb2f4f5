//! Migration orchestrator
//!
//! The visitor is responsible for:
//! - Setting up the work and result queues
//! - Starting the worker pool and the tracker
//! - Feeding enumerated resources into the work queue
//! - Draining workers and tracker, in that order
//! - Writing the summary and deciding the run's final status

use crate::config::{MigrateConfig, OutputFormat};
use crate::enumerate::Enumerator;
use crate::error::{EnumerationError, MigrateError, Result, WorkerError};
use crate::error_sink::ErrorSink;
use crate::migrate::queue::{result_queue, WorkItem, WorkQueue};
use crate::migrate::tracker::{Tracker, TrackerSummary};
use crate::migrate::worker::{aggregate_stats, Worker, WorkerContext};
use crate::migrate::{print_to, ActionFn, FilterFn, VisitFn};
use crate::output::SharedWriter;
use crate::progress::ProgressReporter;
use crate::resource::ResourceInfo;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs a migration over every enumerated resource
pub struct ResourceVisitor {
    /// Report and summary lines
    out: SharedWriter,

    /// Persists migrated objects when confirmed
    save_fn: Option<ActionFn>,

    /// Prints migrated objects; takes precedence over saving
    print_fn: Option<ActionFn>,

    filter_fn: Option<FilterFn>,

    dry_run: bool,

    /// Number of workers, at least 1
    parallel: usize,

    retries: u32,

    queue_size: usize,

    verbosity: u8,

    error_sink: Option<Arc<ErrorSink>>,

    progress: Option<ProgressReporter>,
}

impl ResourceVisitor {
    /// Create a visitor from validated configuration
    ///
    /// Fails if the configuration does not validate (e.g. zero workers).
    pub fn new(config: &MigrateConfig, out: SharedWriter) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            out,
            save_fn: None,
            print_fn: None,
            filter_fn: config.key_range_filter(),
            dry_run: config.dry_run,
            parallel: config.parallel,
            retries: config.retries,
            queue_size: config.queue_size,
            verbosity: config.verbosity,
            error_sink: None,
            progress: None,
        })
    }

    /// Action used to persist changes when not a dry run
    pub fn with_save(mut self, save: ActionFn) -> Self {
        self.save_fn = Some(save);
        self
    }

    /// Print-only mode; overrides saving and forces a dry run
    pub fn with_print(mut self, print: ActionFn) -> Self {
        self.print_fn = Some(print);
        self
    }

    /// Print migrated objects to `out` in the given format
    pub fn with_output(self, out: SharedWriter, format: OutputFormat) -> Self {
        self.with_print(print_to(out, format))
    }

    /// Additional filter, applied after any key-range filter
    pub fn with_filter(mut self, filter: FilterFn) -> Self {
        self.filter_fn = match self.filter_fn.take() {
            Some(existing) => crate::migrate::all_filters(vec![existing, filter]),
            None => Some(filter),
        };
        self
    }

    pub fn with_error_sink(mut self, sink: Arc<ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Whether this run persists nothing
    pub fn is_dry_run(&self) -> bool {
        self.dry_run || self.print_fn.is_some()
    }

    /// Visit every resource the enumerator yields
    ///
    /// Returns the run summary when every resource succeeded or was skipped.
    /// An aborted enumeration or any failed resource is reported as an error
    /// after the pipeline has fully drained and the summary was written.
    pub fn run(mut self, enumerator: &mut dyn Enumerator, visit: VisitFn) -> Result<TrackerSummary> {
        let start = Instant::now();
        let dry_run = self.is_dry_run();
        let action = match self.print_fn.take() {
            Some(print) => Some(print),
            None if dry_run => None,
            None => self.save_fn.take(),
        };

        info!(
            workers = self.parallel,
            dry_run,
            retries = self.retries,
            "Starting migration"
        );

        let queue = WorkQueue::new(self.queue_size);
        let queue_stats = queue.stats();
        let (work_tx, work_rx) = queue.split();
        let (results_tx, results_rx) = result_queue(self.queue_size);

        let mut tracker = Tracker::new(self.out.clone(), dry_run, self.verbosity);
        if let Some(sink) = self.error_sink.take() {
            tracker = tracker.with_error_sink(sink);
        }
        if let Some(progress) = self.progress.take() {
            tracker = tracker.with_progress(progress);
        }
        let tracker_handle = tracker.spawn(results_rx)?;

        let ctx = Arc::new(WorkerContext {
            visit,
            action,
            filter: self.filter_fn.take(),
            retries: self.retries,
        });

        let mut workers = Vec::with_capacity(self.parallel);
        for id in 0..self.parallel {
            match Worker::spawn(id, Arc::clone(&ctx), work_rx.clone(), results_tx.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    // Unwind what already started before reporting
                    drop(work_tx);
                    drop(results_tx);
                    join_workers(workers);
                    abandon_tracker(tracker_handle);
                    return Err(e.into());
                }
            }
        }
        drop(work_rx);
        debug!(count = workers.len(), "Workers spawned");

        // Feed the pool; blocks whenever the work queue is full
        let mut undelivered = 0u64;
        let enumerated = enumerator.visit(&mut |info: ResourceInfo, error: Option<EnumerationError>| {
            if work_tx.send(WorkItem { info, error }).is_err() {
                undelivered += 1;
            }
        });
        drop(work_tx);

        if let Err(err) = &enumerated {
            warn!(error = %err, "Enumeration aborted, draining queued work");
        }

        let worker_failure = join_workers_with_stats(workers);
        drop(results_tx);

        let summary = tracker_handle
            .join()
            .map_err(|_| WorkerError::TrackerPanicked("tracker thread panicked".into()))?;

        self.write_line(&summary.summary_line());
        if let Some(hint) = summary.hint_line() {
            self.write_line(&hint);
        }
        if let Some(inputs) = summary.inputs_line() {
            self.write_line(&inputs);
        }

        info!(
            found = summary.found,
            errors = summary.errors,
            migrated = summary.migrated(),
            enqueued = queue_stats.enqueued(),
            dequeued = queue_stats.dequeued(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Migration finished"
        );

        finish(summary, enumerated, worker_failure, undelivered)
    }

    fn write_line(&self, line: &str) {
        if let Err(e) = self.out.write_line(line) {
            warn!(error = %e, "Failed to write summary");
        }
    }
}

/// Decide the run's final status
fn finish(
    summary: TrackerSummary,
    enumerated: std::result::Result<(), EnumerationError>,
    worker_failure: Option<WorkerError>,
    undelivered: u64,
) -> Result<TrackerSummary> {
    if let Err(err) = enumerated {
        return Err(MigrateError::EnumerationAborted(err));
    }
    if let Some(err) = worker_failure {
        return Err(err.into());
    }
    if undelivered > 0 {
        warn!(undelivered, "Resources could not be handed to a worker");
        return Err(WorkerError::QueueClosed.into());
    }
    if summary.errors > 0 {
        return Err(MigrateError::ResourcesFailed {
            failed: summary.errors,
        });
    }
    Ok(summary)
}

/// Join workers, logging their stats; returns the first failure
fn join_workers_with_stats(workers: Vec<Worker>) -> Option<WorkerError> {
    let (processed, retries) = aggregate_stats(&workers);
    debug!(processed, retries, "Joining workers");
    join_workers(workers)
}

/// Join the tracker on an early exit, where its summary is not needed
///
/// Returns false if the tracker panicked; the panic is logged, not raised.
fn abandon_tracker(handle: JoinHandle<TrackerSummary>) -> bool {
    match handle.join() {
        Ok(summary) => {
            debug!(found = summary.found, "Tracker stopped early");
            true
        }
        Err(_) => {
            warn!("Tracker panicked while shutting down after a failed spawn");
            false
        }
    }
}

fn join_workers(workers: Vec<Worker>) -> Option<WorkerError> {
    let mut first = None;
    for worker in workers {
        let id = worker.id();
        if let Err(e) = worker.join() {
            warn!(worker = id, error = %e, "Worker failed to join cleanly");
            first.get_or_insert(e);
        }
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::StaticEnumerator;
    use crate::error::{ActionError, ConfigError};
    use crate::output::SharedBuffer;
    use crate::resource::{ResourceKey, Reporter};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resources(n: usize) -> Vec<ResourceInfo> {
        (0..n)
            .map(|i| ResourceInfo::new(ResourceKey::new("ConfigMap", Some("ns"), format!("cm-{:04}", i)), Value::Null))
            .collect()
    }

    fn always(changed: bool) -> VisitFn {
        Arc::new(move |_: &mut ResourceInfo| Ok(Some(Box::new(changed) as Box<dyn Reporter>)))
    }

    fn confirmed(parallel: usize) -> MigrateConfig {
        MigrateConfig {
            dry_run: false,
            parallel,
            ..MigrateConfig::default()
        }
    }

    #[test]
    fn test_zero_parallel_rejected() {
        let config = MigrateConfig {
            parallel: 0,
            ..MigrateConfig::default()
        };
        let err = ResourceVisitor::new(&config, SharedWriter::new(SharedBuffer::new())).err().unwrap();
        assert!(matches!(err, MigrateError::Config(ConfigError::InvalidParallel { .. })));
    }

    #[test]
    fn test_all_migrated() {
        let buffer = SharedBuffer::new();
        let saves = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&saves);
        let save: ActionFn = Arc::new(move |_: &mut ResourceInfo, _: &dyn Reporter| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let visitor = ResourceVisitor::new(&confirmed(1), SharedWriter::new(buffer.clone()))
            .unwrap()
            .with_save(save);
        let summary = visitor
            .run(&mut StaticEnumerator::new(resources(10)), always(true))
            .unwrap();

        assert_eq!(summary.migrated(), 10);
        assert_eq!(saves.load(Ordering::SeqCst), 10);
        assert_eq!(
            buffer.lines().last().unwrap(),
            "summary: total=10 errors=0 ignored=0 unchanged=0 migrated=10"
        );
    }

    #[test]
    fn test_unchanged_never_saved() {
        // Same result on a second pass over the same resources
        for _ in 0..2 {
            let buffer = SharedBuffer::new();
            let save: ActionFn =
                Arc::new(|_: &mut ResourceInfo, _: &dyn Reporter| -> std::result::Result<(), ActionError> { panic!("unchanged must not save") });

            let summary = ResourceVisitor::new(&confirmed(3), SharedWriter::new(buffer.clone()))
                .unwrap()
                .with_save(save)
                .run(&mut StaticEnumerator::new(resources(5)), always(false))
                .unwrap();

            assert_eq!(summary.unchanged, 5);
            assert_eq!(summary.migrated(), 0);
            assert_eq!(
                buffer.lines().last().unwrap(),
                "summary: total=5 errors=0 ignored=0 unchanged=5 migrated=0"
            );
        }
    }

    #[test]
    fn test_dry_run_skips_save() {
        let buffer = SharedBuffer::new();
        let save: ActionFn = Arc::new(|_: &mut ResourceInfo, _: &dyn Reporter| -> std::result::Result<(), ActionError> { panic!("dry run must not save") });
        let visitor = ResourceVisitor::new(&MigrateConfig::default(), SharedWriter::new(buffer.clone()))
            .unwrap()
            .with_save(save);

        let summary = visitor
            .run(&mut StaticEnumerator::new(resources(3)), always(true))
            .unwrap();
        assert_eq!(summary.migrated(), 3);
        assert!(buffer.contents().contains("summary (dry run): total=3"));
    }

    #[test]
    fn test_print_mode_overrides_confirm() {
        let report = SharedBuffer::new();
        let printed = SharedBuffer::new();
        let save: ActionFn = Arc::new(|_: &mut ResourceInfo, _: &dyn Reporter| -> std::result::Result<(), ActionError> { panic!("print mode must not save") });

        let visitor = ResourceVisitor::new(&confirmed(2), SharedWriter::new(report.clone()))
            .unwrap()
            .with_save(save)
            .with_output(SharedWriter::new(printed.clone()), OutputFormat::Name);
        assert!(visitor.is_dry_run());

        let summary = visitor
            .run(&mut StaticEnumerator::new(resources(4)), always(true))
            .unwrap();
        assert_eq!(summary.migrated(), 4);
        assert_eq!(printed.lines().len(), 4);
        assert!(report.contents().contains("summary (dry run):"));
    }

    #[test]
    fn test_enumeration_abort_drains_then_fails() {
        let buffer = SharedBuffer::new();
        let mut enumerator = StaticEnumerator::new(resources(5))
            .abort_with(EnumerationError::Backend("apiserver unreachable".into()));

        let err = ResourceVisitor::new(&confirmed(2), SharedWriter::new(buffer.clone()))
            .unwrap()
            .run(&mut enumerator, always(true))
            .unwrap_err();

        assert!(matches!(err, MigrateError::EnumerationAborted(_)));
        assert!(err.is_exit_without_success());
        // Queued work still completed and was summarized
        assert!(buffer.contents().contains("total=5 errors=0"));
    }

    #[test]
    fn test_failed_resource_names_kind() {
        let buffer = SharedBuffer::new();
        let save: ActionFn = Arc::new(|info: &mut ResourceInfo, _: &dyn Reporter| {
            if info.name() == "cm-0001" {
                Err(ActionError::not_retriable("admission denied"))
            } else {
                Ok(())
            }
        });

        let err = ResourceVisitor::new(&confirmed(1), SharedWriter::new(buffer.clone()))
            .unwrap()
            .with_save(save)
            .run(&mut StaticEnumerator::new(resources(3)), always(true))
            .unwrap_err();

        assert!(matches!(err, MigrateError::ResourcesFailed { failed: 1 }));
        let lines = buffer.lines();
        assert!(lines.iter().any(|l| l.ends_with("-n ns configmap/cm-0001: admission denied")));
        assert!(lines.contains(&"summary: total=3 errors=1 ignored=0 unchanged=0 migrated=2".to_string()));
        assert_eq!(
            lines.last().unwrap(),
            "info: to rerun only failing resources, add --include=configmap"
        );
    }

    #[test]
    fn test_key_range_filter_ignores() {
        let buffer = SharedBuffer::new();
        let config = MigrateConfig {
            from_key: Some("ns/cm-0002".into()),
            ..MigrateConfig::default()
        };
        let summary = ResourceVisitor::new(&config, SharedWriter::new(buffer))
            .unwrap()
            .run(&mut StaticEnumerator::new(resources(5)), always(true))
            .unwrap();
        assert_eq!(summary.ignored, 2);
        assert_eq!(summary.migrated(), 3);
    }

    #[test]
    fn test_abandon_tracker_reports_panic() {
        let clean = std::thread::spawn(TrackerSummary::default);
        assert!(abandon_tracker(clean));

        let panicked = std::thread::spawn(|| -> TrackerSummary { panic!("tracker bug") });
        assert!(!abandon_tracker(panicked));
    }
}
