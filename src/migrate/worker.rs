//! Worker thread logic for parallel migration
//!
//! Each worker:
//! - Pulls work items from the shared work queue until it is closed
//! - Runs filter, visit and action for the item
//! - Retries retriable action failures on its own stack, up to the budget
//! - Sends exactly one counted result event per item to the tracker

use crate::error::{ActionError, ResourceError, WorkerError};
use crate::migrate::queue::{MigrationOutcome, ResultEvent, WorkItem, WorkQueueReceiver};
use crate::migrate::{ActionFn, FilterFn, VisitFn};
use crate::resource::ResourceInfo;
use crossbeam_channel::Sender;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Callbacks and limits shared by every worker
#[derive(Clone)]
pub struct WorkerContext {
    pub visit: VisitFn,

    /// `None` in a pure dry run: changed resources count as migrated
    pub action: Option<ActionFn>,

    pub filter: Option<FilterFn>,

    /// Retry budget per resource
    pub retries: u32,
}

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Items processed
    pub processed: AtomicU64,

    /// Retry attempts made
    pub retries: AtomicU64,

    /// Callback panics caught
    pub panics: AtomicU64,
}

impl WorkerStats {
    fn record_item(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }
}

/// A worker thread that processes work items
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<()>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        ctx: Arc<WorkerContext>,
        work: WorkQueueReceiver,
        results: Sender<ResultEvent>,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("migrate-{}", id))
            .spawn(move || worker_loop(id, ctx, work, results, stats_clone))
            .map_err(|e| WorkerError::SpawnFailed {
                name: format!("worker {}", id),
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| WorkerError::Panicked {
                id: self.id,
                message: "Worker thread panicked".into(),
            }),
            None => Ok(()),
        }
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    ctx: Arc<WorkerContext>,
    work: WorkQueueReceiver,
    results: Sender<ResultEvent>,
    stats: Arc<WorkerStats>,
) {
    debug!(worker = id, "Worker starting");

    while let Some(item) = work.recv() {
        let key = item.info.key.clone();
        let mut emit = |event: ResultEvent| {
            if event.retry {
                stats.record_retry();
            }
            if results.send(event).is_err() {
                warn!(worker = id, "Result queue closed, dropping event");
            }
        };

        // Callback panics become an Error outcome for this item only
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| process(&ctx, item, &mut emit)));
        if let Err(payload) = outcome {
            stats.record_panic();
            let message = panic_message(payload.as_ref());
            warn!(worker = id, resource = %key, message = %message, "Callback panicked");
            emit(ResultEvent::finished(
                key,
                MigrationOutcome::Error,
                Some(ResourceError::Panicked(message)),
            ));
        }
        stats.record_item();
    }

    info!(
        worker = id,
        processed = stats.processed.load(Ordering::Relaxed),
        retries = stats.retries.load(Ordering::Relaxed),
        "Worker shutting down"
    );
}

/// Process one work item, emitting its counted event and any retry notices
pub fn process(ctx: &WorkerContext, item: WorkItem, emit: &mut dyn FnMut(ResultEvent)) {
    let WorkItem { mut info, error } = item;

    if let Some(err) = error {
        emit(ResultEvent::finished(
            info.key,
            MigrationOutcome::Error,
            Some(ResourceError::Enumeration(err)),
        ));
        return;
    }

    if let Some(filter) = &ctx.filter {
        match filter(&info) {
            Ok(true) => {}
            Ok(false) => {
                trace!(resource = %info.key, "Filtered out");
                emit(ResultEvent::finished(info.key, MigrationOutcome::Ignore, None));
                return;
            }
            Err(err) => {
                emit(ResultEvent::finished(
                    info.key,
                    MigrationOutcome::Error,
                    Some(ResourceError::Filter(err)),
                ));
                return;
            }
        }
    }

    let (outcome, error) = attempt(ctx, &mut info, ctx.retries, emit);
    emit(ResultEvent::finished(info.key, outcome, error));
}

/// Result of one visit + action pass
enum Step {
    Done(MigrationOutcome, Option<ResourceError>),
    ActionFailed(ActionError),
}

/// Visit and act, retrying retriable action failures
///
/// Once any retry has happened, a final Unchanged or Ignore is reported as
/// Success: the earlier attempt already changed the resource.
fn attempt(
    ctx: &WorkerContext,
    info: &mut ResourceInfo,
    retries: u32,
    emit: &mut dyn FnMut(ResultEvent),
) -> (MigrationOutcome, Option<ResourceError>) {
    let mut remaining = retries;
    let mut retried = false;

    loop {
        let (outcome, error) = match attempt_once(ctx, info) {
            Step::Done(outcome, error) => (outcome, error),
            Step::ActionFailed(err) if err.is_retriable() && remaining > 0 => {
                debug!(resource = %info.key, remaining, error = %err, "Retrying");
                emit(ResultEvent::retrying(info.key.clone(), ResourceError::Action(err)));
                remaining -= 1;
                retried = true;
                continue;
            }
            Step::ActionFailed(err) => (MigrationOutcome::Error, Some(ResourceError::Action(err))),
        };

        let outcome = match outcome {
            MigrationOutcome::Unchanged | MigrationOutcome::Ignore if retried => MigrationOutcome::Success,
            other => other,
        };
        return (outcome, error);
    }
}

fn attempt_once(ctx: &WorkerContext, info: &mut ResourceInfo) -> Step {
    let reporter = match (ctx.visit)(info) {
        Ok(Some(reporter)) => reporter,
        Ok(None) => return Step::Done(MigrationOutcome::Ignore, None),
        Err(err) => return Step::Done(MigrationOutcome::Error, Some(ResourceError::Visit(err))),
    };

    if !reporter.changed() {
        return Step::Done(MigrationOutcome::Unchanged, None);
    }

    let Some(action) = &ctx.action else {
        return Step::Done(MigrationOutcome::Success, None);
    };

    match action(info, reporter.as_ref()) {
        Ok(()) => {
            if let Some(detail) = reporter.detail() {
                debug!(resource = %info.key, detail, "Migrated");
            }
            Step::Done(MigrationOutcome::Success, None)
        }
        Err(ActionError::Unchanged) => Step::Done(MigrationOutcome::Unchanged, None),
        Err(err) => Step::ActionFailed(err),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Aggregate (processed, retries) across workers
pub fn aggregate_stats(workers: &[Worker]) -> (u64, u64) {
    workers.iter().fold((0, 0), |(processed, retries), w| {
        (
            processed + w.stats.processed.load(Ordering::Relaxed),
            retries + w.stats.retries.load(Ordering::Relaxed),
        )
    })
}
