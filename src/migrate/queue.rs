//! Work and result queues
//!
//! The work queue carries one `WorkItem` per enumerated resource from the
//! producer to the worker pool. The result queue carries `ResultEvent`s from
//! workers to the tracker. Both are bounded: a full work queue blocks the
//! enumerator, a full result queue blocks workers.

use crate::error::{EnumerationError, ResourceError};
use crate::resource::{ResourceInfo, ResourceKey};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A resource to migrate, plus the error hit while enumerating it
#[derive(Debug)]
pub struct WorkItem {
    pub info: ResourceInfo,
    pub error: Option<EnumerationError>,
}

impl WorkItem {
    pub fn new(info: ResourceInfo) -> Self {
        Self { info, error: None }
    }

    pub fn failed(info: ResourceInfo, error: EnumerationError) -> Self {
        Self {
            info,
            error: Some(error),
        }
    }
}

/// Terminal classification of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Success,
    Error,
    Unchanged,
    Ignore,
}

/// Outcome notification sent from a worker to the tracker
#[derive(Debug)]
pub struct ResultEvent {
    /// Counts toward the run total; exactly one per work item
    pub counted: bool,

    /// Uncounted notice that a retry is about to happen
    pub retry: bool,

    pub outcome: MigrationOutcome,

    pub key: ResourceKey,

    pub error: Option<ResourceError>,
}

impl ResultEvent {
    /// The single counted event for a work item
    pub fn finished(key: ResourceKey, outcome: MigrationOutcome, error: Option<ResourceError>) -> Self {
        Self {
            counted: true,
            retry: false,
            outcome,
            key,
            error,
        }
    }

    /// An uncounted retry notice
    pub fn retrying(key: ResourceKey, error: ResourceError) -> Self {
        Self {
            counted: false,
            retry: true,
            outcome: MigrationOutcome::Error,
            key,
            error: Some(error),
        }
    }
}

/// Statistics for the work queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total items enqueued
    pub enqueued: AtomicU64,

    /// Total items dequeued
    pub dequeued: AtomicU64,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

/// Bounded work queue
///
/// Split it into its two ends before use; the queue closes when the sender
/// is dropped and every receiver has drained it.
pub struct WorkQueue {
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
    stats: Arc<QueueStats>,
}

impl WorkQueue {
    /// Create a new work queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);

        Self {
            sender,
            receiver,
            stats: Arc::new(QueueStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Separate the producer and consumer ends
    pub fn split(self) -> (WorkQueueSender, WorkQueueReceiver) {
        let sender = WorkQueueSender {
            sender: self.sender,
            stats: Arc::clone(&self.stats),
        };
        let receiver = WorkQueueReceiver {
            receiver: self.receiver,
            stats: self.stats,
        };
        (sender, receiver)
    }
}

/// Producer end of the work queue
pub struct WorkQueueSender {
    sender: Sender<WorkItem>,
    stats: Arc<QueueStats>,
}

impl WorkQueueSender {
    /// Send an item, blocking while the queue is full
    ///
    /// Fails only when every receiver is gone; the item is handed back.
    pub fn send(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.sender.send(item).map_err(|e| e.into_inner())?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Consumer end of the work queue (clone for each worker)
#[derive(Clone)]
pub struct WorkQueueReceiver {
    receiver: Receiver<WorkItem>,
    stats: Arc<QueueStats>,
}

impl WorkQueueReceiver {
    /// Receive an item, blocking until one arrives
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn recv(&self) -> Option<WorkItem> {
        let item = self.receiver.recv().ok()?;
        self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Bounded channel carrying result events to the tracker
pub fn result_queue(capacity: usize) -> (Sender<ResultEvent>, Receiver<ResultEvent>) {
    bounded(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn item(name: &str) -> WorkItem {
        WorkItem::new(ResourceInfo::new(
            ResourceKey::new("Pod", Some("default"), name),
            Value::Null,
        ))
    }

    #[test]
    fn test_queue_basic() {
        let queue = WorkQueue::new(10);
        let stats = queue.stats();
        let (sender, receiver) = queue.split();

        sender.send(item("a")).unwrap();
        assert_eq!(receiver.len(), 1);

        let received = receiver.recv().unwrap();
        assert_eq!(received.info.name(), "a");
        assert_eq!(stats.enqueued(), 1);
        assert_eq!(stats.dequeued(), 1);
    }

    #[test]
    fn test_queue_closes_after_drain() {
        let (sender, receiver) = WorkQueue::new(10).split();
        sender.send(item("a")).unwrap();
        sender.send(item("b")).unwrap();
        drop(sender);

        assert!(receiver.recv().is_some());
        assert!(receiver.recv().is_some());
        assert!(receiver.recv().is_none());
    }

    #[test]
    fn test_send_fails_without_receivers() {
        let (sender, receiver) = WorkQueue::new(1).split();
        drop(receiver);
        let returned = sender.send(item("orphan")).unwrap_err();
        assert_eq!(returned.info.name(), "orphan");
    }
}
