//! De-duplicating error reporter
//!
//! Recurring errors (the same message from the same call site) are logged
//! once per window. Keys live in a capacity-bounded moka cache, so rarely
//! seen keys are evicted once the cache is full.

use moka::sync::Cache;
use parking_lot::Mutex;
use std::fmt::Display;
use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SinkKey {
    file: &'static str,
    line: u32,
    message: String,
}

#[derive(Debug, Default)]
struct Seen {
    /// `None` until the key is logged for the first time
    last_logged: Option<Instant>,
    suppressed: u64,
}

/// Capacity-bounded, windowed error de-duplicator
pub struct ErrorSink {
    window: Duration,
    recent: Cache<SinkKey, Arc<Mutex<Seen>>>,
}

impl ErrorSink {
    pub fn new(capacity: usize, window: Duration) -> Self {
        let recent = Cache::builder()
            .max_capacity(capacity.max(1) as u64)
            // Idle keys are forgotten; a repeat after that logs afresh
            .time_to_idle(window.max(Duration::from_secs(1)) * 4)
            .build();
        Self { window, recent }
    }

    /// Report an error, logging it unless the same call site reported the
    /// same message within the window. Returns whether it was logged.
    #[track_caller]
    pub fn report(&self, err: &dyn Display) -> bool {
        let location = Location::caller();
        self.report_at(location.file(), location.line(), &err.to_string())
    }

    fn report_at(&self, file: &'static str, line: u32, message: &str) -> bool {
        let key = SinkKey {
            file,
            line,
            message: message.to_string(),
        };
        let now = Instant::now();
        let seen = self.recent.get_with(key, || Arc::new(Mutex::new(Seen::default())));

        let suppressed_before = {
            let mut seen = seen.lock();
            match seen.last_logged {
                Some(at) if now.duration_since(at) < self.window => {
                    seen.suppressed += 1;
                    return false;
                }
                _ => {
                    seen.last_logged = Some(now);
                    std::mem::take(&mut seen.suppressed)
                }
            }
        };

        if suppressed_before > 0 {
            warn!(site = %format!("{}:{}", file, line), suppressed = suppressed_before, "{}", message);
        } else {
            warn!(site = %format!("{}:{}", file, line), "{}", message);
        }
        true
    }

    /// Repeats swallowed since a message was last logged
    pub fn suppressed(&self, file: &'static str, line: u32, message: &str) -> u64 {
        let key = SinkKey {
            file,
            line,
            message: message.to_string(),
        };
        self.recent
            .get(&key)
            .map(|seen| seen.lock().suppressed)
            .unwrap_or(0)
    }

    /// Number of distinct keys currently remembered
    pub fn len(&self) -> usize {
        self.recent.run_pending_tasks();
        self.recent.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new(4096, Duration::from_secs(60))
    }
}

impl std::fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSink")
            .field("window", &self.window)
            .field("entries", &self.recent.entry_count())
            .finish()
    }
}
