//! Progress reporting for migration runs
//!
//! Provides a live spinner with the tracker's counters using indicatif.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Counter snapshot shown by the spinner
#[derive(Debug, Clone, Default)]
pub struct MigrateProgress {
    pub found: u64,
    pub errors: u64,
    pub ignored: u64,
    pub unchanged: u64,
    pub retries: u64,
    pub elapsed: Duration,
}

impl MigrateProgress {
    pub fn migrated(&self) -> u64 {
        self.found
            .saturating_sub(self.errors)
            .saturating_sub(self.ignored)
            .saturating_sub(self.unchanged)
    }

    /// Resources per second
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.found as f64 / secs
        } else {
            0.0
        }
    }
}

/// Spinner that displays run status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Hidden reporter, for tests and non-interactive runs
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Update the progress display
    pub fn update(&self, progress: &MigrateProgress) {
        let msg = format!(
            "Found: {} | Migrated: {} | Unchanged: {} | Ignored: {} | Errors: {} | Retries: {} | Rate: {:.0}/s",
            format_number(progress.found),
            format_number(progress.migrated()),
            format_number(progress.unchanged),
            format_number(progress.ignored),
            format_number(progress.errors),
            format_number(progress.retries),
            progress.rate(),
        );

        self.bar.set_message(msg);
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of the run
pub fn print_header(migration: &str, workers: usize, inputs: usize, dry_run: bool) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("resource-migrator").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Migration:").bold(), migration);
    eprintln!("  {} {}", style("Workers:").bold(), workers);
    eprintln!("  {} {}", style("Inputs:").bold(), inputs);
    if dry_run {
        eprintln!("  {} {}", style("Mode:").bold(), style("dry run").yellow());
    } else {
        eprintln!("  {} {}", style("Mode:").bold(), style("confirm").green());
    }
    eprintln!();
}
