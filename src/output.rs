//! Output plumbing for report lines
//!
//! Report lines go to a writer that may be shared by the tracker and, in
//! print mode, by every worker. `SharedWriter` serializes whole lines behind a
//! mutex so concurrent writers never interleave within a line.

use crate::resource::ResourceKey;
use chrono::Local;
use parking_lot::Mutex;
use std::fmt::Display;
use std::io::{self, Write};
use std::sync::Arc;

/// Clonable, mutex-guarded writer
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write one line atomically with respect to other clones
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut w = self.inner.lock();
        w.write_all(line.as_bytes())?;
        w.write_all(b"\n")?;
        w.flush()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// In-memory sink for capturing output
#[derive(Clone, Default)]
pub struct SharedBuffer {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `MMDD HH:MM:SS.micros`, the usual klog-style stamp
pub fn timestamp() -> String {
    Local::now().format("%m%d %H:%M:%S%.6f").to_string()
}

/// Format a per-resource report line
///
/// Info lines start with `I`, error lines with `E`, followed by the stamp.
pub fn report_line(prefix: &str, key: &ResourceKey, err: Option<&dyn Display>) -> String {
    match err {
        Some(err) => format!("E{} {:<10} {}: {}", timestamp(), prefix, key, err),
        None => format!("I{} {:<10} {}", timestamp(), prefix, key),
    }
}

/// Final summary line
pub fn summary_line(
    found: u64,
    errors: u64,
    ignored: u64,
    unchanged: u64,
    migrated: u64,
    dry_run: bool,
) -> String {
    let label = if dry_run { "summary (dry run):" } else { "summary:" };
    format!(
        "{} total={} errors={} ignored={} unchanged={} migrated={}",
        label, found, errors, ignored, unchanged, migrated
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_report_line_format() {
        let key = ResourceKey::new("Secret", Some("kube-system"), "token");
        let line = report_line("migrated:", &key, None);
        assert!(line.starts_with('I'));
        assert!(line.ends_with("migrated:  -n kube-system secret/token"));

        let err = "conflict";
        let line = report_line("error:", &key, Some(&err));
        assert!(line.starts_with('E'));
        assert!(line.ends_with("error:     -n kube-system secret/token: conflict"));
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(
            summary_line(10, 1, 2, 3, 4, false),
            "summary: total=10 errors=1 ignored=2 unchanged=3 migrated=4"
        );
        assert!(summary_line(0, 0, 0, 0, 0, true).starts_with("summary (dry run):"));
    }

    #[test]
    fn test_shared_writer_keeps_lines_whole() {
        let buffer = SharedBuffer::new();
        let writer = SharedWriter::new(buffer.clone());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let w = writer.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        w.write_line(&format!("worker-{}-line-{}", i, j)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let lines = buffer.lines();
        assert_eq!(lines.len(), 400);
        assert!(lines.iter().all(|l| l.starts_with("worker-") && l.contains("-line-")));
    }
}
