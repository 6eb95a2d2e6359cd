//! Durable, per-occurrence failure records.
//!
//! Every failure anywhere in a worker ends up as one numbered
//! `<n>.exception` file that an agent or operator can grep long after
//! the worker process is gone. Reporting never fails: a sink that cannot
//! persist logs a warning and moves on.

use std::backtrace::Backtrace;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::warn;

use crate::ids::TestId;

/// Marks the boundary between a relayed trace and the local one.
const REMOTE_TRACE_SEPARATOR: &str = "------ End remote and begin local stack-trace ------";

struct SinkShared {
    dir: PathBuf,
    next_index: AtomicU64,
    recorded: Mutex<Vec<PathBuf>>,
}

/// Process-wide failure sink writing one file per occurrence.
///
/// Handles are cheap to clone and safe to call from any thread,
/// including from inside failure handling. [`report`](FaultSink::report)
/// never panics and never returns an error to the reporting path.
#[derive(Clone)]
pub struct FaultSink {
    shared: Arc<SinkShared>,
}

impl FaultSink {
    /// Creates a sink writing into `dir`. The directory is created on
    /// the first report if it does not exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(SinkShared {
                dir: dir.into(),
                next_index: AtomicU64::new(1),
                recorded: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Directory this sink persists into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Records a local failure.
    pub fn report(&self, test_id: Option<&TestId>, origin: &str, error: &(dyn Error + 'static)) {
        let mut record = header(test_id, origin, error);
        record.push('\n');
        record.push_str(&Backtrace::force_capture().to_string());
        self.persist(record);
    }

    /// Records a failure relayed from another process, stitching the
    /// remote trace in front of the local context.
    pub fn report_remote(
        &self,
        test_id: Option<&TestId>,
        origin: &str,
        remote_trace: &str,
        context: &(dyn Error + 'static),
    ) {
        let mut record = header(test_id, origin, context);
        record.push('\n');
        record.push_str(remote_trace.trim_end());
        record.push('\n');
        record.push_str(REMOTE_TRACE_SEPARATOR);
        record.push('\n');
        record.push_str(&Backtrace::force_capture().to_string());
        self.persist(record);
    }

    /// Number of faults recorded through this sink so far.
    ///
    /// Counts occurrences, not files: a record whose persistence failed
    /// still counts.
    #[must_use]
    pub fn fault_count(&self) -> u64 {
        self.shared.next_index.load(Ordering::Acquire) - 1
    }

    /// Paths of the fault files written so far, in report order.
    #[must_use]
    pub fn recorded_paths(&self) -> Vec<PathBuf> {
        self.shared.recorded.lock().clone()
    }

    fn persist(&self, record: String) {
        let index = self.shared.next_index.fetch_add(1, Ordering::AcqRel);
        if let Err(error) = fs::create_dir_all(&self.shared.dir) {
            warn!(%error, dir = %self.shared.dir.display(), "could not create fault directory");
            return;
        }

        // Write-then-rename so readers never observe a partial record.
        let tmp = self.shared.dir.join(format!("{index}.exception.tmp"));
        let path = self.shared.dir.join(format!("{index}.exception"));
        if let Err(error) = fs::write(&tmp, record) {
            warn!(%error, path = %tmp.display(), "could not write fault record");
            return;
        }
        if let Err(error) = fs::rename(&tmp, &path) {
            warn!(%error, path = %path.display(), "could not publish fault record");
            return;
        }
        self.shared.recorded.lock().push(path);
    }
}

impl std::fmt::Debug for FaultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultSink")
            .field("dir", &self.shared.dir)
            .field("fault_count", &self.fault_count())
            .finish()
    }
}

fn header(test_id: Option<&TestId>, origin: &str, error: &(dyn Error + 'static)) -> String {
    let mut record = String::new();
    match test_id {
        Some(id) => record.push_str(&format!("test={id}\n")),
        None => record.push_str("test=-\n"),
    }
    record.push_str(&format!("origin={origin}\n"));
    record.push_str(&format!("time={}\n", Utc::now().to_rfc3339()));
    record.push_str(&format!("error={error}\n"));

    let mut cause = error.source();
    while let Some(link) = cause {
        record.push_str(&format!("cause={link}\n"));
        cause = link.source();
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[test]
    fn test_records_are_numbered_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FaultSink::new(dir.path());

        sink.report(None, "worker", &HarnessError::workload("first"));
        sink.report(None, "worker", &HarnessError::workload("second"));

        let paths = sink.recorded_paths();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("1.exception"));
        assert!(paths[1].ends_with("2.exception"));
        assert_eq!(sink.fault_count(), 2);
    }

    #[test]
    fn test_record_layout_is_greppable() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FaultSink::new(dir.path());
        let test_id = TestId::new();

        sink.report(Some(&test_id), "run-3", &HarnessError::workload("cache miss storm"));

        let content = fs::read_to_string(&sink.recorded_paths()[0]).unwrap();
        assert!(content.contains(&format!("test={test_id}")));
        assert!(content.contains("origin=run-3"));
        assert!(content.contains("error=workload failure: cache miss storm"));
        assert!(content.contains("time="));
    }

    #[test]
    fn test_remote_stitching_contains_separator_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FaultSink::new(dir.path());

        sink.report_remote(
            None,
            "agent",
            "remote frame a\nremote frame b",
            &HarnessError::command("relayed"),
        );

        let content = fs::read_to_string(&sink.recorded_paths()[0]).unwrap();
        assert_eq!(content.matches(REMOTE_TRACE_SEPARATOR).count(), 1);
        let remote = content.find("remote frame b").unwrap();
        let separator = content.find(REMOTE_TRACE_SEPARATOR).unwrap();
        assert!(remote < separator);
    }

    #[test]
    fn test_concurrent_reports_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FaultSink::new(dir.path());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    sink.report(None, &format!("thread-{i}"), &HarnessError::workload("boom"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let paths = sink.recorded_paths();
        assert_eq!(paths.len(), 8);
        let mut unique = paths.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn test_unwritable_directory_is_swallowed() {
        let sink = FaultSink::new("/proc/gauntlet-cannot-exist/faults");
        sink.report(None, "worker", &HarnessError::workload("boom"));
        assert_eq!(sink.fault_count(), 1);
        assert!(sink.recorded_paths().is_empty());
    }
}
