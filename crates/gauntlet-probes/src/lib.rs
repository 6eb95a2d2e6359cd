//! Per-operation latency and throughput probes for workload threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use thiserror::Error;

/// Significant value digits kept by probe histograms.
const SIGNIFICANT_DIGITS: u8 = 3;

/// Probe bracketing misuse.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// `started()` was called while a measurement was already open.
    #[error("started() called while a measurement is already open")]
    BracketAlreadyOpen,
    /// `done()` was called without a matching `started()`.
    #[error("done() called without a matching started()")]
    BracketNotOpen,
}

/// Returns an empty nanosecond histogram with the probe configuration.
///
/// Auto-resizing, 3 significant digits. Useful as a merge target for
/// [`Probe::merge_interval_into`].
#[must_use]
pub fn empty_histogram() -> Histogram<u64> {
    // Creation only fails for more than 5 significant digits.
    match Histogram::new(SIGNIFICANT_DIGITS) {
        Ok(histogram) => histogram,
        Err(_) => unreachable!("{} significant digits is a valid configuration", SIGNIFICANT_DIGITS),
    }
}

struct ProbeShared {
    invocations: AtomicU64,
    interval: Mutex<Histogram<u64>>,
}

/// Measures operation latency and counts invocations for one test.
///
/// A `Probe` is a cheap handle: clones share the invocation count and
/// the interval histogram, while the in-flight start instant belongs to
/// the individual handle. Each workload thread brackets its operations
/// on its own clone with [`started`](Probe::started) and
/// [`done`](Probe::done); aggregators hold another clone and drain
/// accumulated values with
/// [`take_interval_histogram`](Probe::take_interval_histogram).
pub struct Probe {
    shared: Arc<ProbeShared>,
    pending: Option<Instant>,
}

impl Probe {
    /// Creates a probe with an empty histogram and a zero count.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ProbeShared {
                invocations: AtomicU64::new(0),
                interval: Mutex::new(empty_histogram()),
            }),
            pending: None,
        }
    }

    /// Opens a measurement bracket at the current instant.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::BracketAlreadyOpen`] when the previous
    /// bracket on this handle was never closed.
    pub fn started(&mut self) -> Result<(), ProbeError> {
        if self.pending.is_some() {
            return Err(ProbeError::BracketAlreadyOpen);
        }
        self.pending = Some(Instant::now());
        Ok(())
    }

    /// Closes the open bracket, recording the elapsed nanoseconds and
    /// bumping the invocation count.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::BracketNotOpen`] when no bracket is open;
    /// nothing is recorded in that case.
    pub fn done(&mut self) -> Result<(), ProbeError> {
        let start = self.pending.take().ok_or(ProbeError::BracketNotOpen)?;
        self.record_value(start.elapsed().as_nanos() as u64);
        Ok(())
    }

    /// Records an externally measured latency in nanoseconds.
    ///
    /// Counts as one invocation. Values outside the current histogram
    /// range saturate instead of failing.
    pub fn record_value(&self, nanos: u64) {
        self.shared.invocations.fetch_add(1, Ordering::Relaxed);
        self.shared.interval.lock().saturating_record(nanos);
    }

    /// Total invocations recorded by all clones of this probe.
    ///
    /// Monotonic; draining the interval histogram does not reset it.
    #[must_use]
    pub fn invocation_count(&self) -> u64 {
        self.shared.invocations.load(Ordering::Relaxed)
    }

    /// Returns the latencies accumulated since the previous drain and
    /// resets the shared interval histogram.
    #[must_use]
    pub fn take_interval_histogram(&self) -> Histogram<u64> {
        let mut interval = self.shared.interval.lock();
        std::mem::replace(&mut *interval, empty_histogram())
    }

    /// Drains the interval histogram into `target`.
    pub fn merge_interval_into(&self, target: &mut Histogram<u64>) {
        let snapshot = self.take_interval_histogram();
        // Both sides auto-resize, so the merge cannot reject values.
        let _ = target.add(&snapshot);
    }
}

impl Clone for Probe {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            pending: None,
        }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probe")
            .field("invocations", &self.invocation_count())
            .field("bracket_open", &self.pending.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_records_latency_and_count() {
        let mut probe = Probe::new();
        for _ in 0..5 {
            probe.started().unwrap();
            probe.done().unwrap();
        }
        assert_eq!(probe.invocation_count(), 5);
        assert_eq!(probe.take_interval_histogram().len(), 5);
    }

    #[test]
    fn test_done_without_started_fails() {
        let mut probe = Probe::new();
        assert_eq!(probe.done(), Err(ProbeError::BracketNotOpen));
        assert_eq!(probe.invocation_count(), 0);
    }

    #[test]
    fn test_started_twice_fails() {
        let mut probe = Probe::new();
        probe.started().unwrap();
        assert_eq!(probe.started(), Err(ProbeError::BracketAlreadyOpen));
        probe.done().unwrap();
        assert_eq!(probe.invocation_count(), 1);
    }

    #[test]
    fn test_drain_is_destructive() {
        let probe = Probe::new();
        probe.record_value(1_000);
        probe.record_value(2_000);
        assert_eq!(probe.take_interval_histogram().len(), 2);
        assert_eq!(probe.take_interval_histogram().len(), 0);
        assert_eq!(probe.invocation_count(), 2);
    }

    #[test]
    fn test_clones_share_totals_but_not_brackets() {
        let mut a = Probe::new();
        let mut b = a.clone();
        a.started().unwrap();
        b.started().unwrap();
        a.done().unwrap();
        b.done().unwrap();
        assert_eq!(a.invocation_count(), 2);
        assert_eq!(b.invocation_count(), 2);
    }

    #[test]
    fn test_merge_interval_into_target() {
        let probe = Probe::new();
        probe.record_value(500);
        probe.record_value(1_500);
        let mut merged = empty_histogram();
        probe.merge_interval_into(&mut merged);
        assert_eq!(merged.len(), 2);
        assert_eq!(probe.take_interval_histogram().len(), 0);
    }

    #[test]
    fn test_record_value_feeds_quantiles() {
        let probe = Probe::new();
        for nanos in [100u64, 200, 300, 400, 500] {
            probe.record_value(nanos);
        }
        let histogram = probe.take_interval_histogram();
        assert!(histogram.value_at_quantile(0.99) >= 400);
        assert!(histogram.value_at_quantile(0.10) <= 200);
    }
}
