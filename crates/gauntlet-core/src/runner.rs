//! In-process lifecycle driver for developing scenarios.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::clock::StopClock;
use crate::container::TestContainer;
use crate::context::{ClusterConnection, LoopbackConnection, TestContext};
use crate::error::HarnessResult;
use crate::faults::FaultSink;
use crate::ids::TestId;
use crate::phase::TestPhase;
use crate::test::LoadTest;

/// Outcome of one local run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Total operations performed during the run phase.
    pub operation_count: u64,
    /// Number of fault records produced by the run.
    pub faults: u64,
    /// Wall time of the whole lifecycle.
    pub elapsed: Duration,
}

/// Runs one scenario through the full lifecycle in the current process.
///
/// Meant for developing a scenario without deploying it to a worker
/// fleet: loopback connection, local fault directory, canonical phase
/// order, a stop clock bounding the run phase.
pub struct TestRunner {
    duration: Duration,
    tick: Duration,
    thread_count: usize,
    fault_dir: PathBuf,
    connection: Arc<dyn ClusterConnection>,
}

impl TestRunner {
    /// Creates a runner with a 60-second run on one thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            duration: Duration::from_secs(60),
            tick: Duration::from_secs(5),
            thread_count: 1,
            fault_dir: PathBuf::from("faults"),
            connection: Arc::new(LoopbackConnection),
        }
    }

    /// Sets the run-phase duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the stop clock's progress tick.
    #[must_use]
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Sets the number of workload threads.
    #[must_use]
    pub fn thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Sets the directory fault records are written into.
    #[must_use]
    pub fn fault_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fault_dir = dir.into();
        self
    }

    /// Replaces the loopback connection, for scenarios that need a real
    /// platform handle.
    #[must_use]
    pub fn connection(mut self, connection: Arc<dyn ClusterConnection>) -> Self {
        self.connection = connection;
        self
    }

    /// Drives `test` through the canonical phase order.
    ///
    /// # Errors
    ///
    /// Returns the container's configuration error or a fatal setup
    /// failure. Per-thread failures end up in the fault sink and are
    /// reflected in the summary's fault count instead.
    pub fn run(&self, test: Arc<dyn LoadTest>) -> HarnessResult<RunSummary> {
        let started = Instant::now();
        let test_id = TestId::new();
        let ctx = TestContext::new(test_id, Arc::clone(&self.connection));
        let faults = FaultSink::new(&self.fault_dir);
        let container = TestContainer::new(test, ctx.clone(), self.thread_count, faults.clone())?;

        info!(%test_id, threads = self.thread_count, "starting local test run");
        container.invoke(TestPhase::Setup)?;
        container.invoke(TestPhase::LocalWarmup)?;
        container.invoke(TestPhase::GlobalWarmup)?;

        let clock = StopClock::with_tick(ctx, self.duration, self.tick);
        container.invoke(TestPhase::Run)?;
        clock.join();

        container.invoke(TestPhase::GlobalVerify)?;
        container.invoke(TestPhase::LocalVerify)?;
        container.invoke(TestPhase::GlobalTeardown)?;
        container.invoke(TestPhase::LocalTeardown)?;

        let summary = RunSummary {
            operation_count: container.operation_count(),
            faults: faults.fault_count(),
            elapsed: started.elapsed(),
        };
        info!(
            %test_id,
            operations = summary.operation_count,
            faults = summary.faults,
            "finished local test run"
        );
        Ok(summary)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}
