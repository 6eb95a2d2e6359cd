//! Phase-driven execution of one test scenario.

use std::sync::Arc;

use gauntlet_probes::Probe;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::context::TestContext;
use crate::error::{HarnessError, HarnessResult};
use crate::faults::FaultSink;
use crate::phase::TestPhase;
use crate::spawner::ThreadSpawner;
use crate::test::{LoadTest, Workload};

/// Drives one scenario through its lifecycle phases.
///
/// Global phases invoke the scenario's hook once on the calling thread;
/// per-thread phases fan out across `thread_count` named threads and
/// block until all of them finish. A setup failure is fatal and returned
/// to the caller; any other failure is recorded in the fault sink and
/// the lifecycle continues best-effort. Callers learn about partial
/// failures from the sink, never from `invoke`'s return value.
pub struct TestContainer {
    test: Arc<dyn LoadTest>,
    ctx: TestContext,
    thread_count: usize,
    faults: FaultSink,
    probes: Mutex<Vec<Probe>>,
}

impl TestContainer {
    /// Binds a scenario to a context.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `thread_count` is zero.
    pub fn new(
        test: Arc<dyn LoadTest>,
        ctx: TestContext,
        thread_count: usize,
        faults: FaultSink,
    ) -> HarnessResult<Self> {
        if thread_count == 0 {
            return Err(HarnessError::configuration(
                "thread count must be at least 1",
            ));
        }
        Ok(Self {
            test,
            ctx,
            thread_count,
            faults,
            probes: Mutex::new(Vec::new()),
        })
    }

    /// The context this container drives its scenario with.
    #[must_use]
    pub fn context(&self) -> &TestContext {
        &self.ctx
    }

    /// Executes one phase to completion.
    ///
    /// # Errors
    ///
    /// Returns a fatal setup error when the setup hook fails; every
    /// other hook failure lands in the fault sink and `invoke` returns
    /// `Ok`.
    pub fn invoke(&self, phase: TestPhase) -> HarnessResult<()> {
        info!(test_id = %self.ctx.test_id(), %phase, "starting phase");
        let result = match phase {
            TestPhase::Setup => self.invoke_setup(),
            TestPhase::GlobalWarmup => self.invoke_global(phase, |test| test.warmup(true)),
            TestPhase::GlobalVerify => self.invoke_global(phase, |test| test.verify(true)),
            TestPhase::GlobalTeardown => self.invoke_global(phase, |test| test.teardown(true)),
            TestPhase::LocalWarmup => self.invoke_local(phase, |test| test.warmup(false)),
            TestPhase::LocalVerify => self.invoke_local(phase, |test| test.verify(false)),
            TestPhase::LocalTeardown => self.invoke_local(phase, |test| test.teardown(false)),
            TestPhase::Run => self.invoke_run(),
        };
        if result.is_ok() {
            info!(test_id = %self.ctx.test_id(), %phase, "finished phase");
        }
        result
    }

    /// Probe handles registered by the most recent run phase, one per
    /// workload thread.
    #[must_use]
    pub fn probes(&self) -> Vec<Probe> {
        self.probes.lock().clone()
    }

    /// Total operations performed by the scenario.
    ///
    /// Uses the scenario's own counter when it provides one, otherwise
    /// sums the invocation counts of the registered probes.
    #[must_use]
    pub fn operation_count(&self) -> u64 {
        match self.test.operation_count() {
            Some(count) => count,
            None => self.probes().iter().map(Probe::invocation_count).sum(),
        }
    }

    fn invoke_setup(&self) -> HarnessResult<()> {
        if let Err(error) = self.test.setup(&self.ctx) {
            self.faults.report(Some(&self.ctx.test_id()), "setup", &error);
            return Err(HarnessError::setup(error.to_string()));
        }
        Ok(())
    }

    fn invoke_global<F>(&self, phase: TestPhase, hook: F) -> HarnessResult<()>
    where
        F: FnOnce(&dyn LoadTest) -> HarnessResult<()>,
    {
        if let Err(error) = hook(self.test.as_ref()) {
            self.faults
                .report(Some(&self.ctx.test_id()), phase.as_str(), &error);
        }
        Ok(())
    }

    fn invoke_local<F>(&self, phase: TestPhase, hook: F) -> HarnessResult<()>
    where
        F: Fn(&dyn LoadTest) -> HarnessResult<()> + Send + Sync + 'static,
    {
        let hook = Arc::new(hook);
        let mut spawner =
            ThreadSpawner::new(self.ctx.test_id(), phase.as_str(), self.faults.clone());
        for _ in 0..self.thread_count {
            let test = Arc::clone(&self.test);
            let hook = Arc::clone(&hook);
            spawner.spawn(move || hook(test.as_ref()))?;
        }
        spawner.await_completion();
        Ok(())
    }

    fn invoke_run(&self) -> HarnessResult<()> {
        // One unit per thread; the first call decides whether the
        // scenario is unit-driven at all.
        let mut units = Vec::with_capacity(self.thread_count);
        if let Some(first) = self.test.create_workload() {
            units.push(first);
            for _ in 1..self.thread_count {
                match self.test.create_workload() {
                    Some(unit) => units.push(unit),
                    None => {
                        return Err(HarnessError::configuration(
                            "create_workload returned a unit for some threads but not others",
                        ));
                    }
                }
            }
        }

        self.probes.lock().clear();
        let mut spawner = ThreadSpawner::new(self.ctx.test_id(), "run", self.faults.clone());

        if units.is_empty() {
            debug!(test_id = %self.ctx.test_id(), "run phase uses the scenario's own run hook");
            for _ in 0..self.thread_count {
                let test = Arc::clone(&self.test);
                let ctx = self.ctx.clone();
                spawner.spawn(move || test.run(&ctx))?;
            }
        } else {
            for mut unit in units {
                let probe = Probe::new();
                self.probes.lock().push(probe.clone());
                let ctx = self.ctx.clone();
                spawner.spawn(move || drive_workload(unit.as_mut(), &ctx, probe))?;
            }
        }

        spawner.await_completion();
        Ok(())
    }
}

/// The iteration loop of one unit-driven workload thread.
fn drive_workload(
    unit: &mut dyn Workload,
    ctx: &TestContext,
    mut probe: Probe,
) -> HarnessResult<()> {
    unit.attach_probe(probe.clone());
    unit.before_run()?;
    while !ctx.is_stopped() {
        probe.started()?;
        unit.time_step()?;
        probe.done()?;
    }
    unit.after_run()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::context::LoopbackConnection;
    use crate::ids::TestId;

    #[derive(Default)]
    struct CountingTest {
        setup: AtomicU64,
        warmup_global: AtomicU64,
        warmup_local: AtomicU64,
        run: AtomicU64,
        verify_global: AtomicU64,
        verify_local: AtomicU64,
        teardown_global: AtomicU64,
        teardown_local: AtomicU64,
    }

    impl LoadTest for CountingTest {
        fn setup(&self, _ctx: &TestContext) -> HarnessResult<()> {
            self.setup.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn warmup(&self, global: bool) -> HarnessResult<()> {
            if global {
                self.warmup_global.fetch_add(1, Ordering::Relaxed);
            } else {
                self.warmup_local.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }

        fn run(&self, _ctx: &TestContext) -> HarnessResult<()> {
            self.run.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn verify(&self, global: bool) -> HarnessResult<()> {
            if global {
                self.verify_global.fetch_add(1, Ordering::Relaxed);
            } else {
                self.verify_local.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }

        fn teardown(&self, global: bool) -> HarnessResult<()> {
            if global {
                self.teardown_global.fetch_add(1, Ordering::Relaxed);
            } else {
                self.teardown_local.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }
    }

    fn harness(
        test: Arc<dyn LoadTest>,
        thread_count: usize,
    ) -> (tempfile::TempDir, FaultSink, TestContainer) {
        let dir = tempfile::tempdir().unwrap();
        let faults = FaultSink::new(dir.path());
        let ctx = TestContext::new(TestId::new(), Arc::new(LoopbackConnection));
        let container = TestContainer::new(test, ctx, thread_count, faults.clone()).unwrap();
        (dir, faults, container)
    }

    #[test]
    fn test_zero_threads_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let faults = FaultSink::new(dir.path());
        let ctx = TestContext::new(TestId::new(), Arc::new(LoopbackConnection));
        let result = TestContainer::new(Arc::new(CountingTest::default()), ctx, 0, faults);
        assert!(matches!(result, Err(HarnessError::Configuration { .. })));
    }

    #[test]
    fn test_canonical_order_yields_expected_call_counts() {
        let test = Arc::new(CountingTest::default());
        let (_dir, faults, container) = harness(Arc::clone(&test) as Arc<dyn LoadTest>, 3);

        for phase in TestPhase::ORDERED {
            container.invoke(phase).unwrap();
        }

        assert_eq!(test.setup.load(Ordering::Relaxed), 1);
        assert_eq!(test.warmup_global.load(Ordering::Relaxed), 1);
        assert_eq!(test.warmup_local.load(Ordering::Relaxed), 3);
        assert_eq!(test.run.load(Ordering::Relaxed), 3);
        assert_eq!(test.verify_global.load(Ordering::Relaxed), 1);
        assert_eq!(test.verify_local.load(Ordering::Relaxed), 3);
        assert_eq!(test.teardown_global.load(Ordering::Relaxed), 1);
        assert_eq!(test.teardown_local.load(Ordering::Relaxed), 3);
        assert_eq!(faults.fault_count(), 0);
    }

    #[test]
    fn test_absent_hooks_are_skipped_silently() {
        struct Bare;
        impl LoadTest for Bare {}

        let (_dir, faults, container) = harness(Arc::new(Bare), 2);
        for phase in TestPhase::ORDERED {
            container.invoke(phase).unwrap();
        }
        assert_eq!(faults.fault_count(), 0);
        assert_eq!(container.operation_count(), 0);
    }

    #[test]
    fn test_setup_failure_is_fatal_and_recorded_once() {
        struct FailingSetup;
        impl LoadTest for FailingSetup {
            fn setup(&self, _ctx: &TestContext) -> HarnessResult<()> {
                Err(HarnessError::workload("cluster not reachable"))
            }
        }

        let (_dir, faults, container) = harness(Arc::new(FailingSetup), 2);
        let result = container.invoke(TestPhase::Setup);
        assert!(matches!(result, Err(HarnessError::Setup { .. })));
        assert_eq!(faults.fault_count(), 1);
    }

    #[test]
    fn test_one_failing_run_thread_leaves_one_fault_and_next_phase_reachable() {
        struct FailOnThird {
            started: AtomicU64,
            verified: AtomicU64,
        }
        impl LoadTest for FailOnThird {
            fn run(&self, _ctx: &TestContext) -> HarnessResult<()> {
                if self.started.fetch_add(1, Ordering::SeqCst) == 2 {
                    return Err(HarnessError::workload("thread failure"));
                }
                Ok(())
            }

            fn verify(&self, global: bool) -> HarnessResult<()> {
                if global {
                    self.verified.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
        }

        let test = Arc::new(FailOnThird {
            started: AtomicU64::new(0),
            verified: AtomicU64::new(0),
        });
        let (_dir, faults, container) = harness(Arc::clone(&test) as Arc<dyn LoadTest>, 4);

        container.invoke(TestPhase::Run).unwrap();
        assert_eq!(test.started.load(Ordering::SeqCst), 4);
        assert_eq!(faults.fault_count(), 1);

        container.invoke(TestPhase::GlobalVerify).unwrap();
        assert_eq!(test.verified.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_global_failure_is_recorded_but_not_returned() {
        struct FailingVerify;
        impl LoadTest for FailingVerify {
            fn verify(&self, _global: bool) -> HarnessResult<()> {
                Err(HarnessError::workload("mismatch"))
            }
        }

        let (_dir, faults, container) = harness(Arc::new(FailingVerify), 2);
        container.invoke(TestPhase::GlobalVerify).unwrap();
        assert_eq!(faults.fault_count(), 1);
        container.invoke(TestPhase::LocalVerify).unwrap();
        assert_eq!(faults.fault_count(), 3);
    }

    #[test]
    fn test_unit_driven_run_injects_one_probe_per_thread() {
        struct UnitTest;
        struct Unit {
            steps: u64,
        }
        impl Workload for Unit {
            fn time_step(&mut self) -> HarnessResult<()> {
                self.steps += 1;
                Ok(())
            }
        }
        impl LoadTest for UnitTest {
            fn create_workload(&self) -> Option<Box<dyn Workload>> {
                Some(Box::new(Unit { steps: 0 }))
            }
        }

        let (_dir, faults, container) = harness(Arc::new(UnitTest), 3);
        container.context().request_stop();
        // Pre-stopped context: each unit runs before_run/after_run and
        // zero iterations, which still registers its probe.
        container.invoke(TestPhase::Run).unwrap();
        assert_eq!(container.probes().len(), 3);
        assert_eq!(faults.fault_count(), 0);
        assert_eq!(container.operation_count(), 0);
    }

    #[test]
    fn test_operation_count_prefers_scenario_override() {
        struct Overriding;
        impl LoadTest for Overriding {
            fn operation_count(&self) -> Option<u64> {
                Some(1234)
            }
        }

        let (_dir, _faults, container) = harness(Arc::new(Overriding), 1);
        assert_eq!(container.operation_count(), 1234);
    }
}
