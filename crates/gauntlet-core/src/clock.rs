use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::context::TestContext;

/// Default progress/sleep granularity.
const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Background timer that ends a run after a configured duration.
///
/// Sleeps in bounded ticks, logging progress each tick, and sets the
/// context's stop flag once the duration has elapsed. The clock only
/// signals; workload threads notice the flag at their next poll, so
/// cancellation latency equals the workload's iteration granularity.
pub struct StopClock {
    handle: JoinHandle<()>,
}

impl StopClock {
    /// Starts the clock with the default 5-second tick.
    #[must_use]
    pub fn start(ctx: TestContext, duration: Duration) -> Self {
        Self::with_tick(ctx, duration, DEFAULT_TICK)
    }

    /// Starts the clock with an explicit tick period.
    #[must_use]
    pub fn with_tick(ctx: TestContext, duration: Duration, tick: Duration) -> Self {
        let handle = thread::spawn(move || run_clock(&ctx, duration, tick));
        Self { handle }
    }

    /// Waits for the clock thread to finish.
    pub fn join(self) {
        // The clock thread has no panicking paths; a join failure would
        // mean the runtime itself unwound.
        let _ = self.handle.join();
    }
}

fn run_clock(ctx: &TestContext, duration: Duration, tick: Duration) {
    let whole_ticks = if tick.is_zero() {
        0
    } else {
        duration.as_nanos() / tick.as_nanos()
    };

    for i in 1..=whole_ticks {
        thread::sleep(tick);
        if ctx.is_stopped() {
            debug!("test stopped externally before the duration elapsed");
            return;
        }
        let elapsed = tick.as_secs_f64() * i as f64;
        let total = duration.as_secs_f64();
        info!(
            "Running {:.0} of {:.0} seconds ({:.2}% complete)",
            elapsed,
            total,
            elapsed * 100.0 / total
        );
    }

    let remainder = if tick.is_zero() {
        duration
    } else {
        Duration::from_nanos((duration.as_nanos() % tick.as_nanos()) as u64)
    };
    if !remainder.is_zero() {
        thread::sleep(remainder);
    }

    if ctx.is_stopped() {
        debug!("test stopped externally before the duration elapsed");
        return;
    }
    ctx.request_stop();
    info!("Notified test to stop");
}
