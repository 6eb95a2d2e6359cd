use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{Builder, JoinHandle};

use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::faults::FaultSink;
use crate::ids::TestId;

/// Spawns and joins the named workload threads of one test phase.
///
/// Threads are named `{test_id}-{role}-{ordinal}` so fault records and
/// thread dumps can be tied back to a test and a thread index. Failures
/// inside a spawned thread, whether a returned error or a panic, are
/// reported to the fault sink and never re-raised: callers ask the sink
/// whether anything went wrong.
pub struct ThreadSpawner {
    test_id: TestId,
    role: String,
    faults: FaultSink,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadSpawner {
    /// Creates a spawner for one phase of one test.
    pub fn new(test_id: TestId, role: impl Into<String>, faults: FaultSink) -> Self {
        Self {
            test_id,
            role: role.into(),
            faults,
            handles: Vec::new(),
        }
    }

    /// Starts one named thread running `workload`.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the OS refuses to create the
    /// thread. Workload failures do not surface here.
    pub fn spawn<F>(&mut self, workload: F) -> HarnessResult<()>
    where
        F: FnOnce() -> HarnessResult<()> + Send + 'static,
    {
        let ordinal = self.handles.len();
        let name = format!("{}-{}-{}", self.test_id, self.role, ordinal);
        let faults = self.faults.clone();
        let test_id = self.test_id;
        let thread_name = name.clone();

        let handle = Builder::new().name(name).spawn(move || {
            match catch_unwind(AssertUnwindSafe(workload)) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    faults.report(Some(&test_id), &thread_name, &error);
                }
                Err(payload) => {
                    let error = HarnessError::workload(format!(
                        "workload thread panicked: {}",
                        panic_message(payload.as_ref())
                    ));
                    faults.report(Some(&test_id), &thread_name, &error);
                }
            }
        })?;
        self.handles.push(handle);
        Ok(())
    }

    /// Number of threads spawned so far.
    #[must_use]
    pub fn spawned(&self) -> usize {
        self.handles.len()
    }

    /// Joins every spawned thread and returns how many there were.
    ///
    /// Does not cancel anything: threads are expected to finish on their
    /// own, typically by polling the context's stop flag.
    pub fn await_completion(self) -> usize {
        let count = self.handles.len();
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            // Panics are caught inside the thread; a join error here
            // means the runtime unwound in a way we cannot observe.
            if handle.join().is_err() {
                debug!(thread = %name, "workload thread terminated abnormally");
            }
        }
        count
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
