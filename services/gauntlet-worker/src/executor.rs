//! Command execution against the worker's local test containers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use gauntlet_core::{
    ClusterConnection, FaultSink, HarnessError, HarnessResult, TestContainer, TestContext, TestId,
    TestPhase,
};
use gauntlet_protocol::{
    CommandOp, CommandResponse, RequestReceiver, ResponseBody, ResponseSender,
};

use crate::registry::TestRegistry;

struct ActiveTest {
    container: Arc<TestContainer>,
    // Completion flag per started phase; presence means "was started".
    phases: HashMap<TestPhase, Arc<AtomicBool>>,
}

/// Executes coordinator commands against locally held test containers.
///
/// One executor per worker process. Phase starts are asynchronous: the
/// phase runs on its own named thread so the command loop stays
/// responsive, in particular for a stop command during a long run
/// phase.
pub struct CommandExecutor {
    registry: Arc<TestRegistry>,
    connection: Arc<dyn ClusterConnection>,
    faults: FaultSink,
    default_thread_count: usize,
    active: Mutex<HashMap<TestId, ActiveTest>>,
}

impl CommandExecutor {
    /// Creates an executor bound to the worker's connection and fault
    /// sink.
    pub fn new(
        registry: Arc<TestRegistry>,
        connection: Arc<dyn ClusterConnection>,
        faults: FaultSink,
        default_thread_count: usize,
    ) -> Self {
        Self {
            registry,
            connection,
            faults,
            default_thread_count,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Executes one command, converting failures into an error
    /// response.
    pub fn execute(&self, op: &CommandOp) -> ResponseBody {
        match self.try_execute(op) {
            Ok(body) => body,
            Err(error) => ResponseBody::Error {
                message: error.to_string(),
            },
        }
    }

    /// Requests a cooperative stop of every active test.
    pub fn stop_all(&self) {
        for test in self.active.lock().values() {
            test.container.context().request_stop();
        }
    }

    fn try_execute(&self, op: &CommandOp) -> HarnessResult<ResponseBody> {
        match op {
            CommandOp::Ping => Ok(ResponseBody::Ack),
            CommandOp::CreateTest {
                test_id,
                name,
                properties,
                thread_count,
            } => {
                let mut active = self.active.lock();
                if active.contains_key(test_id) {
                    return Err(HarnessError::command(format!(
                        "test {test_id} already exists"
                    )));
                }
                let scenario = self.registry.create(name, properties)?;
                let ctx = TestContext::new(*test_id, Arc::clone(&self.connection));
                let threads = thread_count.unwrap_or(self.default_thread_count);
                let container =
                    TestContainer::new(scenario, ctx, threads, self.faults.clone())?;
                active.insert(
                    *test_id,
                    ActiveTest {
                        container: Arc::new(container),
                        phases: HashMap::new(),
                    },
                );
                info!(%test_id, scenario = %name, threads, "created test");
                Ok(ResponseBody::Ack)
            }
            CommandOp::StartPhase { test_id, phase } => {
                let mut active = self.active.lock();
                let test = active
                    .get_mut(test_id)
                    .ok_or_else(|| HarnessError::command(format!("unknown test: {test_id}")))?;
                if test.phases.contains_key(phase) {
                    return Err(HarnessError::command(format!(
                        "phase {phase} was already started for test {test_id}"
                    )));
                }

                let done = Arc::new(AtomicBool::new(false));
                test.phases.insert(*phase, Arc::clone(&done));
                let container = Arc::clone(&test.container);
                let phase = *phase;
                let test_id = *test_id;
                let name = format!("{test_id}-phase-{phase}");
                thread::Builder::new().name(name).spawn(move || {
                    // A setup failure is already in the fault sink; the
                    // phase still counts as finished for polling.
                    if let Err(failure) = container.invoke(phase) {
                        error!(%test_id, %phase, %failure, "phase failed");
                    }
                    done.store(true, Ordering::Release);
                })?;
                Ok(ResponseBody::Ack)
            }
            CommandOp::IsPhaseComplete { test_id, phase } => {
                let active = self.active.lock();
                let test = active
                    .get(test_id)
                    .ok_or_else(|| HarnessError::command(format!("unknown test: {test_id}")))?;
                let done = test.phases.get(phase).ok_or_else(|| {
                    HarnessError::command(format!(
                        "phase {phase} was never started for test {test_id}"
                    ))
                })?;
                Ok(ResponseBody::PhaseCompleted {
                    done: done.load(Ordering::Acquire),
                })
            }
            CommandOp::StopRun { test_id } => {
                let active = self.active.lock();
                let test = active
                    .get(test_id)
                    .ok_or_else(|| HarnessError::command(format!("unknown test: {test_id}")))?;
                test.container.context().request_stop();
                info!(%test_id, "stop requested");
                Ok(ResponseBody::Ack)
            }
            CommandOp::OperationCount { test_id } => {
                let active = self.active.lock();
                let test = active
                    .get(test_id)
                    .ok_or_else(|| HarnessError::command(format!("unknown test: {test_id}")))?;
                Ok(ResponseBody::OperationCount {
                    count: test.container.operation_count(),
                })
            }
            CommandOp::RemoveTest { test_id } => {
                let mut active = self.active.lock();
                active
                    .remove(test_id)
                    .ok_or_else(|| HarnessError::command(format!("unknown test: {test_id}")))?;
                info!(%test_id, "removed test");
                Ok(ResponseBody::Ack)
            }
        }
    }
}

/// Runs the single processing loop on a dedicated thread.
///
/// Requests are executed in arrival order with exactly one response per
/// request; a failed command becomes an error response, never the end
/// of the loop. The loop exits when every request sender is gone or the
/// response receiver is dropped.
///
/// # Errors
///
/// Returns a transport error when the OS refuses to create the thread.
pub fn spawn_processor(
    executor: Arc<CommandExecutor>,
    mut requests: RequestReceiver,
    responses: ResponseSender,
) -> HarnessResult<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("command-processor".to_string())
        .spawn(move || {
            while let Some(request) = requests.blocking_recv() {
                let body = executor.execute(&request.op);
                let response = CommandResponse {
                    seq: request.seq,
                    body,
                };
                if responses.send(response).is_err() {
                    warn!("response queue closed; stopping command processor");
                    return;
                }
            }
            info!("request queue closed; command processor exiting");
        })?;
    Ok(handle)
}
