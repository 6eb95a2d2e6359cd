//! Wire model and queueing contract of the coordinator/worker command
//! channel.
//!
//! Two unbounded FIFO queues decouple the socket transport from the
//! single execution thread: requests flow in and are processed in
//! arrival order, exactly one response per request flows out in the same
//! order. A transport reconnect re-attaches to the same queues, so
//! accepted-but-unanswered requests survive a lost connection.

pub mod codec;

use std::collections::BTreeMap;

use gauntlet_core::{TestId, TestPhase};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One command sent by a controlling process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Correlation number assigned by the sender, echoed in the
    /// response.
    pub seq: u64,
    /// The operation to perform.
    pub op: CommandOp,
}

/// Operations a controller can ask a worker to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandOp {
    /// Liveness check.
    Ping,
    /// Instantiates a registered scenario as a new test.
    CreateTest {
        test_id: TestId,
        name: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
        #[serde(default)]
        thread_count: Option<usize>,
    },
    /// Starts one lifecycle phase asynchronously.
    StartPhase { test_id: TestId, phase: TestPhase },
    /// Polls whether a started phase has finished.
    IsPhaseComplete { test_id: TestId, phase: TestPhase },
    /// Requests a cooperative stop of the run phase.
    StopRun { test_id: TestId },
    /// Reads the operations performed so far.
    OperationCount { test_id: TestId },
    /// Forgets a test after its teardown phases.
    RemoveTest { test_id: TestId },
}

/// One reply, correlated to its request by `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// The originating request's correlation number.
    pub seq: u64,
    /// Result or failure payload.
    pub body: ResponseBody,
}

/// Result payload of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// The command was executed and needs no payload.
    Ack,
    /// Whether the polled phase has finished.
    PhaseCompleted { done: bool },
    /// Operations performed by the test so far.
    OperationCount { count: u64 },
    /// The command was executed but failed; the channel keeps running.
    Error { message: String },
}

/// Sends requests into a worker's processing loop.
pub type RequestSender = mpsc::UnboundedSender<CommandRequest>;
/// Consumed by the single processing loop.
pub type RequestReceiver = mpsc::UnboundedReceiver<CommandRequest>;
/// Used by the processing loop to emit responses.
pub type ResponseSender = mpsc::UnboundedSender<CommandResponse>;
/// Drained by the transport writer.
pub type ResponseReceiver = mpsc::UnboundedReceiver<CommandResponse>;

/// Creates the request and response queue pair of one command channel.
#[must_use]
pub fn command_queues() -> (RequestSender, RequestReceiver, ResponseSender, ResponseReceiver) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    (request_tx, request_rx, response_tx, response_rx)
}
