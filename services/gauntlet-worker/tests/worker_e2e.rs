//! Full worker stack over a real socket: transport, queues, processor,
//! container, demo scenario.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};

use gauntlet_core::{FaultSink, LoopbackConnection, TestId, TestPhase};
use gauntlet_protocol::codec::{read_frame, write_frame};
use gauntlet_protocol::{command_queues, CommandOp, CommandRequest, CommandResponse, ResponseBody};
use gauntlet_worker::executor::{spawn_processor, CommandExecutor};
use gauntlet_worker::registry::TestRegistry;
use gauntlet_worker::scenario::register_builtin;
use gauntlet_worker::transport::serve;

struct Controller {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    buf: String,
    next_seq: u64,
}

impl Controller {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
            buf: String::new(),
            next_seq: 0,
        }
    }

    async fn send(&mut self, op: CommandOp) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        write_frame(&mut self.writer, &CommandRequest { seq, op })
            .await
            .unwrap();
        seq
    }

    async fn recv(&mut self) -> CommandResponse {
        let deadline = tokio::time::Duration::from_secs(10);
        tokio::time::timeout(deadline, read_frame(&mut self.reader, &mut self.buf))
            .await
            .expect("timed out waiting for a response")
            .unwrap()
            .unwrap()
    }

    async fn roundtrip(&mut self, op: CommandOp) -> ResponseBody {
        let seq = self.send(op).await;
        let response = self.recv().await;
        assert_eq!(response.seq, seq);
        response.body
    }
}

async fn start_worker(fault_dir: &std::path::Path) -> (std::net::SocketAddr, Arc<CommandExecutor>) {
    let registry = Arc::new(TestRegistry::new());
    register_builtin(&registry);
    let executor = Arc::new(CommandExecutor::new(
        registry,
        Arc::new(LoopbackConnection),
        FaultSink::new(fault_dir),
        2,
    ));

    let (request_tx, request_rx, response_tx, response_rx) = command_queues();
    spawn_processor(Arc::clone(&executor), request_rx, response_tx).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, request_tx, response_rx));
    (addr, executor)
}

async fn await_phase(controller: &mut Controller, test_id: TestId, phase: TestPhase) {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let body = controller
            .roundtrip(CommandOp::IsPhaseComplete { test_id, phase })
            .await;
        if body == (ResponseBody::PhaseCompleted { done: true }) {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "phase {phase} never completed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_test_lifecycle_over_the_wire() {
    let fault_dir = tempfile::tempdir().unwrap();
    let (addr, _executor) = start_worker(fault_dir.path()).await;
    let mut controller = Controller::connect(addr).await;

    assert_eq!(controller.roundtrip(CommandOp::Ping).await, ResponseBody::Ack);

    let test_id = TestId::new();
    let properties = BTreeMap::from([("keys".to_string(), "64".to_string())]);
    let body = controller
        .roundtrip(CommandOp::CreateTest {
            test_id,
            name: "keyed_counter".to_string(),
            properties,
            thread_count: Some(2),
        })
        .await;
    assert_eq!(body, ResponseBody::Ack);

    for phase in [TestPhase::Setup, TestPhase::LocalWarmup, TestPhase::GlobalWarmup] {
        let body = controller
            .roundtrip(CommandOp::StartPhase { test_id, phase })
            .await;
        assert_eq!(body, ResponseBody::Ack);
        await_phase(&mut controller, test_id, phase).await;
    }

    let body = controller
        .roundtrip(CommandOp::StartPhase {
            test_id,
            phase: TestPhase::Run,
        })
        .await;
    assert_eq!(body, ResponseBody::Ack);

    // Let the workload spin briefly, then stop it cooperatively.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let body = controller.roundtrip(CommandOp::StopRun { test_id }).await;
    assert_eq!(body, ResponseBody::Ack);
    await_phase(&mut controller, test_id, TestPhase::Run).await;

    match controller.roundtrip(CommandOp::OperationCount { test_id }).await {
        ResponseBody::OperationCount { count } => assert!(count > 0),
        other => panic!("unexpected response: {other:?}"),
    }

    for phase in [
        TestPhase::GlobalVerify,
        TestPhase::LocalVerify,
        TestPhase::GlobalTeardown,
        TestPhase::LocalTeardown,
    ] {
        let body = controller
            .roundtrip(CommandOp::StartPhase { test_id, phase })
            .await;
        assert_eq!(body, ResponseBody::Ack);
        await_phase(&mut controller, test_id, phase).await;
    }

    assert_eq!(
        controller.roundtrip(CommandOp::RemoveTest { test_id }).await,
        ResponseBody::Ack
    );

    // Nothing failed along the way.
    let records: Vec<_> = std::fs::read_dir(fault_dir.path()).unwrap().collect();
    assert!(records.is_empty(), "unexpected fault records: {records:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_command_keeps_the_channel_alive_and_ordered() {
    let fault_dir = tempfile::tempdir().unwrap();
    let (addr, _executor) = start_worker(fault_dir.path()).await;
    let mut controller = Controller::connect(addr).await;

    // R1 ok, R2 fails (unknown test), R3 ok; responses arrive in order.
    let s1 = controller.send(CommandOp::Ping).await;
    let s2 = controller
        .send(CommandOp::StopRun {
            test_id: TestId::new(),
        })
        .await;
    let s3 = controller.send(CommandOp::Ping).await;

    let r1 = controller.recv().await;
    let r2 = controller.recv().await;
    let r3 = controller.recv().await;
    assert_eq!((r1.seq, r3.seq), (s1, s3));
    assert_eq!(r1.body, ResponseBody::Ack);
    assert_eq!(r2.seq, s2);
    assert!(matches!(r2.body, ResponseBody::Error { .. }));
    assert_eq!(r3.body, ResponseBody::Ack);

    // R4 is still accepted afterwards.
    assert_eq!(controller.roundtrip(CommandOp::Ping).await, ResponseBody::Ack);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_frame_drops_connection_but_not_the_worker() {
    let fault_dir = tempfile::tempdir().unwrap();
    let (addr, _executor) = start_worker(fault_dir.path()).await;

    let mut controller = Controller::connect(addr).await;
    controller.writer.write_all(b"garbage\n").await.unwrap();
    drop(controller);

    // A fresh connection works fine.
    let mut controller = Controller::connect(addr).await;
    assert_eq!(controller.roundtrip(CommandOp::Ping).await, ResponseBody::Ack);
}
