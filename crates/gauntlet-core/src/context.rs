use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarnessResult;
use crate::ids::TestId;

/// How a worker participates in the platform under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// The worker embeds a cluster member in-process.
    Member,
    /// The worker connects to the cluster as an external client.
    Client,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member => f.write_str("member"),
            Self::Client => f.write_str("client"),
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Self::Member),
            "client" => Ok(Self::Client),
            other => Err(format!("unknown connection mode: {other}")),
        }
    }
}

/// Handle to the platform under test.
///
/// The harness only needs an identity and a readiness query; everything a
/// scenario does with the platform goes through its own typed view of the
/// concrete implementation.
pub trait ClusterConnection: Send + Sync {
    /// Address of the member or endpoint this connection is bound to.
    fn address(&self) -> String;

    /// Whether this connection is an embedded member or an external client.
    fn mode(&self) -> ConnectionMode;

    /// Blocks until the platform is ready to accept workload, or the
    /// timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns a transport error when readiness cannot be established
    /// within `timeout`.
    fn await_ready(&self, timeout: Duration) -> HarnessResult<()>;
}

/// An always-ready connection for in-process runs and tests.
#[derive(Debug, Default)]
pub struct LoopbackConnection;

impl ClusterConnection for LoopbackConnection {
    fn address(&self) -> String {
        "loopback".to_string()
    }

    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Member
    }

    fn await_ready(&self, _timeout: Duration) -> HarnessResult<()> {
        Ok(())
    }
}

struct ContextShared {
    test_id: TestId,
    stopped: AtomicBool,
    connection: Arc<dyn ClusterConnection>,
}

/// Per-test-run handle shared by every thread working on one test.
///
/// Carries the test identity, the cluster connection, and the cooperative
/// stop flag. The flag is monotonic: once [`request_stop`] has been
/// called it stays set for the lifetime of the context. Workload loops
/// poll [`is_stopped`] at each iteration boundary; nothing in the harness
/// interrupts a thread that does not poll.
///
/// [`request_stop`]: TestContext::request_stop
/// [`is_stopped`]: TestContext::is_stopped
#[derive(Clone)]
pub struct TestContext {
    shared: Arc<ContextShared>,
}

impl TestContext {
    /// Creates a context for a fresh test run.
    #[must_use]
    pub fn new(test_id: TestId, connection: Arc<dyn ClusterConnection>) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                test_id,
                stopped: AtomicBool::new(false),
                connection,
            }),
        }
    }

    /// The unique identifier of this test run.
    #[must_use]
    pub fn test_id(&self) -> TestId {
        self.shared.test_id
    }

    /// The connection to the platform under test.
    #[must_use]
    pub fn connection(&self) -> &Arc<dyn ClusterConnection> {
        &self.shared.connection
    }

    /// True once a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Requests a cooperative stop. Idempotent; the flag is never cleared.
    pub fn request_stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("test_id", &self.shared.test_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TestContext {
        TestContext::new(TestId::new(), Arc::new(LoopbackConnection))
    }

    #[test]
    fn test_stop_flag_is_monotonic() {
        let ctx = context();
        assert!(!ctx.is_stopped());
        ctx.request_stop();
        assert!(ctx.is_stopped());
        ctx.request_stop();
        assert!(ctx.is_stopped());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let ctx = context();
        let other = ctx.clone();
        other.request_stop();
        assert!(ctx.is_stopped());
    }

    #[test]
    fn test_mode_tokens_round_trip() {
        assert_eq!("member".parse::<ConnectionMode>(), Ok(ConnectionMode::Member));
        assert_eq!("client".parse::<ConnectionMode>(), Ok(ConnectionMode::Client));
        assert!("server".parse::<ConnectionMode>().is_err());
        assert_eq!(ConnectionMode::Client.to_string(), "client");
    }

    #[test]
    fn test_loopback_is_ready_immediately() {
        let conn = LoopbackConnection;
        assert!(conn.await_ready(Duration::from_millis(1)).is_ok());
        assert_eq!(conn.mode(), ConnectionMode::Member);
    }
}
