//! Cluster connection implementations for the two worker modes.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use gauntlet_core::{ClusterConnection, ConnectionMode, HarnessResult, LoopbackConnection};

/// Client-mode connection that dials the platform over TCP.
///
/// Readiness means the endpoint accepts a connection; the scenario's own
/// client library owns everything beyond that.
pub struct RemoteConnection {
    endpoint: String,
    poll: Duration,
}

impl RemoteConnection {
    /// Creates a connection dialing `endpoint`, polling readiness every
    /// `poll`.
    pub fn new(endpoint: impl Into<String>, poll: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            poll,
        }
    }
}

impl ClusterConnection for RemoteConnection {
    fn address(&self) -> String {
        self.endpoint.clone()
    }

    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Client
    }

    fn await_ready(&self, timeout: Duration) -> HarnessResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match TcpStream::connect(&self.endpoint) {
                Ok(_) => {
                    info!(endpoint = %self.endpoint, "platform is ready");
                    return Ok(());
                }
                Err(error) => {
                    if Instant::now() >= deadline {
                        return Err(error.into());
                    }
                    debug!(endpoint = %self.endpoint, %error, "platform not ready yet");
                    thread::sleep(self.poll);
                }
            }
        }
    }
}

/// Builds the connection for a worker mode.
///
/// Member mode embeds the platform in-process and is always ready;
/// client mode dials `endpoint`.
#[must_use]
pub fn build_connection(
    mode: ConnectionMode,
    endpoint: &str,
    poll: Duration,
) -> Arc<dyn ClusterConnection> {
    match mode {
        ConnectionMode::Member => Arc::new(LoopbackConnection),
        ConnectionMode::Client => Arc::new(RemoteConnection::new(endpoint, poll)),
    }
}
