use gauntlet_probes::ProbeError;
use thiserror::Error;

/// Convenience alias used across the harness crates.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Failure taxonomy of the harness.
///
/// `Setup` is the only variant that abandons a run; everything else is
/// either rejected before execution (`Configuration`), recorded and
/// survived (`Workload`, `Command`), or retried at the transport layer
/// (`Transport`).
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid selector, scenario, or worker configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Fatal failure inside the setup phase; the run is abandoned.
    #[error("setup failed: {message}")]
    Setup { message: String },

    /// Failure inside a per-thread workload hook.
    #[error("workload failure: {message}")]
    Workload { message: String },

    /// Probe bracket misuse inside a workload loop.
    #[error("probe usage error: {0}")]
    ProbeUsage(#[from] ProbeError),

    /// A command was received and understood but could not be executed.
    #[error("command failed: {message}")]
    Command { message: String },

    /// Socket or file I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Wire frame or persisted record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarnessError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a fatal setup error.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    /// Creates a per-thread workload error.
    pub fn workload(message: impl Into<String>) -> Self {
        Self::Workload {
            message: message.into(),
        }
    }

    /// Creates a command execution error.
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// True when the failure abandons the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Setup { .. })
    }
}
