//! Worker configuration.
//!
//! Sources in order of precedence: environment variables, a file named
//! by `GAUNTLET_CONFIG`, `./config/gauntlet`, `/etc/gauntlet/gauntlet`,
//! hardcoded defaults.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use gauntlet_core::ConnectionMode;

/// Root configuration of the worker process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WorkerConfig {
    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub command: CommandSection,

    #[serde(default)]
    pub faults: FaultSection,

    #[serde(default)]
    pub platform: PlatformSection,

    #[serde(default)]
    pub run: RunSection,
}

impl WorkerConfig {
    /// Loads configuration from files and the environment.
    ///
    /// Environment overrides use the `GAUNTLET` prefix with `__` as the
    /// section separator, e.g. `GAUNTLET_COMMAND__LISTEN_ADDR`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("GAUNTLET_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/gauntlet").required(false))
            .add_source(File::with_name("/etc/gauntlet/gauntlet").required(false));

        builder = builder.add_source(
            Environment::with_prefix("GAUNTLET")
                .separator("__")
                .try_parsing(true),
        );

        let config: WorkerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("worker.mode", "member")?
            .set_default("worker.public_address", "127.0.0.1")?
            .set_default("command.listen_addr", "127.0.0.1:9010")?
            .set_default("faults.dir", "faults")?
            .set_default("platform.endpoint", "127.0.0.1:5701")?
            .set_default("platform.ready_timeout_secs", 300)?
            .set_default("platform.ready_poll_ms", 500)?
            .set_default("run.default_thread_count", 10)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.mode.parse::<ConnectionMode>().is_err() {
            return Err(ConfigError::Message(format!(
                "worker.mode must be 'member' or 'client', got '{}'",
                self.worker.mode
            )));
        }

        if self.command.listen_addr.is_empty() {
            return Err(ConfigError::Message(
                "command.listen_addr must not be empty".to_string(),
            ));
        }

        if self.platform.endpoint.is_empty() {
            return Err(ConfigError::Message(
                "platform.endpoint must not be empty".to_string(),
            ));
        }

        if self.platform.ready_poll_ms == 0 {
            return Err(ConfigError::Message(
                "platform.ready_poll_ms must be > 0".to_string(),
            ));
        }

        if self.run.default_thread_count == 0 {
            return Err(ConfigError::Message(
                "run.default_thread_count must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The parsed worker mode. Only valid after [`validate`](Self::validate).
    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        self.worker
            .mode
            .parse()
            .unwrap_or(ConnectionMode::Member)
    }
}

/// Identity of this worker in the fleet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSection {
    /// `member` or `client`.
    pub mode: String,

    /// Address a coordinator should advertise for this worker.
    pub public_address: String,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            mode: "member".to_string(),
            public_address: "127.0.0.1".to_string(),
        }
    }
}

/// Command channel listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandSection {
    /// Address the command socket binds to.
    pub listen_addr: String,
}

impl Default for CommandSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9010".to_string(),
        }
    }
}

/// Fault sink destination.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FaultSection {
    /// Directory fault records are written into.
    pub dir: String,
}

impl Default for FaultSection {
    fn default() -> Self {
        Self {
            dir: "faults".to_string(),
        }
    }
}

/// Connection to the platform under test.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformSection {
    /// Endpoint a client-mode worker dials.
    pub endpoint: String,

    /// How long to wait for platform readiness at startup.
    pub ready_timeout_secs: u64,

    /// Poll interval of the readiness check.
    pub ready_poll_ms: u64,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5701".to_string(),
            ready_timeout_secs: 300,
            ready_poll_ms: 500,
        }
    }
}

/// Workload execution defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunSection {
    /// Thread count used when a create-test command does not specify
    /// one.
    pub default_thread_count: usize,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            default_thread_count: 10,
        }
    }
}
