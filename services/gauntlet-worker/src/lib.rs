//! Worker process of the Gauntlet harness.
//!
//! A worker holds one connection to the platform under test, executes
//! coordinator commands against locally created test containers, and
//! publishes a readiness file once it can be targeted.

pub mod config;
pub mod connection;
pub mod executor;
pub mod registry;
pub mod scenario;
pub mod transport;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use gauntlet_core::{ConnectionMode, HarnessResult, WorkerId};

/// Name of the readiness file written into the run directory.
pub const ADDRESS_FILE: &str = "worker.address";

/// The readiness signal a worker publishes once it accepts commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAddress {
    /// Identity of this worker process.
    pub worker_id: WorkerId,
    /// Mode the worker joined the platform in.
    pub mode: ConnectionMode,
    /// Address the command channel listens on.
    pub command_addr: String,
    /// Address a coordinator should advertise for this worker.
    pub public_address: String,
}

impl WorkerAddress {
    /// Writes the readiness file. Its existence is the external signal
    /// that this worker is up and targetable.
    ///
    /// # Errors
    ///
    /// Returns a transport or serialization error when the file cannot
    /// be written.
    pub fn publish(&self, dir: &Path) -> HarnessResult<()> {
        let payload = serde_json::to_vec_pretty(self)?;
        fs::write(dir.join(ADDRESS_FILE), payload)?;
        Ok(())
    }

    /// Reads a previously published readiness file.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the file is missing and a
    /// serialization error when it does not parse.
    pub fn read_from(dir: &Path) -> HarnessResult<Self> {
        let payload = fs::read_to_string(dir.join(ADDRESS_FILE))?;
        Ok(serde_json::from_str(&payload)?)
    }

    /// Removes the readiness file; missing files are fine.
    pub fn withdraw(dir: &Path) {
        let _ = fs::remove_file(dir.join(ADDRESS_FILE));
    }
}
