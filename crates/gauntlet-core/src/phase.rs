use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a test instance.
///
/// Callers drive phases in [`TestPhase::ORDERED`] order during normal
/// operation: setup, warmups, the timed run, verifications, teardowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    /// One-time preparation; a failure here abandons the run.
    Setup,
    /// Per-thread warm-up before the global one.
    LocalWarmup,
    /// Whole-cluster warm-up, executed once per test instance.
    GlobalWarmup,
    /// The timed workload, fanned out across workload threads.
    Run,
    /// Whole-cluster verification, executed once per test instance.
    GlobalVerify,
    /// Per-thread verification.
    LocalVerify,
    /// Whole-cluster teardown, executed once per test instance.
    GlobalTeardown,
    /// Per-thread teardown; the final phase.
    LocalTeardown,
}

impl TestPhase {
    /// Canonical execution order.
    pub const ORDERED: [TestPhase; 8] = [
        TestPhase::Setup,
        TestPhase::LocalWarmup,
        TestPhase::GlobalWarmup,
        TestPhase::Run,
        TestPhase::GlobalVerify,
        TestPhase::LocalVerify,
        TestPhase::GlobalTeardown,
        TestPhase::LocalTeardown,
    ];

    /// Returns the canonical lowercase token used on the wire and in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::LocalWarmup => "local_warmup",
            Self::GlobalWarmup => "global_warmup",
            Self::Run => "run",
            Self::GlobalVerify => "global_verify",
            Self::LocalVerify => "local_verify",
            Self::GlobalTeardown => "global_teardown",
            Self::LocalTeardown => "local_teardown",
        }
    }

    /// True for phases executed once per test instance rather than once
    /// per workload thread.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(
            self,
            Self::Setup | Self::GlobalWarmup | Self::GlobalVerify | Self::GlobalTeardown
        )
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "setup" => Ok(Self::Setup),
            "local_warmup" => Ok(Self::LocalWarmup),
            "global_warmup" => Ok(Self::GlobalWarmup),
            "run" => Ok(Self::Run),
            "global_verify" => Ok(Self::GlobalVerify),
            "local_verify" => Ok(Self::LocalVerify),
            "global_teardown" => Ok(Self::GlobalTeardown),
            "local_teardown" => Ok(Self::LocalTeardown),
            other => Err(format!("unknown test phase: {other}")),
        }
    }
}
