//! Core lifecycle engine of the Gauntlet load-test harness.
//!
//! A test scenario implements [`LoadTest`]; a [`TestContainer`] drives it
//! through the [`TestPhase`] lifecycle, fanning per-thread phases across a
//! [`ThreadSpawner`], bracketing each workload iteration with a probe, and
//! recording every failure in a [`FaultSink`]. [`TestRunner`] wires the
//! whole sequence together for single-process use.

pub mod clock;
pub mod container;
pub mod context;
pub mod error;
pub mod faults;
pub mod ids;
pub mod phase;
pub mod runner;
pub mod selector;
pub mod spawner;

pub use gauntlet_probes::Probe;

pub use clock::StopClock;
pub use container::TestContainer;
pub use context::{ClusterConnection, ConnectionMode, LoopbackConnection, TestContext};
pub use error::{HarnessError, HarnessResult};
pub use faults::FaultSink;
pub use ids::{TestId, WorkerId};
pub use phase::TestPhase;
pub use runner::{RunSummary, TestRunner};
pub use selector::{OperationSelector, OperationSelectorBuilder};
pub use spawner::ThreadSpawner;
pub use test::{LoadTest, Workload};
