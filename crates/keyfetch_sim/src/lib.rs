//! KEYFETCH Simulation
//!
//! Mock operations with call probes, an in-memory recording sink, and
//! scripted scenarios that replay timed commands against a real engine.
//! Run under a paused tokio clock for fully reproducible timings.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod harness;
pub mod mock;
pub mod recorder;

pub use harness::{MockProvider, Scenario, ScenarioConfig, ScenarioError, ScenarioResult, ScenarioStep};
pub use mock::{
    EchoOperation, FailFirstOperation, OperationProbe, PendingOperation, ProbeGuard, ProbeStats,
    TEST_TIMEOUT, THROW_ARGUMENT,
};
pub use recorder::{EventRecorder, RecordedEvent};
