//! KEYFETCH Runtime
//!
//! Keyed fetch engine: at most one call in flight per data key, redundant
//! requests suppressed or superseded by policy, and a fixed lifecycle of
//! notifications for every started task.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod gate;
pub mod monitor;
pub mod provider;
pub mod router;
pub mod sink;
pub mod supervisor;

pub use engine::{EngineConfig, EngineHandle, FetchEngine};
pub use gate::{DedupGate, GateDecision, SatisfactionTable};
pub use monitor::{EngineMetrics, EngineMonitor};
pub use provider::{CallFuture, FnOperation, Operation, OperationRegistry, RegistryError, operation_fn};
pub use router::{Envelope, RoutedCommand, RoutedOp, route};
pub use sink::{ChannelSink, EventSink, NotificationSink};
pub use supervisor::{CancelOutcome, Settlement, SlotPhase, TaskSlot, TaskSupervisor};
