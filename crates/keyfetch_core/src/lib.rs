//! KEYFETCH Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Data keys are derived with a canonical, type-distinguishing encoding so
//! that equal requests always collide and distinct requests never do.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod error;
pub mod event;
pub mod hash;
pub mod id;
pub mod key;

// Re-exports
pub use command::{CacheClear, Command, FetchPolicy, FetchRequest, Origin};
pub use error::{CoreError, CoreResult};
pub use event::{EventKind, LifecycleEvent, OperationError};
pub use hash::Digest;
pub use id::TaskId;
pub use key::{DataKey, derive_key};
