//! Lifecycle events emitted for every started task.
//!
//! A started task always ends with exactly one terminal event:
//! `LoadingEnd` after a result or an error, or `LoadingCancel` when a newer
//! command superseded it.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Event type for task start
pub const LOADING_START: &str = "LOADING_START";
/// Event type for task end (after result or error)
pub const LOADING_END: &str = "LOADING_END";
/// Event type for task cancellation
pub const LOADING_CANCEL: &str = "LOADING_CANCEL";

/// Failure reported by an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OperationError {
    /// Create an error with a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Event kind - type of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Task started
    LoadingStart,
    /// Operation returned a value
    Completed,
    /// Operation failed
    Failed,
    /// Task ended after a result or an error
    LoadingEnd,
    /// Task cancelled while running
    LoadingCancel,
}

impl EventKind {
    /// Whether this kind closes a task lifecycle
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::LoadingEnd | Self::LoadingCancel)
    }

    /// Whether this kind reports an operation failure
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// A lifecycle notification
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Task started; the operation is about to be called
    LoadingStart {
        /// Arguments of the request
        arguments: Vec<Value>,
        /// Request context
        context: Value,
    },
    /// Operation returned a value
    Completed {
        /// Operation name, used as the event type
        operation_type: String,
        /// Returned value
        result: Value,
        /// Request context
        context: Value,
    },
    /// Operation failed
    Failed {
        /// Operation name, used as the event type
        operation_type: String,
        /// Reported failure
        error: OperationError,
        /// Request context
        context: Value,
    },
    /// Task finished after a result or an error
    LoadingEnd {
        /// Arguments of the request
        arguments: Vec<Value>,
        /// Request context
        context: Value,
    },
    /// Task was superseded while running
    LoadingCancel {
        /// Arguments of the request
        arguments: Vec<Value>,
        /// Request context
        context: Value,
    },
}

impl LifecycleEvent {
    /// Kind of this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::LoadingStart { .. } => EventKind::LoadingStart,
            Self::Completed { .. } => EventKind::Completed,
            Self::Failed { .. } => EventKind::Failed,
            Self::LoadingEnd { .. } => EventKind::LoadingEnd,
            Self::LoadingCancel { .. } => EventKind::LoadingCancel,
        }
    }

    /// The `type` field of the serialized event
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::LoadingStart { .. } => LOADING_START,
            Self::Completed { operation_type, .. } | Self::Failed { operation_type, .. } => {
                operation_type
            }
            Self::LoadingEnd { .. } => LOADING_END,
            Self::LoadingCancel { .. } => LOADING_CANCEL,
        }
    }

    /// Context of the request that produced this event
    #[must_use]
    pub fn context(&self) -> &Value {
        match self {
            Self::LoadingStart { context, .. }
            | Self::Completed { context, .. }
            | Self::Failed { context, .. }
            | Self::LoadingEnd { context, .. }
            | Self::LoadingCancel { context, .. } => context,
        }
    }

    /// Whether this event closes a task lifecycle
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Whether this event reports a failure
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.kind().is_error()
    }

    /// Serialize into the `{type, payload, error?, context}` shape
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for LifecycleEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let errored = self.is_error();
        let mut map = serializer.serialize_map(Some(if errored { 4 } else { 3 }))?;
        map.serialize_entry("type", self.type_name())?;
        match self {
            Self::LoadingStart { arguments, .. }
            | Self::LoadingEnd { arguments, .. }
            | Self::LoadingCancel { arguments, .. } => map.serialize_entry("payload", arguments)?,
            Self::Completed { result, .. } => map.serialize_entry("payload", result)?,
            Self::Failed { error, .. } => map.serialize_entry("payload", error)?,
        }
        if errored {
            map.serialize_entry("error", &true)?;
        }
        map.serialize_entry("context", self.context())?;
        map.end()
    }
}
