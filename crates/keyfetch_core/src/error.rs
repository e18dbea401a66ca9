//! Core error types for KEYFETCH.
//!
//! Only the engine boundary (dispatch, configuration) can fail. Operation
//! failures and cancellations are lifecycle events, never errors.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid encoding
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// Configuration value out of range
    InvalidConfig {
        /// Offending field
        field: String,
        /// Why the value is invalid
        reason: String,
    },

    /// Command queue has no free capacity
    QueueFull {
        /// Configured capacity
        capacity: usize,
    },

    /// Engine has shut down and accepts no more commands
    EngineClosed,

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding { reason } => write!(f, "Invalid encoding: {}", reason),
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid configuration for {}: {}", field, reason)
            }
            Self::QueueFull { capacity } => {
                write!(f, "Command queue full (capacity {})", capacity)
            }
            Self::EngineClosed => write!(f, "Engine closed"),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}
