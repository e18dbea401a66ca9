//! Commands accepted by the engine.
//!
//! Only `FetchRequest` and `CacheClear` reach the core. Any other kind that
//! arrives on the wire deserializes to [`Command::Other`] and is ignored.

use crate::error::CoreResult;
use crate::key::{DataKey, derive_key};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a fetch treats an already satisfied key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Skip when the key is already satisfied; fetch again only after a
    /// failure cleared it
    PreferCache,
    /// Always cancel whatever runs for the key and start over
    Refetch,
}

impl FetchPolicy {
    /// Map a boolean `cache` flag onto a policy
    ///
    /// `true` means prefer the cache. Older prose described the flag the
    /// other way round; the observed behavior is what this follows.
    #[must_use]
    pub const fn from_cache_flag(cache: bool) -> Self {
        if cache { Self::PreferCache } else { Self::Refetch }
    }

    /// Whether this policy expands into clear-then-fetch
    #[must_use]
    pub const fn is_refetch(self) -> bool {
        matches!(self, Self::Refetch)
    }
}

impl Default for FetchPolicy {
    /// An absent flag is falsy, so the default is [`FetchPolicy::Refetch`]
    fn default() -> Self {
        Self::Refetch
    }
}

/// Request to run an operation for a data key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Logical resource/operation name; also the type of the result event
    pub operation_type: String,
    /// Ordered arguments passed to the operation
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Dedup policy
    #[serde(default)]
    pub policy: FetchPolicy,
    /// Opaque payload attached to every event this request produces
    #[serde(default)]
    pub context: Value,
    /// Registered provider to call; the default provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl FetchRequest {
    /// Create a request with the default policy and a null context
    #[must_use]
    pub fn new(operation_type: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            operation_type: operation_type.into(),
            arguments,
            policy: FetchPolicy::default(),
            context: Value::Null,
            provider: None,
        }
    }

    /// Set the policy
    #[must_use]
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the pass-through context
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Route the call to a named provider
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Data key of this request
    #[must_use]
    pub fn key(&self) -> DataKey {
        derive_key(&self.operation_type, &self.arguments)
    }
}

/// Request to forget that a key is satisfied and cancel its task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheClear {
    /// Operation name of the key to clear
    pub operation_type: String,
    /// Arguments of the key to clear
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Opaque payload, carried for observability
    #[serde(default)]
    pub context: Value,
}

impl CacheClear {
    /// Create a clear for an operation and arguments
    #[must_use]
    pub fn new(operation_type: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            operation_type: operation_type.into(),
            arguments,
            context: Value::Null,
        }
    }

    /// Set the context
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Data key this clear targets
    #[must_use]
    pub fn key(&self) -> DataKey {
        derive_key(&self.operation_type, &self.arguments)
    }
}

impl From<&FetchRequest> for CacheClear {
    fn from(request: &FetchRequest) -> Self {
        Self {
            operation_type: request.operation_type.clone(),
            arguments: request.arguments.clone(),
            context: request.context.clone(),
        }
    }
}

/// A command as it arrives from the command bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Run an operation
    FetchRequest(FetchRequest),
    /// Invalidate a key
    CacheClear(CacheClear),
    /// Any kind the engine does not handle
    #[serde(other)]
    Other,
}

impl Command {
    /// Decode a command from JSON text
    ///
    /// # Errors
    ///
    /// Returns `InvalidEncoding` for malformed text or a known kind with
    /// invalid fields
    pub fn from_json(text: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Data key targeted by the command, if it is one the engine handles
    #[must_use]
    pub fn key(&self) -> Option<DataKey> {
        match self {
            Self::FetchRequest(request) => Some(request.key()),
            Self::CacheClear(clear) => Some(clear.key()),
            Self::Other => None,
        }
    }

    /// Short name of the command kind, for logs
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::FetchRequest(_) => "fetch_request",
            Self::CacheClear(_) => "cache_clear",
            Self::Other => "other",
        }
    }
}

impl From<FetchRequest> for Command {
    fn from(request: FetchRequest) -> Self {
        Self::FetchRequest(request)
    }
}

impl From<CacheClear> for Command {
    fn from(clear: CacheClear) -> Self {
        Self::CacheClear(clear)
    }
}

/// Where a command came from
///
/// Synthesized commands behave exactly like external ones; the origin only
/// shows up in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Dispatched by a caller
    External,
    /// Produced by the engine itself
    Synthesized,
}

impl Origin {
    /// Name for log fields
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Synthesized => "synthesized",
        }
    }
}
