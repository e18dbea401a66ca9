//! Mock operations.
//!
//! Each mock reports to an [`OperationProbe`]: how many calls were made,
//! how many finished, how many were torn down before finishing, and the
//! highest number of calls ever active at once for one key.

use async_trait::async_trait;
use keyfetch_core::{DataKey, OperationError, derive_key};
use keyfetch_runtime::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default latency of the mock operations
pub const TEST_TIMEOUT: Duration = Duration::from_millis(20);

/// Single argument that makes [`EchoOperation`] fail
pub const THROW_ARGUMENT: &str = "please throw";

/// Counters collected by a probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeStats {
    /// Calls entered
    pub calls: u64,
    /// Calls that ran to completion
    pub completions: u64,
    /// Calls dropped before completion
    pub teardowns: u64,
    /// Calls active right now
    pub active: u64,
    /// Highest number of simultaneous calls seen for any single key
    pub max_per_key: u64,
}

#[derive(Debug, Default)]
struct ProbeState {
    stats: ProbeStats,
    active: HashMap<DataKey, u64>,
}

/// Shared call counters for mock operations
#[derive(Debug, Default)]
pub struct OperationProbe {
    state: Mutex<ProbeState>,
}

impl OperationProbe {
    /// Create a probe
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a call for a key; the guard ends it
    #[must_use]
    pub fn enter(self: &Arc<Self>, key: DataKey) -> ProbeGuard {
        let mut state = self.lock();
        state.stats.calls += 1;
        state.stats.active += 1;
        let count = state.active.entry(key.clone()).or_default();
        *count += 1;
        let count = *count;
        state.stats.max_per_key = state.stats.max_per_key.max(count);
        drop(state);

        ProbeGuard {
            probe: Arc::clone(self),
            key,
            finished: false,
        }
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> ProbeStats {
        self.lock().stats
    }

    fn leave(&self, key: &DataKey, finished: bool) {
        let mut state = self.lock();
        state.stats.active = state.stats.active.saturating_sub(1);
        if finished {
            state.stats.completions += 1;
        } else {
            state.stats.teardowns += 1;
        }
        if let Some(count) = state.active.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.active.remove(key);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks one active call; dropping it unfinished counts a teardown
#[derive(Debug)]
pub struct ProbeGuard {
    probe: Arc<OperationProbe>,
    key: DataKey,
    finished: bool,
}

impl ProbeGuard {
    /// Mark the call as having run to completion
    pub fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.probe.leave(&self.key, self.finished);
    }
}

fn remote_error(arguments: &[Value]) -> OperationError {
    OperationError::new("remote error").with_data(json!(arguments))
}

fn api_result(arguments: Vec<Value>) -> Value {
    json!({ "apiResult": arguments })
}

/// Returns `{apiResult: arguments}` after a delay
///
/// Fails with `remote error` when called with the single argument
/// [`THROW_ARGUMENT`].
#[derive(Debug, Clone)]
pub struct EchoOperation {
    delay: Duration,
    scope: String,
    probe: Arc<OperationProbe>,
}

impl EchoOperation {
    /// Create an echo with [`TEST_TIMEOUT`] latency and its own probe
    #[must_use]
    pub fn new() -> Self {
        Self {
            delay: TEST_TIMEOUT,
            scope: String::new(),
            probe: OperationProbe::new(),
        }
    }

    /// Set the latency
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Name used to key probe counters, normally the operation type served
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Report to a shared probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<OperationProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// The probe this operation reports to
    #[must_use]
    pub fn probe(&self) -> Arc<OperationProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for EchoOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for EchoOperation {
    async fn call(&self, arguments: Vec<Value>) -> Result<Value, OperationError> {
        let mut guard = self.probe.enter(derive_key(&self.scope, &arguments));
        tokio::time::sleep(self.delay).await;
        guard.finish();

        if arguments.len() == 1 && arguments[0] == THROW_ARGUMENT {
            Err(remote_error(&arguments))
        } else {
            Ok(api_result(arguments))
        }
    }
}

/// Fails its first call and echoes every later one
#[derive(Debug)]
pub struct FailFirstOperation {
    delay: Duration,
    scope: String,
    probe: Arc<OperationProbe>,
    settled: AtomicU64,
}

impl FailFirstOperation {
    /// Create with [`TEST_TIMEOUT`] latency and its own probe
    #[must_use]
    pub fn new() -> Self {
        Self {
            delay: TEST_TIMEOUT,
            scope: String::new(),
            probe: OperationProbe::new(),
            settled: AtomicU64::new(0),
        }
    }

    /// Set the latency
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Name used to key probe counters
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Report to a shared probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<OperationProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// The probe this operation reports to
    #[must_use]
    pub fn probe(&self) -> Arc<OperationProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for FailFirstOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for FailFirstOperation {
    async fn call(&self, arguments: Vec<Value>) -> Result<Value, OperationError> {
        let mut guard = self.probe.enter(derive_key(&self.scope, &arguments));
        tokio::time::sleep(self.delay).await;
        guard.finish();

        // Counted at settle time, so a torn-down first call does not use up the failure.
        if self.settled.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(remote_error(&arguments))
        } else {
            Ok(api_result(arguments))
        }
    }
}

/// Never resolves; only teardown ends its calls
#[derive(Debug, Clone)]
pub struct PendingOperation {
    scope: String,
    probe: Arc<OperationProbe>,
}

impl PendingOperation {
    /// Create with its own probe
    #[must_use]
    pub fn new() -> Self {
        Self {
            scope: String::new(),
            probe: OperationProbe::new(),
        }
    }

    /// Name used to key probe counters
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Report to a shared probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<OperationProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// The probe this operation reports to
    #[must_use]
    pub fn probe(&self) -> Arc<OperationProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for PendingOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for PendingOperation {
    async fn call(&self, arguments: Vec<Value>) -> Result<Value, OperationError> {
        let _guard = self.probe.enter(derive_key(&self.scope, &arguments));
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}
