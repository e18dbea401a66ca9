//! The fetch engine actor and its handle.
//!
//! A single actor task owns the gate and the supervisor. Admitted slots
//! start only when the batch barrier fires: one scheduling step after the
//! first admission of a batch, plus the configured grace window. The
//! barrier is armed once per batch and runs in its own task, so a steady
//! stream of commands cannot hold it back. Commands already queued when it
//! fires are applied first, which is why a clear dispatched right after a
//! fetch aborts it before it ever starts.
//!
//! The select loop prefers bounded sources over callers: shutdown, the
//! barrier, call settlements, re-injected commands, then caller commands.

use crate::gate::{DedupGate, GateDecision};
use crate::monitor::{EngineMetrics, EngineMonitor};
use crate::provider::OperationRegistry;
use crate::router::{Envelope, RoutedCommand, route};
use crate::sink::{EventSink, NotificationSink};
use crate::supervisor::{Settlement, TaskSupervisor};
use keyfetch_core::{CacheClear, Command, CoreError, CoreResult, FetchRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound of the caller command queue
    pub command_capacity: usize,
    /// Bound of the synthetic command queue
    pub reinjection_capacity: usize,
    /// Extra wait before admitted slots start, in milliseconds
    pub start_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            reinjection_capacity: 64,
            start_grace_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Set the caller queue bound
    #[must_use]
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    /// Set the synthetic queue bound
    #[must_use]
    pub fn with_reinjection_capacity(mut self, capacity: usize) -> Self {
        self.reinjection_capacity = capacity;
        self
    }

    /// Set the start grace window
    #[must_use]
    pub fn with_start_grace_ms(mut self, grace_ms: u64) -> Self {
        self.start_grace_ms = grace_ms;
        self
    }

    /// Start grace window as a duration
    #[must_use]
    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a queue bound is zero
    pub fn validate(&self) -> CoreResult<()> {
        if self.command_capacity == 0 {
            return Err(CoreError::InvalidConfig {
                field: "command_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.reinjection_capacity == 0 {
            return Err(CoreError::InvalidConfig {
                field: "reinjection_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Entry point for starting engines
#[derive(Debug)]
pub struct FetchEngine;

impl FetchEngine {
    /// Spawn an engine on the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or no runtime is running
    pub fn spawn(
        config: EngineConfig,
        registry: OperationRegistry,
        sink: impl EventSink,
    ) -> CoreResult<EngineHandle> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| CoreError::Internal {
            message: format!("no tokio runtime: {}", err),
        })?;

        let (commands_tx, commands) = mpsc::channel(config.command_capacity);
        let (reinject_tx, reinjected) = mpsc::channel(config.reinjection_capacity);
        let (settled_tx, settled) = mpsc::unbounded_channel();
        let monitor = Arc::new(EngineMonitor::new());
        let shutdown = CancellationToken::new();
        let exited = CancellationToken::new();

        let actor = EngineActor {
            grace: config.start_grace(),
            gate: DedupGate::new(),
            supervisor: TaskSupervisor::new(Arc::new(registry), settled_tx, Arc::clone(&monitor)),
            sink: NotificationSink::new(Box::new(sink), reinject_tx),
            monitor: Arc::clone(&monitor),
            commands,
            reinjected,
            settled,
            shutdown: shutdown.clone(),
            barrier: Arc::new(Notify::new()),
            barrier_armed: false,
        };
        let exit_guard = exited.clone().drop_guard();
        runtime.spawn(async move {
            let _exit_guard = exit_guard;
            actor.run().await;
        });

        Ok(EngineHandle {
            commands: commands_tx,
            capacity: config.command_capacity,
            monitor,
            shutdown,
            exited,
        })
    }
}

/// Cloneable handle to a running engine
///
/// The engine keeps running while any handle exists. Once every handle is
/// dropped it lets running tasks finish and then stops.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Envelope>,
    capacity: usize,
    monitor: Arc<EngineMonitor>,
    shutdown: CancellationToken,
    exited: CancellationToken,
}

impl EngineHandle {
    /// Dispatch a command without waiting
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the command queue is full and
    /// `EngineClosed` after shutdown
    pub fn dispatch(&self, command: impl Into<Command>) -> CoreResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::EngineClosed);
        }
        self.commands
            .try_send(Envelope::external(command))
            .map_err(|err| match err {
                TrySendError::Full(_) => CoreError::QueueFull {
                    capacity: self.capacity,
                },
                TrySendError::Closed(_) => CoreError::EngineClosed,
            })
    }

    /// Dispatch a command, waiting for queue capacity
    ///
    /// # Errors
    ///
    /// Returns `EngineClosed` after shutdown
    pub async fn dispatch_wait(&self, command: impl Into<Command>) -> CoreResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::EngineClosed);
        }
        self.commands
            .send(Envelope::external(command))
            .await
            .map_err(|_| CoreError::EngineClosed)
    }

    /// Dispatch a fetch request
    ///
    /// # Errors
    ///
    /// See [`EngineHandle::dispatch`]
    pub fn fetch(&self, request: FetchRequest) -> CoreResult<()> {
        self.dispatch(request)
    }

    /// Dispatch a cache clear
    ///
    /// # Errors
    ///
    /// See [`EngineHandle::dispatch`]
    pub fn clear(&self, clear: CacheClear) -> CoreResult<()> {
        self.dispatch(clear)
    }

    /// Snapshot of the engine counters
    #[must_use]
    pub fn metrics(&self) -> EngineMetrics {
        self.monitor.snapshot()
    }

    /// Whether the engine has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Cancel every task and wait for the engine to stop
    ///
    /// Running tasks end with `LoadingCancel`; tasks that have not started
    /// are dropped silently. Queued commands are discarded.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.exited.cancelled().await;
    }

    /// Wait until the engine stops on its own
    pub async fn closed(&self) {
        self.exited.cancelled().await;
    }
}

struct EngineActor {
    grace: Duration,
    gate: DedupGate,
    supervisor: TaskSupervisor,
    sink: NotificationSink,
    monitor: Arc<EngineMonitor>,
    commands: mpsc::Receiver<Envelope>,
    reinjected: mpsc::Receiver<Envelope>,
    settled: mpsc::UnboundedReceiver<Settlement>,
    shutdown: CancellationToken,
    barrier: Arc<Notify>,
    barrier_armed: bool,
}

impl EngineActor {
    async fn run(mut self) {
        debug!("engine started");
        let mut callers_open = true;
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = self.barrier.notified(), if self.barrier_armed => self.commit(),
                Some(settlement) = self.settled.recv() => {
                    self.supervisor.settle(settlement, &mut self.sink);
                }
                Some(envelope) = self.reinjected.recv() => self.handle(envelope),
                next = self.commands.recv(), if callers_open => match next {
                    Some(envelope) => self.handle(envelope),
                    None => {
                        debug!("all handles dropped, draining");
                        callers_open = false;
                    }
                },
            }

            if !callers_open && self.supervisor.is_idle() {
                break;
            }
        }

        self.supervisor.cancel_all(&mut self.sink);
        debug!(metrics = ?self.monitor.snapshot(), "engine stopped");
    }

    fn handle(&mut self, envelope: Envelope) {
        let origin = envelope.origin;
        self.monitor.record_command(origin);
        let kind = envelope.command.kind_name();
        let routed = route(envelope);
        if routed.is_empty() {
            self.monitor.record_ignored();
            trace!(kind, origin = origin.as_str(), "ignored");
            return;
        }
        for command in routed {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: RoutedCommand) {
        let key = command.key.clone();
        trace!(key = %key.short(), origin = command.origin.as_str(), clear = command.is_clear(), "routed");
        match self.gate.apply(command) {
            GateDecision::Cleared { .. } => {
                self.supervisor.cancel(&key, &mut self.sink);
            }
            GateDecision::Suppressed => {
                self.monitor.record_suppressed();
                debug!(key = %key.short(), "suppressed");
            }
            GateDecision::Admitted(request) => {
                self.monitor.record_admitted();
                self.supervisor.admit(key, request, &mut self.sink);
                self.arm_barrier();
            }
        }
    }

    fn arm_barrier(&mut self) {
        if self.barrier_armed {
            return;
        }
        self.barrier_armed = true;
        let barrier = Arc::clone(&self.barrier);
        let deadline = Instant::now() + self.grace;
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if deadline > Instant::now() {
                tokio::time::sleep_until(deadline).await;
            }
            barrier.notify_one();
        });
    }

    fn commit(&mut self) {
        // Only what was queued when the barrier fired belongs to this batch.
        for _ in 0..self.commands.len() {
            let Ok(envelope) = self.commands.try_recv() else { break };
            self.handle(envelope);
        }
        for _ in 0..self.reinjected.len() {
            let Ok(envelope) = self.reinjected.try_recv() else { break };
            self.handle(envelope);
        }
        let started = self.supervisor.commit(&mut self.sink);
        trace!(started, "committed");
        self.barrier_armed = false;
    }
}
