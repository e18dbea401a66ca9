//! Task supervisor.
//!
//! Holds at most one slot per data key and drives each slot through
//! `Admitted -> Running -> {Completed | Failed | Cancelled}`. All methods
//! run on the engine actor; only the operation call itself runs in a
//! spawned task, which reports back through a [`Settlement`].

use crate::monitor::EngineMonitor;
use crate::provider::OperationRegistry;
use crate::sink::NotificationSink;
use futures::FutureExt;
use indexmap::IndexMap;
use keyfetch_core::{CacheClear, DataKey, FetchRequest, LifecycleEvent, OperationError, TaskId};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Phase of a task slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Admitted, waiting for the start barrier
    Admitted,
    /// `LoadingStart` emitted; the call is in progress
    Running,
}

/// The in-flight task of one data key
#[derive(Debug)]
pub struct TaskSlot {
    /// Identity of this lifecycle
    pub task_id: TaskId,
    /// Request that was admitted
    pub request: FetchRequest,
    /// Current phase
    pub phase: SlotPhase,
    cancel: CancellationToken,
}

/// Outcome of a call, sent back to the actor by the call task
#[derive(Debug)]
pub struct Settlement {
    /// Key of the task
    pub key: DataKey,
    /// Task that produced the outcome
    pub task_id: TaskId,
    /// Value or failure returned by the operation
    pub outcome: Result<Value, OperationError>,
}

/// What happened to a slot that was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No slot existed for the key
    Idle,
    /// Slot had not started; removed without any event
    Aborted,
    /// Slot was running; `LoadingCancel` emitted
    Cancelled,
}

/// A panicking call settles as a failure carrying the panic message.
fn panicked(payload: &(dyn Any + Send)) -> OperationError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    OperationError::new(format!("operation panicked: {}", message))
}

/// Owner of all task slots
pub struct TaskSupervisor {
    slots: IndexMap<DataKey, TaskSlot>,
    registry: Arc<OperationRegistry>,
    settled: mpsc::UnboundedSender<Settlement>,
    monitor: Arc<EngineMonitor>,
}

impl TaskSupervisor {
    /// Create a supervisor
    #[must_use]
    pub fn new(
        registry: Arc<OperationRegistry>,
        settled: mpsc::UnboundedSender<Settlement>,
        monitor: Arc<EngineMonitor>,
    ) -> Self {
        Self {
            slots: IndexMap::new(),
            registry,
            settled,
            monitor,
        }
    }

    /// Open a slot for an admitted request
    ///
    /// The gate admits a key only after a clear, and a clear always empties
    /// the key's slot, so the key has no slot here. A leftover slot is
    /// cancelled first all the same.
    pub fn admit(&mut self, key: DataKey, request: FetchRequest, sink: &mut NotificationSink) -> TaskId {
        if self.slots.contains_key(&key) {
            self.cancel(&key, sink);
        }
        let task_id = TaskId::new();
        debug!(key = %key.short(), %task_id, "admitted");
        self.slots.insert(
            key,
            TaskSlot {
                task_id,
                request,
                phase: SlotPhase::Admitted,
                cancel: CancellationToken::new(),
            },
        );
        task_id
    }

    /// Whether any slot waits for the start barrier
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slots.values().any(|slot| slot.phase == SlotPhase::Admitted)
    }

    /// Start every pending slot, in admission order
    ///
    /// Must be called from within a tokio runtime.
    pub fn commit(&mut self, sink: &mut NotificationSink) -> usize {
        let mut started = 0;
        for (key, slot) in &mut self.slots {
            if slot.phase != SlotPhase::Admitted {
                continue;
            }
            slot.phase = SlotPhase::Running;
            self.monitor.record_started();
            started += 1;
            debug!(key = %key.short(), task_id = %slot.task_id, "started");
            sink.emit(LifecycleEvent::LoadingStart {
                arguments: slot.request.arguments.clone(),
                context: slot.request.context.clone(),
            });

            let call = self
                .registry
                .call(slot.request.provider.as_deref(), slot.request.arguments.clone());
            let cancel = slot.cancel.clone();
            let settled = self.settled.clone();
            let key = key.clone();
            let task_id = slot.task_id;
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    outcome = AssertUnwindSafe(call).catch_unwind() => {
                        outcome.unwrap_or_else(|panic| Err(panicked(&*panic)))
                    }
                };
                if settled.send(Settlement { key, task_id, outcome }).is_err() {
                    trace!(%task_id, "engine gone, settlement dropped");
                }
            });
        }
        started
    }

    /// Cancel whatever runs for a key
    pub fn cancel(&mut self, key: &DataKey, sink: &mut NotificationSink) -> CancelOutcome {
        let Some(slot) = self.slots.shift_remove(key) else {
            return CancelOutcome::Idle;
        };
        slot.cancel.cancel();
        match slot.phase {
            SlotPhase::Admitted => {
                self.monitor.record_aborted();
                debug!(key = %key.short(), task_id = %slot.task_id, "aborted before start");
                CancelOutcome::Aborted
            }
            SlotPhase::Running => {
                self.monitor.record_cancelled();
                debug!(key = %key.short(), task_id = %slot.task_id, "cancelled");
                sink.emit(LifecycleEvent::LoadingCancel {
                    arguments: slot.request.arguments,
                    context: slot.request.context,
                });
                CancelOutcome::Cancelled
            }
        }
    }

    /// Cancel every slot
    pub fn cancel_all(&mut self, sink: &mut NotificationSink) {
        let keys: Vec<DataKey> = self.slots.keys().cloned().collect();
        for key in keys {
            self.cancel(&key, sink);
        }
    }

    /// Apply a call outcome
    ///
    /// Outcomes of tasks that no longer own their key's slot are dropped.
    /// Returns whether the settlement was applied.
    pub fn settle(&mut self, settlement: Settlement, sink: &mut NotificationSink) -> bool {
        let current = self
            .slots
            .get(&settlement.key)
            .is_some_and(|slot| slot.task_id == settlement.task_id && slot.phase == SlotPhase::Running);
        if !current {
            debug!(key = %settlement.key.short(), task_id = %settlement.task_id, "stale settlement ignored");
            return false;
        }
        let Some(slot) = self.slots.shift_remove(&settlement.key) else {
            return false;
        };
        let request = slot.request;

        match settlement.outcome {
            Ok(result) => {
                self.monitor.record_completed();
                debug!(key = %settlement.key.short(), task_id = %slot.task_id, "completed");
                sink.emit(LifecycleEvent::Completed {
                    operation_type: request.operation_type.clone(),
                    result,
                    context: request.context.clone(),
                });
            }
            Err(error) => {
                self.monitor.record_failed();
                debug!(
                    key = %settlement.key.short(),
                    task_id = %slot.task_id,
                    error = %error,
                    "failed"
                );
                sink.emit(LifecycleEvent::Failed {
                    operation_type: request.operation_type.clone(),
                    error,
                    context: request.context.clone(),
                });
                sink.reinject_clear(CacheClear::from(&request));
            }
        }
        sink.emit(LifecycleEvent::LoadingEnd {
            arguments: request.arguments,
            context: request.context,
        });
        true
    }

    /// Slot for a key, if any
    #[must_use]
    pub fn slot(&self, key: &DataKey) -> Option<&TaskSlot> {
        self.slots.get(key)
    }

    /// Number of running slots
    #[must_use]
    pub fn running(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.phase == SlotPhase::Running)
            .count()
    }

    /// Whether no slot exists
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("slots", &self.slots.len())
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}
