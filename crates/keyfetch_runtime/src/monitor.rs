//! Engine monitor.
//!
//! Lock-free counters shared between the engine actor and its handles.

use keyfetch_core::Origin;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    /// Commands received from callers
    pub commands_received: u64,
    /// Commands re-injected by the engine
    pub commands_synthesized: u64,
    /// Commands of kinds the engine does not handle
    pub commands_ignored: u64,
    /// Fetches admitted by the gate
    pub admitted: u64,
    /// Fetches suppressed because the key was satisfied
    pub suppressed: u64,
    /// Tasks that emitted `LoadingStart`
    pub started: u64,
    /// Tasks whose operation returned a value
    pub completed: u64,
    /// Tasks whose operation failed
    pub failed: u64,
    /// Running tasks cancelled by a clear or shutdown
    pub cancelled: u64,
    /// Admitted tasks cleared before they started
    pub aborted_before_start: u64,
    /// Tasks started and not yet ended
    pub in_flight: u64,
}

impl EngineMetrics {
    /// Tasks that reached a terminal event
    #[must_use]
    pub const fn ended(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// Share of ended tasks that completed (1.0 when none ended)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let ended = self.ended();
        if ended == 0 {
            return 1.0;
        }
        self.completed as f64 / ended as f64
    }
}

/// Shared engine counters
#[derive(Debug, Default)]
pub struct EngineMonitor {
    commands_received: AtomicU64,
    commands_synthesized: AtomicU64,
    commands_ignored: AtomicU64,
    admitted: AtomicU64,
    suppressed: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    aborted_before_start: AtomicU64,
}

impl EngineMonitor {
    /// Create a monitor with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incoming command
    pub fn record_command(&self, origin: Origin) {
        match origin {
            Origin::External => bump(&self.commands_received),
            Origin::Synthesized => bump(&self.commands_synthesized),
        }
    }

    /// Record a command of an unhandled kind
    pub fn record_ignored(&self) {
        bump(&self.commands_ignored);
    }

    /// Record an admission
    pub fn record_admitted(&self) {
        bump(&self.admitted);
    }

    /// Record a suppression
    pub fn record_suppressed(&self) {
        bump(&self.suppressed);
    }

    /// Record a task start
    pub fn record_started(&self) {
        bump(&self.started);
    }

    /// Record a completion
    pub fn record_completed(&self) {
        bump(&self.completed);
    }

    /// Record a failure
    pub fn record_failed(&self) {
        bump(&self.failed);
    }

    /// Record a cancellation of a running task
    pub fn record_cancelled(&self) {
        bump(&self.cancelled);
    }

    /// Record a silent pre-start abort
    pub fn record_aborted(&self) {
        bump(&self.aborted_before_start);
    }

    /// Take a snapshot
    #[must_use]
    pub fn snapshot(&self) -> EngineMetrics {
        let mut metrics = EngineMetrics {
            commands_received: load(&self.commands_received),
            commands_synthesized: load(&self.commands_synthesized),
            commands_ignored: load(&self.commands_ignored),
            admitted: load(&self.admitted),
            suppressed: load(&self.suppressed),
            started: load(&self.started),
            completed: load(&self.completed),
            failed: load(&self.failed),
            cancelled: load(&self.cancelled),
            aborted_before_start: load(&self.aborted_before_start),
            in_flight: 0,
        };
        metrics.in_flight = metrics.started.saturating_sub(metrics.ended());
        metrics
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
