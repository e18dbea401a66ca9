//! Recording event sink.

use keyfetch_core::{EventKind, LifecycleEvent};
use keyfetch_runtime::EventSink;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// An event with the time it was emitted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    /// Milliseconds since the recorder was created
    pub at_ms: u64,
    /// The event
    pub event: LifecycleEvent,
}

/// Sink that keeps every event in memory
///
/// Clones share the same log, so one clone can go to the engine while the
/// test keeps another.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    log: Arc<Mutex<Vec<RecordedEvent>>>,
    origin: Instant,
}

impl EventRecorder {
    /// Create an empty recorder; timestamps count from now
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            origin: Instant::now(),
        }
    }

    /// Recorded events with timestamps
    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    /// Recorded events
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.lock().iter().map(|r| r.event.clone()).collect()
    }

    /// Event kinds, in order
    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.lock().iter().map(|r| r.event.kind()).collect()
    }

    /// Serialized `type` fields, in order
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|r| r.event.type_name().to_string())
            .collect()
    }

    /// `(type, context[field])` pairs, in order
    #[must_use]
    pub fn types_with(&self, field: &str) -> Vec<(String, Value)> {
        self.lock()
            .iter()
            .map(|r| {
                (
                    r.event.type_name().to_string(),
                    r.event.context().get(field).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    /// Events whose `type` equals `type_name`
    #[must_use]
    pub fn of_type(&self, type_name: &str) -> Vec<LifecycleEvent> {
        self.lock()
            .iter()
            .filter(|r| r.event.type_name() == type_name)
            .map(|r| r.event.clone())
            .collect()
    }

    /// Serialized events
    #[must_use]
    pub fn to_json(&self) -> Vec<Value> {
        self.lock().iter().map(|r| r.event.to_json()).collect()
    }

    /// Number of events
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget recorded events
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedEvent>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventRecorder {
    fn emit(&mut self, event: LifecycleEvent) {
        let at_ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.lock().push(RecordedEvent { at_ms, event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn end(test: i64) -> LifecycleEvent {
        LifecycleEvent::LoadingEnd {
            arguments: vec![json!("bar")],
            context: json!({ "test": test }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorder_timestamps() {
        let recorder = EventRecorder::new();
        let mut sink = recorder.clone();

        sink.emit(end(1));
        tokio::time::sleep(Duration::from_millis(30)).await;
        sink.emit(end(2));

        let recorded = recorder.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].at_ms, 0);
        assert_eq!(recorded[1].at_ms, 30);
    }

    #[tokio::test]
    async fn test_recorder_views() {
        let recorder = EventRecorder::new();
        let mut sink = recorder.clone();
        sink.emit(LifecycleEvent::Completed {
            operation_type: "LOAD".to_string(),
            result: json!(1),
            context: json!({ "test": 1 }),
        });
        sink.emit(end(1));

        assert_eq!(recorder.types(), vec!["LOAD", "LOADING_END"]);
        assert_eq!(
            recorder.types_with("test"),
            vec![("LOAD".to_string(), json!(1)), ("LOADING_END".to_string(), json!(1))]
        );
        assert_eq!(recorder.of_type("LOAD").len(), 1);
        assert_eq!(recorder.kinds(), vec![EventKind::Completed, EventKind::LoadingEnd]);

        recorder.clear();
        assert!(recorder.is_empty());
    }
}
