//! Event sinks and the notification path.
//!
//! Lifecycle events leave the engine through an [`EventSink`] in the order
//! the actor produced them. Synthetic clears go the other way: back into
//! the engine's re-injection queue, one scheduling step later.

use crate::router::Envelope;
use keyfetch_core::{CacheClear, LifecycleEvent};
use tokio::sync::mpsc;

/// Consumer of lifecycle events
///
/// Called from the engine actor only, so implementations see events in
/// emission order and never concurrently.
pub trait EventSink: Send + 'static {
    /// Deliver one event
    fn emit(&mut self, event: LifecycleEvent);
}

impl<F> EventSink for F
where
    F: FnMut(LifecycleEvent) + Send + 'static,
{
    fn emit(&mut self, event: LifecycleEvent) {
        self(event);
    }
}

/// Sink forwarding events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: LifecycleEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

/// Forwards events to the caller's sink and re-injects synthetic commands
pub struct NotificationSink {
    events: Box<dyn EventSink>,
    reinject: mpsc::Sender<Envelope>,
}

impl NotificationSink {
    /// Create the notification path
    #[must_use]
    pub fn new(events: Box<dyn EventSink>, reinject: mpsc::Sender<Envelope>) -> Self {
        Self { events, reinject }
    }

    /// Forward an event
    pub fn emit(&mut self, event: LifecycleEvent) {
        self.events.emit(event);
    }

    /// Schedule a synthetic clear, deferred one scheduling step
    ///
    /// Must be called from within a tokio runtime.
    pub fn reinject_clear(&self, clear: CacheClear) {
        let tx = self.reinject.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let key = clear.key();
            if tx.send(Envelope::synthesized(clear)).await.is_err() {
                tracing::warn!(key = %key.short(), "engine closed, synthetic clear dropped");
            }
        });
    }
}

impl std::fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSink")
            .field("reinject_capacity", &self.reinject.max_capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyfetch_core::{Command, Origin};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    fn start(n: i64) -> LifecycleEvent {
        LifecycleEvent::LoadingStart {
            arguments: vec![json!(n)],
            context: Value::Null,
        }
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let mut sink = move |event: LifecycleEvent| captured.lock().unwrap().push(event);

        sink.emit(start(1));
        sink.emit(start(2));
        assert_eq!(*seen.lock().unwrap(), vec![start(1), start(2)]);
    }

    #[test]
    fn test_channel_sink_preserves_order() {
        let (mut sink, mut rx) = ChannelSink::new();
        sink.emit(start(1));
        sink.emit(start(2));
        assert_eq!(rx.try_recv().unwrap(), start(1));
        assert_eq!(rx.try_recv().unwrap(), start(2));
    }

    #[test]
    fn test_channel_sink_receiver_dropped() {
        let (mut sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(start(1));
    }

    #[tokio::test]
    async fn test_reinject_is_deferred() {
        let (tx, mut rx) = mpsc::channel(4);
        let (events, _events_rx) = ChannelSink::new();
        let sink = NotificationSink::new(Box::new(events), tx);

        let clear = CacheClear::new("LOAD", vec![json!("please throw")]);
        sink.reinject_clear(clear.clone());
        assert!(rx.try_recv().is_err());

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.origin, Origin::Synthesized);
        assert_eq!(envelope.command, Command::CacheClear(clear));
    }
}
