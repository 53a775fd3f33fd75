/// Event emission methods
use super::core::EventBus;
use crate::events::{Event, EventError};
use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::trace;

impl EventBus {
    /// Enqueues an event and returns immediately.
    ///
    /// Thread-safe and never blocks on subscribers. Events are delivered in
    /// the order the bus accepted them, whichever thread triggered them. An
    /// event triggered while the bus is stopped waits for the next
    /// [`start`](EventBus::start).
    pub fn trigger(&self, event_name: impl Into<String>, payload: impl Into<String>) {
        let event = Event::new(event_name, payload);
        trace!("Queueing event '{}'", event.name);

        let mut queue = self.queue.lock();
        queue.events.push_back(event);
        self.events_triggered.fetch_add(1, Ordering::Relaxed);
        self.queue_signal.notify_one();
    }

    /// Enqueues an event without payload.
    pub fn trigger_empty(&self, event_name: impl Into<String>) {
        self.trigger(event_name, String::new());
    }

    /// Encodes `payload` as JSON and enqueues it.
    pub fn trigger_json<T: Serialize>(
        &self,
        event_name: impl Into<String>,
        payload: &T,
    ) -> Result<(), EventError> {
        let encoded = serde_json::to_string(payload)?;
        self.trigger(event_name, encoded);
        Ok(())
    }
}
