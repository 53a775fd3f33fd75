/// Event bus statistics
use super::core::EventBus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

/// Snapshot of the bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusStats {
    /// Total number of live subscriptions
    pub total_subscriptions: usize,
    /// Number of distinct event names with subscribers
    pub event_names: usize,
    /// Events accepted by `trigger` since creation
    pub events_triggered: u64,
    /// Events taken off the queue by the dispatch worker
    pub events_dispatched: u64,
    /// Events waiting in the queue
    pub queued_events: usize,
    /// Callback invocations performed
    pub callback_invocations: u64,
    /// Invocations that returned an error or panicked
    pub callback_failures: u64,
    pub running: bool,
}

impl EventBus {
    /// Returns a snapshot of the bus statistics.
    pub fn stats(&self) -> EventBusStats {
        let (total_subscriptions, event_names) = {
            let subscribers = self.subscribers.read();
            (subscribers.values().map(Vec::len).sum(), subscribers.len())
        };
        let (queued_events, running) = {
            let queue = self.queue.lock();
            (queue.events.len(), queue.running)
        };

        EventBusStats {
            total_subscriptions,
            event_names,
            events_triggered: self.events_triggered.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            queued_events,
            callback_invocations: self.callback_invocations.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            running,
        }
    }
}
