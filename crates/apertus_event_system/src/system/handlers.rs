/// Subscription management: subscribe, unsubscribe and lookups
use super::core::{EventBus, Subscription};
use crate::events::{EventCallback, EventError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

impl EventBus {
    /// Appends `callback` to the subscribers of `event_name`.
    ///
    /// Safe to call concurrently with [`trigger`](EventBus::trigger) and from
    /// inside a callback. Subscribing the same handle twice delivers each
    /// event to it twice.
    pub fn subscribe(&self, event_name: &str, callback: EventCallback) {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            id,
            callback,
            active: AtomicBool::new(true),
        });

        let mut subscribers = self.subscribers.write();
        subscribers
            .entry(event_name.to_string())
            .or_default()
            .push(subscription);

        info!("📝 Registered subscriber {} for {}", id, event_name);
    }

    /// Subscribes a closure and returns the handle needed to unsubscribe it.
    pub fn on<F>(&self, event_name: &str, handler: F) -> EventCallback
    where
        F: Fn(&str) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(handler);
        self.subscribe(event_name, Arc::clone(&callback));
        callback
    }

    /// Removes every subscription of `callback` (by identity) to `event_name`.
    ///
    /// Once this returns the callback receives no further events for that
    /// name, including events already queued. If the callback is executing on
    /// the dispatch worker at that moment, this waits for the invocation to
    /// finish, unless it is called from the dispatch worker itself.
    ///
    /// Returns `false` if the handle was not subscribed.
    pub fn unsubscribe(&self, event_name: &str, callback: &EventCallback) -> bool {
        let removed: Vec<Arc<Subscription>> = {
            let mut subscribers = self.subscribers.write();
            let Some(list) = subscribers.get_mut(event_name) else {
                return false;
            };

            let (removed, kept): (Vec<_>, Vec<_>) = list
                .drain(..)
                .partition(|s| Arc::ptr_eq(&s.callback, callback));
            *list = kept;
            if list.is_empty() {
                subscribers.remove(event_name);
            }
            removed
        };

        if removed.is_empty() {
            return false;
        }

        let mut in_flight = self.in_flight.lock();
        for subscription in &removed {
            subscription.active.store(false, Ordering::Release);
        }

        if !self.on_dispatch_worker() {
            while in_flight.is_some_and(|id| removed.iter().any(|s| s.id == id)) {
                self.in_flight_done.wait(&mut in_flight);
            }
        }

        debug!(
            "Removed {} subscription(s) from {}",
            removed.len(),
            event_name
        );
        true
    }

    /// Whether at least one callback is subscribed to `event_name`.
    pub fn has_subscribers(&self, event_name: &str) -> bool {
        self.subscriber_count(event_name) > 0
    }

    /// Number of subscriptions registered for `event_name`.
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.subscribers
            .read()
            .get(event_name)
            .map_or(0, |list| list.len())
    }

    /// Names that currently have at least one subscriber.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subscribers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
