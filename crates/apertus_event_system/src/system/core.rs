/// Core EventBus implementation: state, lifecycle and the dispatch worker
use crate::events::{Event, EventCallback, EventError};
use crate::utils::panic_message;
use parking_lot::{Condvar, Mutex, RwLock};
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the bus whose dispatch worker runs on this thread, 0 otherwise.
    static DISPATCH_BUS_ID: Cell<u64> = const { Cell::new(0) };
}

/// Tunables for an [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Upper bound on how long the dispatch worker parks before re-checking
    /// its running flag.
    pub poll_interval: Duration,
    /// Name given to the dispatch worker thread.
    pub worker_name: String,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            worker_name: "apertus-event-dispatch".to_string(),
        }
    }
}

/// One entry in the subscriber table.
pub(crate) struct Subscription {
    pub(crate) id: u64,
    pub(crate) callback: EventCallback,
    /// Cleared under the in-flight lock when the subscription is removed.
    pub(crate) active: AtomicBool,
}

pub(crate) struct QueueState {
    pub(crate) events: VecDeque<Event>,
    pub(crate) running: bool,
    /// Cleared by the worker, under this lock, once it has decided to exit
    pub(crate) worker_alive: bool,
}

/// Asynchronous publish/subscribe bus with a single dispatch worker.
///
/// Producers enqueue with [`trigger`](EventBus::trigger) and return at once.
/// The worker drains the whole queue in one step and invokes, outside of any
/// lock, every callback currently subscribed to each event name in
/// subscription order. A failing or panicking callback is logged and counted
/// but never affects the worker or other subscribers.
pub struct EventBus {
    pub(crate) id: u64,
    pub(crate) config: EventBusConfig,
    /// Event name to subscriptions, in insertion order
    pub(crate) subscribers: RwLock<HashMap<String, Vec<Arc<Subscription>>>>,
    pub(crate) queue: Mutex<QueueState>,
    pub(crate) queue_signal: Condvar,
    /// Subscription id whose callback is currently executing
    pub(crate) in_flight: Mutex<Option<u64>>,
    pub(crate) in_flight_done: Condvar,
    /// Worker handle; also serializes start and stop
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
    pub(crate) next_subscription_id: AtomicU64,
    pub(crate) events_triggered: AtomicU64,
    pub(crate) events_dispatched: AtomicU64,
    pub(crate) callback_invocations: AtomicU64,
    pub(crate) callback_failures: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("subscribers", &"[subscribers]")
            .finish()
    }
}

impl EventBus {
    /// Creates a stopped bus with default settings.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Creates a stopped bus with the given settings.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
            config,
            subscribers: RwLock::new(HashMap::new()),
            queue: Mutex::new(QueueState {
                events: VecDeque::new(),
                running: false,
                worker_alive: false,
            }),
            queue_signal: Condvar::new(),
            in_flight: Mutex::new(None),
            in_flight_done: Condvar::new(),
            worker: Mutex::new(None),
            next_subscription_id: AtomicU64::new(1),
            events_triggered: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            callback_invocations: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Whether the dispatch worker is (or is about to be) running.
    pub fn is_running(&self) -> bool {
        self.queue.lock().running
    }

    /// Spawns the dispatch worker. Calling it on a running bus is a no-op.
    ///
    /// Events triggered while the bus was stopped are delivered once it starts.
    pub fn start(self: &Arc<Self>) -> Result<(), EventError> {
        if self.on_dispatch_worker() {
            self.queue.lock().running = true;
            return Ok(());
        }

        let mut worker = self.worker.lock();

        {
            let mut queue = self.queue.lock();
            if queue.running {
                debug!("Event bus {} already running", self.id);
                return Ok(());
            }
            queue.running = true;
            if queue.worker_alive {
                // A stop requested from a callback has not taken effect yet.
                debug!("Event bus {} resumed before its worker exited", self.id);
                return Ok(());
            }
            queue.worker_alive = true;
        }

        if let Some(stale) = worker.take() {
            if stale.join().is_err() {
                error!("❌ Previous dispatch worker of bus {} panicked", self.id);
            }
        }

        let bus = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || bus.dispatch_loop());

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!("🚌 Event bus {} started", self.id);
                Ok(())
            }
            Err(e) => {
                let mut queue = self.queue.lock();
                queue.running = false;
                queue.worker_alive = false;
                drop(queue);
                error!("❌ Failed to spawn event dispatch worker: {}", e);
                Err(EventError::WorkerSpawn(e.to_string()))
            }
        }
    }

    /// Stops the bus after every event queued so far has been dispatched.
    ///
    /// Blocks until the worker has exited. Idempotent; concurrent callers
    /// wait for the first one to finish. When called from a callback running
    /// on this bus's dispatch worker it only requests the stop, since the
    /// worker cannot join itself.
    pub fn stop(&self) {
        if self.on_dispatch_worker() {
            debug!("Stop requested from dispatch worker of bus {}", self.id);
            self.request_stop();
            return;
        }

        let mut worker = self.worker.lock();
        self.request_stop();

        let Some(handle) = worker.take() else {
            debug!("Event bus {} already stopped", self.id);
            return;
        };

        if handle.join().is_err() {
            error!("❌ Event dispatch worker of bus {} panicked", self.id);
        }
        info!("🛑 Event bus {} stopped", self.id);
    }

    fn request_stop(&self) {
        let mut queue = self.queue.lock();
        queue.running = false;
        self.queue_signal.notify_all();
    }

    /// True when the current thread is this bus's dispatch worker.
    pub(crate) fn on_dispatch_worker(&self) -> bool {
        DISPATCH_BUS_ID.with(|id| id.get() == self.id)
    }

    fn dispatch_loop(self: Arc<Self>) {
        DISPATCH_BUS_ID.with(|id| id.set(self.id));
        debug!("Dispatch worker for bus {} online", self.id);

        loop {
            let batch = {
                let mut queue = self.queue.lock();
                while queue.events.is_empty() && queue.running {
                    self.queue_signal
                        .wait_for(&mut queue, self.config.poll_interval);
                }
                if queue.events.is_empty() {
                    queue.worker_alive = false;
                    break;
                }
                std::mem::take(&mut queue.events)
            };

            trace!("Dispatching batch of {} events", batch.len());
            for event in batch {
                self.dispatch(&event);
            }
        }

        DISPATCH_BUS_ID.with(|id| id.set(0));
        debug!("Dispatch worker for bus {} exiting", self.id);
    }

    fn dispatch(&self, event: &Event) {
        let subscriptions: Vec<Arc<Subscription>> = self
            .subscribers
            .read()
            .get(&event.name)
            .cloned()
            .unwrap_or_default();

        self.events_dispatched.fetch_add(1, Ordering::Relaxed);

        if subscriptions.is_empty() {
            trace!("No subscribers for event '{}'", event.name);
            return;
        }

        for subscription in subscriptions {
            {
                let mut in_flight = self.in_flight.lock();
                if !subscription.active.load(Ordering::Acquire) {
                    continue;
                }
                *in_flight = Some(subscription.id);
            }

            self.callback_invocations.fetch_add(1, Ordering::Relaxed);
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                (subscription.callback)(&event.payload)
            }));

            {
                let mut in_flight = self.in_flight.lock();
                *in_flight = None;
                self.in_flight_done.notify_all();
            }

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.callback_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "❌ Subscriber {} for '{}' failed: {}",
                        subscription.id, event.name, e
                    );
                }
                Err(panic) => {
                    self.callback_failures.fetch_add(1, Ordering::Relaxed);
                    let e = EventError::HandlerPanicked(panic_message(panic));
                    error!(
                        "💥 Subscriber {} for '{}' panicked: {}",
                        subscription.id, event.name, e
                    );
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // The worker holds an Arc, so a live worker means drop cannot run;
        // this only reports events that were never dispatched.
        let pending = self.queue.get_mut().events.len();
        if pending > 0 {
            warn!(
                "Event bus {} dropped with {} undispatched events",
                self.id, pending
            );
        }
    }
}
