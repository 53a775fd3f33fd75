//! Reusable plugin plumbing: private inbox, running flag and run identity.
//!
//! [`PluginBase`] is meant to be embedded in a concrete plugin. It turns bus
//! subscriptions into a per-plugin FIFO drained by the plugin's own worker
//! thread, so a slow plugin handler never stalls the shared dispatch worker.

use crate::events::{Event, EventCallback, EventError};
use crate::plugin::PluginError;
use crate::system::EventBus;
use crate::utils::panic_message;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Handler invoked on the plugin's inbox worker.
pub type PluginEventHandler = Arc<dyn Fn(&str) -> Result<(), PluginError> + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<String, PluginEventHandler>>>;

pub struct PluginBase {
    name: String,
    events: Arc<EventBus>,
    running: Mutex<bool>,
    running_changed: Condvar,
    destroyed: AtomicBool,
    handlers: HandlerMap,
    /// One bus subscription per distinct event name
    bus_subscriptions: Mutex<Vec<(String, EventCallback)>>,
    inbox: Sender<Event>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    run_identity: Mutex<Option<ThreadId>>,
}

impl std::fmt::Debug for PluginBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginBase")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("subscriptions", &self.subscribed_events())
            .finish()
    }
}

impl PluginBase {
    /// Creates the base and spawns the plugin's inbox worker.
    pub fn new(name: impl Into<String>, events: Arc<EventBus>) -> Result<Self, PluginError> {
        let name = name.into();
        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));
        let (inbox_tx, inbox_rx) = channel::unbounded::<Event>();
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let worker = {
            let name = name.clone();
            let handlers = handlers.clone();
            thread::Builder::new()
                .name(format!("plugin-inbox-{}", name))
                .spawn(move || inbox_loop(&name, inbox_rx, shutdown_rx, handlers))
                .map_err(|e| {
                    PluginError::Runtime(format!("Failed to spawn inbox worker: {}", e))
                })?
        };

        Ok(Self {
            name,
            events,
            running: Mutex::new(true),
            running_changed: Condvar::new(),
            destroyed: AtomicBool::new(false),
            handlers,
            bus_subscriptions: Mutex::new(Vec::new()),
            inbox: inbox_tx,
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
            run_identity: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Routes `event_name` into this plugin's inbox and handles it with
    /// `handler` on the inbox worker.
    ///
    /// Subscribing the same name again replaces the handler; the bus still
    /// sees a single subscription for it.
    pub fn subscribe<F>(&self, event_name: &str, handler: F) -> Result<(), PluginError>
    where
        F: Fn(&str) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        let mut bus_subscriptions = self.bus_subscriptions.lock();
        if self.destroyed.load(Ordering::Acquire) {
            return Err(PluginError::ExecutionError(format!(
                "Plugin {} is destroyed",
                self.name
            )));
        }

        let replaced = self
            .handlers
            .write()
            .insert(event_name.to_string(), Arc::new(handler))
            .is_some();
        if replaced {
            debug!("🔁 Plugin {} replaced handler for {}", self.name, event_name);
            return Ok(());
        }

        let inbox = self.inbox.clone();
        let forwarded_name = event_name.to_string();
        let callback = self.events.on(event_name, move |payload| {
            inbox
                .send(Event::new(forwarded_name.clone(), payload))
                .map_err(|_| EventError::HandlerExecution(format!("inbox closed for {}", forwarded_name)))
        });
        bus_subscriptions.push((event_name.to_string(), callback));

        debug!("📝 Plugin {} subscribed to {}", self.name, event_name);
        Ok(())
    }

    /// Event names this plugin currently listens to.
    pub fn subscribed_events(&self) -> Vec<String> {
        self.bus_subscriptions
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Parks for up to `interval`, returning early when the plugin is
    /// destroyed. Returns whether the plugin is still running.
    pub fn wait_while_running(&self, interval: Duration) -> bool {
        let mut running = self.running.lock();
        if *running {
            self.running_changed.wait_for(&mut running, interval);
        }
        *running
    }

    /// Drives a cooperative run loop: records the calling thread as the
    /// execution identity and calls `tick` every `interval` until destroyed.
    pub fn run_until_destroyed<F>(&self, interval: Duration, mut tick: F) -> Result<(), PluginError>
    where
        F: FnMut() -> Result<(), PluginError>,
    {
        *self.run_identity.lock() = Some(thread::current().id());
        info!("▶️ Plugin {} running", self.name);

        let mut outcome = Ok(());
        while self.is_running() {
            if let Err(e) = tick() {
                outcome = Err(e);
                break;
            }
            if !self.wait_while_running(interval) {
                break;
            }
        }

        *self.run_identity.lock() = None;
        debug!("Plugin {} left its run loop", self.name);
        outcome
    }

    /// Identity of the thread inside [`run_until_destroyed`](Self::run_until_destroyed).
    pub fn execution_identity(&self) -> Option<ThreadId> {
        *self.run_identity.lock()
    }

    /// Stops the run loop and the inbox worker and removes bus subscriptions.
    ///
    /// Idempotent. Events still waiting in the inbox are discarded.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut running = self.running.lock();
            *running = false;
            self.running_changed.notify_all();
        }

        let subscriptions = std::mem::take(&mut *self.bus_subscriptions.lock());
        for (event_name, callback) in &subscriptions {
            self.events.unsubscribe(event_name, callback);
        }

        // Dropping the sender wakes the inbox worker.
        drop(self.shutdown.lock().take());

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() == thread::current().id() {
                debug!("Plugin {} destroyed from its own inbox worker", self.name);
            } else if handle.join().is_err() {
                error!("❌ Inbox worker of plugin {} panicked", self.name);
            }
        }

        info!("🧹 Plugin {} destroyed", self.name);
    }
}

impl Drop for PluginBase {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn inbox_loop(
    plugin_name: &str,
    inbox: Receiver<Event>,
    shutdown: Receiver<()>,
    handlers: HandlerMap,
) {
    debug!("Inbox worker for plugin {} online", plugin_name);
    loop {
        channel::select! {
            recv(inbox) -> message => match message {
                Ok(event) => deliver(plugin_name, &handlers, &event),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("Inbox worker for plugin {} exiting", plugin_name);
}

fn deliver(plugin_name: &str, handlers: &HandlerMap, event: &Event) {
    let handler = handlers.read().get(&event.name).cloned();
    let Some(handler) = handler else {
        warn!("Plugin {} has no handler for {}", plugin_name, event.name);
        return;
    };

    match catch_unwind(AssertUnwindSafe(|| handler(&event.payload))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("❌ Plugin {} handler for {} failed: {}", plugin_name, event.name, e);
        }
        Err(panic) => {
            error!(
                "💥 Plugin {} handler for {} panicked: {}",
                plugin_name,
                event.name,
                panic_message(panic)
            );
        }
    }
}
