//! Plugin host: lifecycle orchestration for in-process plugins
//!
//! Drives every registered plugin through init, run and destroy on dedicated
//! threads. Initialization is barrier-synchronized: the host waits for every
//! plugin to report an outcome before any plugin starts running, and a plugin
//! that fails or panics during init is simply left out of the run phase.

use apertus_event_system::{
    core_events, current_timestamp, EventBus, Plugin, PluginError, PluginFailedEvent,
    PluginInitializedEvent, PluginState, PluginsStoppedEvent,
};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Failure recorded for a plugin that `stop_plugins` reached before its init
/// outcome was recorded.
const STOPPED_DURING_INIT: &str = "host stopped during initialization";

// ============================================================================
// Configuration
// ============================================================================

/// Settings for a [`PluginHost`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// How often the host re-checks the init barrier and logs progress while
    /// waiting for slow plugins.
    pub poll_interval: Duration,
    /// Whether lifecycle notifications are triggered on the event bus.
    pub emit_lifecycle_events: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            emit_lifecycle_events: true,
        }
    }
}

// ============================================================================
// Plugin Host
// ============================================================================

/// Owns the registered plugins and the threads that drive them.
pub struct PluginHost {
    events: Arc<EventBus>,
    config: HostConfig,
    /// Registered plugins, in registration order
    plugins: RwLock<Vec<PluginEntry>>,
    /// Set once `init_plugins` begins; closes registration
    init_started: AtomicBool,
    /// Init and run threads awaiting join
    threads: Mutex<Vec<(String, JoinHandle<()>)>>,
    /// Held for the whole of `stop_plugins`; true once shutdown completed
    stopped: Mutex<bool>,
}

#[derive(Clone)]
struct PluginEntry {
    name: String,
    plugin: Arc<dyn Plugin>,
    state: Arc<Mutex<PluginState>>,
}

impl PluginEntry {
    fn state(&self) -> PluginState {
        *self.state.lock()
    }

    fn set_state(&self, state: PluginState) {
        *self.state.lock() = state;
    }

    /// Moves to `to` only when the current state is one of `from`.
    fn transition(&self, from: &[PluginState], to: PluginState) -> bool {
        let mut state = self.state.lock();
        if from.contains(&state) {
            *state = to;
            true
        } else {
            false
        }
    }
}

impl PluginHost {
    pub fn new(events: Arc<EventBus>, config: HostConfig) -> Self {
        Self {
            events,
            config,
            plugins: RwLock::new(Vec::new()),
            init_started: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
            stopped: Mutex::new(false),
        }
    }

    /// The event bus shared with the plugins.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Adds a plugin to the set that `init_plugins` will drive.
    ///
    /// Fails once initialization has started, or when a plugin with the same
    /// name is already registered.
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        let mut plugins = self.plugins.write();

        if self.init_started.load(Ordering::Acquire) {
            warn!("Rejected registration of {}: plugins already initialized", name);
            return Err(PluginError::RegistrationClosed(name));
        }
        if plugins.iter().any(|entry| entry.name == name) {
            return Err(PluginError::ExecutionError(format!(
                "Plugin {} is already registered",
                name
            )));
        }

        plugins.push(PluginEntry {
            name: name.clone(),
            plugin,
            state: Arc::new(Mutex::new(PluginState::Registered)),
        });
        info!("🔌 Registered plugin {} ({} total)", name, plugins.len());
        Ok(())
    }

    /// Initializes every registered plugin in parallel, waits until each one
    /// has reported, then starts a run thread for each plugin that
    /// initialized successfully.
    ///
    /// Can only be called once, and not after `stop_plugins`. A plugin that
    /// `stop_plugins` reaches while its init is still in flight stays
    /// `Stopped` and is listed as failed.
    pub fn init_plugins(&self) -> Result<InitReport, PluginError> {
        let entries: Vec<PluginEntry> = {
            let plugins = self.plugins.write();
            if self.init_started.swap(true, Ordering::AcqRel) {
                return Err(PluginError::ExecutionError(
                    "Plugins have already been initialized".to_string(),
                ));
            }
            plugins.clone()
        };

        if self.is_stopped() {
            warn!("Rejected plugin initialization: plugins already stopped");
            return Err(PluginError::ExecutionError(
                "Plugins have already been stopped".to_string(),
            ));
        }

        info!("Starting plugin initialization for {} plugins", entries.len());

        // Phase 1: one init thread per plugin, each reporting exactly once
        info!("Phase 1: Initializing plugins");
        let barrier = Arc::new(InitBarrier::new(entries.len()));

        for (index, entry) in entries.iter().enumerate() {
            let reporter = InitReporter::new(barrier.clone(), index);

            // Spawning under the stop lock means every init thread is either
            // joined by `stop_plugins` or never started.
            let stopped = self.stopped.lock();
            let started =
                !*stopped && entry.transition(&[PluginState::Registered], PluginState::Initializing);
            if !started {
                reporter.report(Err(STOPPED_DURING_INIT.to_string()));
                continue;
            }

            let plugin = entry.plugin.clone();
            let spawned = thread::Builder::new()
                .name(format!("plugin-init-{}", entry.name))
                .spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| plugin.init()))
                        .unwrap_or_else(|panic| Err(PluginError::from_panic(panic)));
                    reporter.report(outcome.map_err(|e| e.to_string()));
                });

            match spawned {
                Ok(handle) => self.threads.lock().push((entry.name.clone(), handle)),
                // The dropped reporter already counted this plugin as failed.
                Err(e) => error!("❌ Failed to spawn init thread for {}: {}", entry.name, e),
            }
            drop(stopped);
        }

        let outcomes = barrier.wait_all(self.config.poll_interval);
        info!("Phase 1 complete: all {} plugins reported", outcomes.len());

        // Phases 2 and 3 hold the stop lock so no lifecycle event can follow
        // `plugins_stopped`.
        let stopped = self.stopped.lock();

        // Phase 2: record outcomes
        info!("Phase 2: Recording initialization results");
        let mut report = InitReport::default();
        let mut ready = Vec::new();

        for (entry, outcome) in entries.iter().zip(outcomes) {
            let outcome = match outcome {
                Ok(()) => {
                    if entry.transition(&[PluginState::Initializing], PluginState::Initialized) {
                        Ok(())
                    } else {
                        Err(STOPPED_DURING_INIT.to_string())
                    }
                }
                Err(message) => {
                    entry.transition(&[PluginState::Initializing], PluginState::Failed);
                    Err(message)
                }
            };

            match outcome {
                Ok(()) => {
                    info!("✅ Plugin {} initialized successfully", entry.name);
                    self.emit(
                        core_events::PLUGIN_INITIALIZED,
                        &PluginInitializedEvent {
                            plugin_name: entry.name.clone(),
                            timestamp: current_timestamp(),
                        },
                    );
                    report.initialized.push(entry.name.clone());
                    ready.push(entry.clone());
                }
                Err(message) => {
                    if *stopped {
                        warn!("Plugin {} excluded: {}", entry.name, message);
                    } else {
                        error!("❌ Plugin {} initialization failed: {}", entry.name, message);
                        self.emit(
                            core_events::PLUGIN_INIT_FAILED,
                            &PluginFailedEvent {
                                plugin_name: entry.name.clone(),
                                error: message.clone(),
                                timestamp: current_timestamp(),
                            },
                        );
                    }
                    report.failed.push(PluginFailure {
                        plugin_name: entry.name.clone(),
                        error: message,
                    });
                }
            }
        }

        info!(
            "Phase 2 complete: {} initialized, {} failed",
            report.initialized.len(),
            report.failed.len()
        );

        // Phase 3: run threads, unless shutdown already happened
        if *stopped {
            warn!("Plugins were stopped during initialization; skipping run phase");
            return Ok(report);
        }

        info!("Phase 3: Starting plugin run threads");
        for entry in ready {
            self.spawn_run_thread(&entry, &mut report);
        }
        drop(stopped);

        info!(
            "Plugin startup complete: {} running, {} failed",
            report.initialized.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn spawn_run_thread(&self, entry: &PluginEntry, report: &mut InitReport) {
        entry.set_state(PluginState::Running);

        let runner = entry.clone();
        let events = self.events.clone();
        let emit_events = self.config.emit_lifecycle_events;
        let spawned = thread::Builder::new()
            .name(format!("plugin-run-{}", entry.name))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| runner.plugin.run()))
                    .unwrap_or_else(|panic| Err(PluginError::from_panic(panic)));

                match outcome {
                    Ok(()) => debug!("Plugin {} run returned", runner.name),
                    Err(e) => {
                        error!("❌ Plugin {} failed while running: {}", runner.name, e);
                        runner.transition(&[PluginState::Running], PluginState::Failed);
                        if emit_events {
                            emit_on(
                                &events,
                                core_events::PLUGIN_RUN_FAILED,
                                &PluginFailedEvent {
                                    plugin_name: runner.name.clone(),
                                    error: e.to_string(),
                                    timestamp: current_timestamp(),
                                },
                            );
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.threads.lock().push((entry.name.clone(), handle));
                debug!("Plugin {} run thread started", entry.name);
            }
            Err(e) => {
                entry.set_state(PluginState::Failed);
                error!("❌ Failed to spawn run thread for {}: {}", entry.name, e);
                report.initialized.retain(|name| name != &entry.name);
                report.failed.push(PluginFailure {
                    plugin_name: entry.name.clone(),
                    error: format!("failed to spawn run thread: {}", e),
                });
            }
        }
    }

    /// Destroys every registered plugin, then joins every thread the host
    /// spawned.
    ///
    /// Runs at most once. A concurrent second caller blocks until the first
    /// one finishes and then returns without doing anything.
    pub fn stop_plugins(&self) {
        let mut stopped = self.stopped.lock();
        if *stopped {
            debug!("Plugins already stopped");
            return;
        }

        let entries: Vec<PluginEntry> = self.plugins.read().clone();
        info!("🛑 Stopping {} plugins", entries.len());

        // Phase 1: ask every plugin to stop
        for entry in &entries {
            entry.transition(
                &[
                    PluginState::Initializing,
                    PluginState::Initialized,
                    PluginState::Running,
                ],
                PluginState::Stopping,
            );

            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| entry.plugin.destroy())) {
                error!(
                    "💥 Plugin {} panicked during destroy: {}",
                    entry.name,
                    PluginError::from_panic(panic)
                );
            }
        }

        // Phase 2: join init and run threads
        let threads = std::mem::take(&mut *self.threads.lock());
        let current = thread::current().id();
        for (name, handle) in threads {
            if handle.thread().id() == current {
                warn!("Plugin {} requested shutdown from its own thread", name);
                continue;
            }
            if handle.join().is_err() {
                error!("❌ Thread for plugin {} terminated abnormally", name);
            }
        }

        // Phase 3: final states
        for entry in &entries {
            entry.transition(
                &[PluginState::Registered, PluginState::Stopping],
                PluginState::Stopped,
            );
        }

        *stopped = true;
        self.emit(
            core_events::PLUGINS_STOPPED,
            &PluginsStoppedEvent {
                plugin_count: entries.len(),
                timestamp: current_timestamp(),
            },
        );
        info!("All plugins shut down");
    }

    /// Whether `stop_plugins` has completed.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Names of the registered plugins, in registration order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Current lifecycle state of a plugin.
    pub fn plugin_state(&self, name: &str) -> Result<PluginState, PluginError> {
        self.plugins
            .read()
            .iter()
            .find(|entry| entry.name == name)
            .map(PluginEntry::state)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Every plugin with its current state.
    pub fn plugin_states(&self) -> Vec<(String, PluginState)> {
        self.plugins
            .read()
            .iter()
            .map(|entry| (entry.name.clone(), entry.state()))
            .collect()
    }

    pub fn stats(&self) -> PluginHostStats {
        let mut stats = PluginHostStats {
            initialization_started: self.init_started.load(Ordering::Acquire),
            stopped: self.is_stopped(),
            ..PluginHostStats::default()
        };

        for (_, state) in self.plugin_states() {
            stats.total_plugins += 1;
            match state {
                PluginState::Running => stats.running += 1,
                PluginState::Failed => stats.failed += 1,
                PluginState::Stopped => stats.stopped_plugins += 1,
                _ => stats.pending += 1,
            }
        }
        stats
    }

    fn emit<T: Serialize>(&self, event_name: &str, payload: &T) {
        if self.config.emit_lifecycle_events {
            emit_on(&self.events, event_name, payload);
        }
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.stop_plugins();
    }
}

fn emit_on<T: Serialize>(events: &EventBus, event_name: &str, payload: &T) {
    if let Err(e) = events.trigger_json(event_name, payload) {
        warn!("Failed to emit {} event: {}", event_name, e);
    }
}

// ============================================================================
// Initialization Barrier
// ============================================================================

/// Counts init outcomes; `wait_all` returns once every plugin reported.
struct InitBarrier {
    progress: Mutex<InitProgress>,
    reported: Condvar,
}

struct InitProgress {
    outcomes: Vec<Option<Result<(), String>>>,
    reported: usize,
}

impl InitBarrier {
    fn new(expected: usize) -> Self {
        Self {
            progress: Mutex::new(InitProgress {
                outcomes: vec![None; expected],
                reported: 0,
            }),
            reported: Condvar::new(),
        }
    }

    /// Records the outcome for `index`; later reports for the same index are
    /// ignored.
    fn report(&self, index: usize, outcome: Result<(), String>) {
        let mut progress = self.progress.lock();
        let Some(slot) = progress.outcomes.get_mut(index) else {
            return;
        };
        if slot.is_some() {
            return;
        }
        *slot = Some(outcome);
        progress.reported += 1;
        self.reported.notify_all();
    }

    fn wait_all(&self, poll_interval: Duration) -> Vec<Result<(), String>> {
        let mut progress = self.progress.lock();
        while progress.reported < progress.outcomes.len() {
            let timed_out = self
                .reported
                .wait_for(&mut progress, poll_interval)
                .timed_out();
            if timed_out {
                debug!(
                    "Waiting for plugin initialization: {}/{} reported",
                    progress.reported,
                    progress.outcomes.len()
                );
            }
        }

        progress
            .outcomes
            .iter()
            .map(|outcome| {
                outcome
                    .clone()
                    .unwrap_or_else(|| Err("no outcome recorded".to_string()))
            })
            .collect()
    }
}

/// Reports one plugin's init outcome; if dropped unreported (for example
/// because the init thread could not be spawned) it reports a failure.
struct InitReporter {
    barrier: Arc<InitBarrier>,
    index: usize,
    reported: bool,
}

impl InitReporter {
    fn new(barrier: Arc<InitBarrier>, index: usize) -> Self {
        Self {
            barrier,
            index,
            reported: false,
        }
    }

    fn report(mut self, outcome: Result<(), String>) {
        self.barrier.report(self.index, outcome);
        self.reported = true;
    }
}

impl Drop for InitReporter {
    fn drop(&mut self) {
        if !self.reported {
            self.barrier.report(
                self.index,
                Err("init unit exited without reporting an outcome".to_string()),
            );
        }
    }
}

// ============================================================================
// Reports and Statistics
// ============================================================================

/// Result of [`PluginHost::init_plugins`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitReport {
    /// Plugins that initialized and were handed a run thread
    pub initialized: Vec<String>,
    /// Plugins excluded from the run phase, with the reason
    pub failed: Vec<PluginFailure>,
}

impl InitReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_failed(&self, plugin_name: &str) -> bool {
        self.failed.iter().any(|f| f.plugin_name == plugin_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginFailure {
    pub plugin_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHostStats {
    pub total_plugins: usize,
    pub running: usize,
    pub failed: usize,
    pub stopped_plugins: usize,
    /// Registered, initializing, initialized or stopping
    pub pending: usize,
    pub initialization_started: bool,
    pub stopped: bool,
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Create a plugin host with default settings
pub fn create_plugin_host(events: Arc<EventBus>) -> PluginHost {
    PluginHost::new(events, HostConfig::default())
}

/// Create a plugin host with a specific configuration
pub fn create_plugin_host_with_config(events: Arc<EventBus>, config: HostConfig) -> PluginHost {
    PluginHost::new(events, config)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use apertus_event_system::create_event_bus;
    use std::sync::atomic::AtomicUsize;
    use std::thread::ThreadId;

    struct TestPlugin {
        name: String,
        fail_init: bool,
        inits: AtomicUsize,
        destroys: AtomicUsize,
        stop: Mutex<bool>,
        wake: Condvar,
    }

    impl TestPlugin {
        fn new(name: &str, fail_init: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail_init,
                inits: AtomicUsize::new(0),
                destroys: AtomicUsize::new(0),
                stop: Mutex::new(false),
                wake: Condvar::new(),
            })
        }
    }

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn init(&self) -> Result<(), PluginError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(PluginError::InitializationFailed("refused".to_string()));
            }
            Ok(())
        }

        fn run(&self) -> Result<(), PluginError> {
            let mut stop = self.stop.lock();
            while !*stop {
                self.wake.wait(&mut stop);
            }
            Ok(())
        }

        fn destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            *self.stop.lock() = true;
            self.wake.notify_all();
        }

        fn execution_identity(&self) -> Option<ThreadId> {
            None
        }
    }

    #[test]
    fn test_plugin_host_creation() {
        let host = create_plugin_host(create_event_bus());
        assert!(host.plugin_names().is_empty());
        assert_eq!(host.stats(), PluginHostStats::default());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let host = create_plugin_host(create_event_bus());
        host.register_plugin(TestPlugin::new("dup", false)).unwrap();
        let err = host.register_plugin(TestPlugin::new("dup", false)).unwrap_err();
        assert!(matches!(err, PluginError::ExecutionError(_)));
        assert_eq!(host.plugin_names(), vec!["dup".to_string()]);
    }

    #[test]
    fn test_registration_closes_after_init() {
        let host = create_plugin_host(create_event_bus());
        host.init_plugins().unwrap();
        let err = host.register_plugin(TestPlugin::new("late", false)).unwrap_err();
        assert!(matches!(err, PluginError::RegistrationClosed(_)));
        assert!(host.init_plugins().is_err());
    }

    #[test]
    fn test_init_with_no_plugins_completes() {
        let host = create_plugin_host(create_event_bus());
        let report = host.init_plugins().unwrap();
        assert!(report.initialized.is_empty());
        assert!(report.all_succeeded());
        host.stop_plugins();
        assert!(host.is_stopped());
    }

    #[test]
    fn test_states_follow_lifecycle() {
        let host = create_plugin_host(create_event_bus());
        let good = TestPlugin::new("good", false);
        let bad = TestPlugin::new("bad", true);
        host.register_plugin(good.clone()).unwrap();
        host.register_plugin(bad.clone()).unwrap();
        assert_eq!(host.plugin_state("good").unwrap(), PluginState::Registered);

        let report = host.init_plugins().unwrap();
        assert_eq!(report.initialized, vec!["good".to_string()]);
        assert!(report.is_failed("bad"));
        assert_eq!(host.plugin_state("good").unwrap(), PluginState::Running);
        assert_eq!(host.plugin_state("bad").unwrap(), PluginState::Failed);

        host.stop_plugins();
        assert_eq!(host.plugin_state("good").unwrap(), PluginState::Stopped);
        assert_eq!(host.plugin_state("bad").unwrap(), PluginState::Failed);
        assert_eq!(good.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(bad.destroys.load(Ordering::SeqCst), 1);
        assert!(matches!(
            host.plugin_state("missing"),
            Err(PluginError::NotFound(_))
        ));
    }

    #[test]
    fn test_barrier_reports_every_plugin_once() {
        let barrier = InitBarrier::new(3);
        barrier.report(0, Ok(()));
        barrier.report(0, Err("late duplicate".to_string()));
        barrier.report(2, Err("failed".to_string()));

        // An unreported reporter counts as a failure when dropped.
        let shared = Arc::new(barrier);
        drop(InitReporter::new(shared.clone(), 1));

        let outcomes = shared.wait_all(Duration::from_millis(5));
        assert_eq!(outcomes[0], Ok(()));
        assert!(outcomes[1].is_err());
        assert_eq!(outcomes[2], Err("failed".to_string()));
    }

    #[test]
    fn test_init_after_stop_is_rejected() {
        let host = create_plugin_host(create_event_bus());
        let plugin = TestPlugin::new("late", false);
        host.register_plugin(plugin.clone()).unwrap();

        host.stop_plugins();
        assert!(host.init_plugins().is_err());
        assert_eq!(plugin.inits.load(Ordering::SeqCst), 0);
        assert_eq!(plugin.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(host.plugin_state("late").unwrap(), PluginState::Stopped);
    }

    #[test]
    fn test_drop_stops_plugins() {
        let plugin = TestPlugin::new("dropped", false);
        {
            let host = create_plugin_host(create_event_bus());
            host.register_plugin(plugin.clone()).unwrap();
            host.init_plugins().unwrap();
        }
        assert_eq!(plugin.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(plugin.inits.load(Ordering::SeqCst), 1);
    }
}
