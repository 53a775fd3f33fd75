use apertus_event_system::{
    core_events, decode_payload, EventBus, EventBusConfig, Plugin, PluginBase, PluginError,
    PluginFailedEvent, PluginState,
};
use crossbeam::channel::{unbounded, Receiver};
use plugin_system::{create_plugin_host_with_config, HostConfig, PluginHost};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, ThreadId};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Succeed,
    FailInit,
    PanicInit,
    PanicRun,
}

struct ScriptedPlugin {
    base: PluginBase,
    behaviour: Behaviour,
    runs: AtomicUsize,
    destroys: AtomicUsize,
    run_thread_name: parking_lot::Mutex<Option<String>>,
}

impl ScriptedPlugin {
    fn new(name: &str, bus: &Arc<EventBus>, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            base: PluginBase::new(name, bus.clone()).unwrap(),
            behaviour,
            runs: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            run_thread_name: parking_lot::Mutex::new(None),
        })
    }
}

impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn init(&self) -> Result<(), PluginError> {
        match self.behaviour {
            Behaviour::FailInit => Err(PluginError::InitializationFailed("scripted".into())),
            Behaviour::PanicInit => panic!("init exploded"),
            _ => Ok(()),
        }
    }

    fn run(&self) -> Result<(), PluginError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.run_thread_name.lock() = thread::current().name().map(str::to_string);
        if self.behaviour == Behaviour::PanicRun {
            panic!("run exploded");
        }
        self.base
            .run_until_destroyed(Duration::from_millis(10), || Ok(()))
    }

    fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.base.destroy();
    }

    fn execution_identity(&self) -> Option<ThreadId> {
        self.base.execution_identity()
    }
}

fn started_bus() -> Arc<EventBus> {
    let bus = Arc::new(EventBus::with_config(EventBusConfig {
        poll_interval: Duration::from_millis(10),
        ..EventBusConfig::default()
    }));
    bus.start().unwrap();
    bus
}

fn host(bus: &Arc<EventBus>) -> PluginHost {
    create_plugin_host_with_config(
        bus.clone(),
        HostConfig {
            poll_interval: Duration::from_millis(10),
            emit_lifecycle_events: true,
        },
    )
}

fn record(bus: &EventBus, name: &str) -> Receiver<String> {
    let (tx, rx) = unbounded();
    bus.on(name, move |payload| {
        let _ = tx.send(payload.to_string());
        Ok(())
    });
    rx
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn failed_init_is_excluded_from_run_but_still_destroyed() {
    let bus = started_bus();
    let host = host(&bus);
    let a = ScriptedPlugin::new("A", &bus, Behaviour::Succeed);
    let b = ScriptedPlugin::new("B", &bus, Behaviour::FailInit);
    host.register_plugin(a.clone()).unwrap();
    host.register_plugin(b.clone()).unwrap();

    let report = host.init_plugins().unwrap();
    assert_eq!(report.initialized, vec!["A".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].plugin_name, "B");

    assert!(wait_until(|| a.runs.load(Ordering::SeqCst) == 1));
    host.stop_plugins();

    assert_eq!(b.runs.load(Ordering::SeqCst), 0);
    assert_eq!(a.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(b.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(host.plugin_state("A").unwrap(), PluginState::Stopped);
    assert_eq!(host.plugin_state("B").unwrap(), PluginState::Failed);
    bus.stop();
}

#[test]
fn barrier_completes_for_any_number_of_failures() {
    let behaviours = [
        Behaviour::Succeed,
        Behaviour::FailInit,
        Behaviour::PanicInit,
        Behaviour::Succeed,
        Behaviour::PanicInit,
    ];

    for failing in 0..=behaviours.len() {
        let bus = started_bus();
        let host = host(&bus);
        let plugins: Vec<_> = behaviours
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let behaviour = if i < failing {
                    behaviours[i % 2 + 1]
                } else {
                    Behaviour::Succeed
                };
                ScriptedPlugin::new(&format!("p{}", i), &bus, behaviour)
            })
            .collect();
        for plugin in &plugins {
            host.register_plugin(plugin.clone()).unwrap();
        }

        let report = host.init_plugins().unwrap();
        assert_eq!(report.failed.len(), failing);
        assert_eq!(report.initialized.len(), behaviours.len() - failing);

        host.stop_plugins();
        for (i, plugin) in plugins.iter().enumerate() {
            let expected_runs = usize::from(i >= failing);
            assert_eq!(plugin.runs.load(Ordering::SeqCst), expected_runs);
        }
        bus.stop();
    }
}

#[test]
fn concurrent_stop_destroys_each_plugin_once() {
    let bus = started_bus();
    let host = Arc::new(host(&bus));
    let plugins: Vec<_> = (0..4)
        .map(|i| ScriptedPlugin::new(&format!("c{}", i), &bus, Behaviour::Succeed))
        .collect();
    for plugin in &plugins {
        host.register_plugin(plugin.clone()).unwrap();
    }
    host.init_plugins().unwrap();

    let gate = Arc::new(Barrier::new(8));
    let stoppers: Vec<_> = (0..8)
        .map(|_| {
            let host = host.clone();
            let gate = gate.clone();
            thread::spawn(move || {
                gate.wait();
                host.stop_plugins();
                host.is_stopped()
            })
        })
        .collect();

    for stopper in stoppers {
        // Every caller returns only after shutdown completed.
        assert!(stopper.join().unwrap());
    }
    for plugin in &plugins {
        assert_eq!(plugin.destroys.load(Ordering::SeqCst), 1);
    }
    bus.stop();
}

#[test]
fn run_threads_are_named_and_identity_is_reported() {
    let bus = started_bus();
    let host = host(&bus);
    let plugin = ScriptedPlugin::new("named", &bus, Behaviour::Succeed);
    host.register_plugin(plugin.clone()).unwrap();
    host.init_plugins().unwrap();

    assert!(wait_until(|| plugin.execution_identity().is_some()));
    assert_eq!(
        plugin.run_thread_name.lock().as_deref(),
        Some("plugin-run-named")
    );

    host.stop_plugins();
    assert!(plugin.execution_identity().is_none());
    bus.stop();
}

#[test]
fn run_failures_are_isolated_and_reported() {
    let bus = started_bus();
    let run_failed = record(&bus, core_events::PLUGIN_RUN_FAILED);
    let host = host(&bus);
    let crasher = ScriptedPlugin::new("crasher", &bus, Behaviour::PanicRun);
    let steady = ScriptedPlugin::new("steady", &bus, Behaviour::Succeed);
    host.register_plugin(crasher.clone()).unwrap();
    host.register_plugin(steady.clone()).unwrap();
    host.init_plugins().unwrap();

    let payload = run_failed.recv_timeout(WAIT).unwrap();
    let event: PluginFailedEvent = decode_payload(&payload).unwrap();
    assert_eq!(event.plugin_name, "crasher");
    assert!(event.error.contains("run exploded"));

    assert!(wait_until(|| host.plugin_state("crasher").unwrap() == PluginState::Failed));
    assert_eq!(host.plugin_state("steady").unwrap(), PluginState::Running);

    host.stop_plugins();
    assert_eq!(host.plugin_state("steady").unwrap(), PluginState::Stopped);
    bus.stop();
}

#[test]
fn lifecycle_events_are_emitted() {
    let bus = started_bus();
    let initialized = record(&bus, core_events::PLUGIN_INITIALIZED);
    let init_failed = record(&bus, core_events::PLUGIN_INIT_FAILED);
    let stopped = record(&bus, core_events::PLUGINS_STOPPED);

    let host = host(&bus);
    host.register_plugin(ScriptedPlugin::new("ok", &bus, Behaviour::Succeed))
        .unwrap();
    host.register_plugin(ScriptedPlugin::new("broken", &bus, Behaviour::FailInit))
        .unwrap();
    host.init_plugins().unwrap();
    host.stop_plugins();
    bus.stop();

    assert!(initialized.try_recv().unwrap().contains("\"ok\""));
    assert!(init_failed.try_recv().unwrap().contains("\"broken\""));
    assert!(stopped.try_recv().unwrap().contains("\"plugin_count\":2"));
}

#[test]
fn stop_before_init_rejects_initialization() {
    let bus = started_bus();
    let initialized = record(&bus, core_events::PLUGIN_INITIALIZED);
    let host = host(&bus);
    let plugin = ScriptedPlugin::new("never", &bus, Behaviour::Succeed);
    host.register_plugin(plugin.clone()).unwrap();

    host.stop_plugins();
    assert!(host.init_plugins().is_err());

    assert_eq!(plugin.runs.load(Ordering::SeqCst), 0);
    assert_eq!(plugin.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(host.plugin_state("never").unwrap(), PluginState::Stopped);
    let stats = host.stats();
    assert_eq!(stats.stopped_plugins, 1);
    assert_eq!(stats.pending, 0);
    bus.stop();
    assert!(initialized.try_recv().is_err());
}

/// Blocks inside `init` until the test releases it.
struct GatedPlugin {
    entered: crossbeam::channel::Sender<()>,
    destroyed: crossbeam::channel::Sender<()>,
    release: Receiver<()>,
    init_returned: std::sync::atomic::AtomicBool,
    runs: AtomicUsize,
    destroys: AtomicUsize,
}

impl Plugin for GatedPlugin {
    fn name(&self) -> &str {
        "gated"
    }

    fn init(&self) -> Result<(), PluginError> {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(WAIT);
        self.init_returned.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn run(&self) -> Result<(), PluginError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        let _ = self.destroyed.send(());
    }

    fn execution_identity(&self) -> Option<ThreadId> {
        None
    }
}

#[test]
fn stop_during_init_wins_over_late_init_success() {
    let bus = started_bus();
    let (lifecycle_tx, lifecycle) = unbounded();
    for name in [core_events::PLUGIN_INITIALIZED, core_events::PLUGINS_STOPPED] {
        let tx = lifecycle_tx.clone();
        bus.on(name, move |_| {
            let _ = tx.send(name);
            Ok(())
        });
    }

    let host = Arc::new(host(&bus));
    let (entered_tx, entered) = unbounded();
    let (destroyed_tx, destroyed) = unbounded();
    let (release_tx, release) = unbounded();
    let plugin = Arc::new(GatedPlugin {
        entered: entered_tx,
        destroyed: destroyed_tx,
        release,
        init_returned: std::sync::atomic::AtomicBool::new(false),
        runs: AtomicUsize::new(0),
        destroys: AtomicUsize::new(0),
    });
    host.register_plugin(plugin.clone()).unwrap();

    let initializer = {
        let host = host.clone();
        thread::spawn(move || host.init_plugins())
    };
    entered.recv_timeout(WAIT).unwrap();

    let stopper = {
        let host = host.clone();
        thread::spawn(move || host.stop_plugins())
    };
    destroyed.recv_timeout(WAIT).unwrap();
    release_tx.send(()).unwrap();

    stopper.join().unwrap();
    // The init thread was joined by the shutdown.
    assert!(plugin.init_returned.load(Ordering::SeqCst));

    let report = initializer.join().unwrap().unwrap();
    assert!(report.initialized.is_empty());
    assert!(report.is_failed("gated"));

    assert_eq!(host.plugin_state("gated").unwrap(), PluginState::Stopped);
    assert_eq!(plugin.runs.load(Ordering::SeqCst), 0);
    assert_eq!(plugin.destroys.load(Ordering::SeqCst), 1);

    bus.stop();
    let seen: Vec<&str> = lifecycle.try_iter().collect();
    assert_eq!(seen, vec![core_events::PLUGINS_STOPPED]);
}

#[test]
fn host_stats_summarise_states() {
    let bus = started_bus();
    let host = host(&bus);
    host.register_plugin(ScriptedPlugin::new("one", &bus, Behaviour::Succeed))
        .unwrap();
    host.register_plugin(ScriptedPlugin::new("two", &bus, Behaviour::FailInit))
        .unwrap();
    host.init_plugins().unwrap();

    let stats = host.stats();
    assert_eq!(stats.total_plugins, 2);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.failed, 1);
    assert!(stats.initialization_started);
    assert!(!stats.stopped);

    host.stop_plugins();
    let stats = host.stats();
    assert_eq!(stats.stopped_plugins, 1);
    assert!(stats.stopped);
    bus.stop();
}
