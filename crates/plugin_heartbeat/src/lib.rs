use apertus_event_system::{
    core_events, current_timestamp, EventBus, Plugin, PluginBase, PluginError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{debug, info};

pub const PLUGIN_NAME: &str = "heartbeat";

// ============================================================================
// Sample Plugin: Heartbeat
// ============================================================================

/// Payload of every [`core_events::ON_UPDATE`] tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateEvent {
    pub tick: u64,
    pub interval_ms: u64,
    pub timestamp: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    starts_seen: AtomicU64,
    custom_events_seen: AtomicU64,
}

/// Listens for `OnStart` and `CustomEvent` and, while running, triggers
/// `OnUpdate` once per interval.
pub struct HeartbeatPlugin {
    base: PluginBase,
    interval: Duration,
    counters: Arc<Counters>,
}

impl HeartbeatPlugin {
    pub fn new(events: Arc<EventBus>, interval: Duration) -> Result<Self, PluginError> {
        debug!("💓 HeartbeatPlugin: Creating new instance ({:?} interval)", interval);
        Ok(Self {
            base: PluginBase::new(PLUGIN_NAME, events)?,
            interval,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `OnUpdate` events triggered so far.
    pub fn ticks(&self) -> u64 {
        self.counters.ticks.load(Ordering::Relaxed)
    }

    pub fn starts_seen(&self) -> u64 {
        self.counters.starts_seen.load(Ordering::Relaxed)
    }

    pub fn custom_events_seen(&self) -> u64 {
        self.counters.custom_events_seen.load(Ordering::Relaxed)
    }

    fn emit_tick(&self) -> Result<(), PluginError> {
        let tick = self.counters.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        self.base.events().trigger_json(
            core_events::ON_UPDATE,
            &UpdateEvent {
                tick,
                interval_ms: self.interval.as_millis() as u64,
                timestamp: current_timestamp(),
            },
        )?;
        Ok(())
    }
}

impl Plugin for HeartbeatPlugin {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn init(&self) -> Result<(), PluginError> {
        let counters = self.counters.clone();
        self.base.subscribe(core_events::ON_START, move |_| {
            counters.starts_seen.fetch_add(1, Ordering::Relaxed);
            info!("💓 HeartbeatPlugin: Application started");
            Ok(())
        })?;

        let counters = self.counters.clone();
        self.base.subscribe(core_events::CUSTOM_EVENT, move |payload| {
            counters.custom_events_seen.fetch_add(1, Ordering::Relaxed);
            info!("💓 HeartbeatPlugin: Custom event received: {}", payload);
            Ok(())
        })?;

        info!("💓 HeartbeatPlugin: ✅ Handlers registered");
        Ok(())
    }

    fn run(&self) -> Result<(), PluginError> {
        self.base.run_until_destroyed(self.interval, || self.emit_tick())?;
        info!("💓 HeartbeatPlugin: Stopped after {} ticks", self.ticks());
        Ok(())
    }

    fn destroy(&self) {
        self.base.destroy();
    }

    fn execution_identity(&self) -> Option<ThreadId> {
        self.base.execution_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apertus_event_system::{decode_payload, EventBusConfig, EventError};
    use crossbeam::channel::unbounded;
    use plugin_system::create_plugin_host_with_config;
    use plugin_system::HostConfig;

    const WAIT: Duration = Duration::from_secs(5);

    fn started_bus() -> Arc<EventBus> {
        let bus = Arc::new(EventBus::with_config(EventBusConfig {
            poll_interval: Duration::from_millis(10),
            ..EventBusConfig::default()
        }));
        bus.start().unwrap();
        bus
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = std::time::Instant::now() + WAIT;
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn ticks_on_update_while_running() {
        let bus = started_bus();
        let (tx, rx) = unbounded();
        bus.on(core_events::ON_UPDATE, move |payload| {
            let update: UpdateEvent = decode_payload(payload)?;
            tx.send(update.tick)
                .map_err(|e| EventError::HandlerExecution(e.to_string()))
        });

        let plugin = Arc::new(HeartbeatPlugin::new(bus.clone(), Duration::from_millis(10)).unwrap());
        let host = create_plugin_host_with_config(
            bus.clone(),
            HostConfig {
                poll_interval: Duration::from_millis(10),
                ..HostConfig::default()
            },
        );
        host.register_plugin(plugin.clone()).unwrap();
        assert!(host.init_plugins().unwrap().all_succeeded());

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);

        host.stop_plugins();
        assert!(plugin.execution_identity().is_none());
        bus.stop();
    }

    #[test]
    fn counts_start_and_custom_events() {
        let bus = started_bus();
        let plugin = HeartbeatPlugin::new(bus.clone(), Duration::from_millis(10)).unwrap();
        plugin.init().unwrap();

        bus.trigger_empty(core_events::ON_START);
        bus.trigger(core_events::CUSTOM_EVENT, "hello");
        bus.trigger(core_events::CUSTOM_EVENT, "again");

        assert!(wait_until(|| plugin.starts_seen() == 1 && plugin.custom_events_seen() == 2));

        plugin.destroy();
        bus.trigger_empty(core_events::ON_START);
        bus.stop();
        assert_eq!(plugin.starts_seen(), 1);
    }
}
