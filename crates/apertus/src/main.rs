//! Main application entry point for the Apertus runtime
//!
//! Loads the configuration, wires the event bus, the replication layer and
//! the built-in plugins together, and runs until a termination signal.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::Context;
use apertus_event_system::{
    core_events, create_event_bus_with_config, decode_payload, EventBus, Plugin,
    PluginFailedEvent,
};
use cli::CliArgs;
use config::AppConfig;
use plugin_heartbeat::HeartbeatPlugin;
use plugin_playback::{PlayAudioRequest, PlaybackConfig, PlaybackNotification, PlaybackPlugin};
use plugin_system::{create_plugin_host_with_config, PluginHost};
use replication::{
    AudioReplica, LoopbackTransport, PlaybackStateReplica, ReplicaFactory, ReplicaRegistrar,
    ReplicaService,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Stream requested on startup when the playback plugin is enabled.
const DEMO_STREAM_URL: &str = "file:///usr/share/sounds/apertus/startup.ogg";

// ============================================================================
// Application
// ============================================================================

pub struct Application {
    config: AppConfig,
    events: Arc<EventBus>,
    host: Arc<PluginHost>,
    replicas: Option<Arc<ReplicaService>>,
    transport: Arc<LoopbackTransport>,
}

impl Application {
    /// Loads the configuration named by `args`, applies CLI overrides and
    /// installs logging.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Some(poll_interval_ms) = args.poll_interval_ms {
            config.runtime.poll_interval_ms = poll_interval_ms;
        }

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        display_banner();
        info!("📂 Config: {}", args.config_path.display());

        Self::from_config(config)
    }

    /// Builds every component from an already validated configuration.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let events = create_event_bus_with_config(config.event_bus_config());
        let host = Arc::new(create_plugin_host_with_config(
            events.clone(),
            config.host_config(),
        ));
        let transport = Arc::new(LoopbackTransport::new());

        let replicas = if config.replication.enabled {
            let registrar = ReplicaRegistrar::new();
            registrar.add_pending::<AudioReplica>();
            registrar.add_pending::<PlaybackStateReplica>();

            let factory = Arc::new(ReplicaFactory::new());
            registrar.register_all_replicas(&factory);

            Some(Arc::new(
                ReplicaService::new(factory, transport.clone()).with_events(events.clone()),
            ))
        } else {
            None
        };

        let app = Self {
            config,
            events,
            host,
            replicas,
            transport,
        };
        app.subscribe_notifications();
        app.register_plugins()?;
        Ok(app)
    }

    /// Turns playback and lifecycle notifications into log lines.
    fn subscribe_notifications(&self) {
        let playback_events = [
            core_events::PLAYBACK_STARTED,
            core_events::PLAYBACK_STOPPED,
            core_events::PLAYBACK_FINISHED,
            core_events::PLAYBACK_STATE_CHANGED,
        ];
        for event_name in playback_events {
            self.events.on(event_name, move |payload| {
                let notification: PlaybackNotification = decode_payload(payload)?;
                info!(
                    "🎧 {}: {:?} {} at {}ms",
                    event_name,
                    notification.status,
                    notification.stream_url,
                    notification.position_ms
                );
                Ok(())
            });
        }

        self.events.on(core_events::PLAYBACK_ERROR, |payload| {
            warn!("🎧 Playback error: {}", payload);
            Ok(())
        });

        for event_name in [core_events::PLUGIN_INIT_FAILED, core_events::PLUGIN_RUN_FAILED] {
            self.events.on(event_name, move |payload| {
                let failure: PluginFailedEvent = decode_payload(payload)?;
                error!(
                    "🔌 {}: plugin {} ({})",
                    event_name, failure.plugin_name, failure.error
                );
                Ok(())
            });
        }
    }

    fn register_plugins(&self) -> anyhow::Result<()> {
        for name in &self.config.plugins.enabled {
            let plugin: Arc<dyn Plugin> = match name.as_str() {
                plugin_heartbeat::PLUGIN_NAME => Arc::new(HeartbeatPlugin::new(
                    self.events.clone(),
                    Duration::from_millis(self.config.plugins.heartbeat_interval_ms),
                )?),
                plugin_playback::PLUGIN_NAME => {
                    let replicas = self
                        .replicas
                        .clone()
                        .context("the playback plugin requires replication")?;
                    Arc::new(PlaybackPlugin::new(
                        self.events.clone(),
                        replicas,
                        PlaybackConfig {
                            owner_id: self.config.replication.owner_id.clone(),
                            tick: Duration::from_millis(self.config.plugins.playback_tick_ms),
                        },
                    )?)
                }
                other => anyhow::bail!("Unknown plugin: {}", other),
            };
            self.host.register_plugin(plugin)?;
        }
        info!("🔌 Registered plugins: {:?}", self.host.plugin_names());
        Ok(())
    }

    /// Starts the bus, initializes the plugins and announces `OnStart`.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.events.start()?;

        let host = self.host.clone();
        let report = tokio::task::spawn_blocking(move || host.init_plugins()).await??;
        info!(
            "✅ {} plugins running, {} failed",
            report.initialized.len(),
            report.failed.len()
        );
        for failure in &report.failed {
            warn!("⚠️ Plugin {} excluded: {}", failure.plugin_name, failure.error);
        }

        self.events.trigger_empty(core_events::ON_START);

        if self.config.is_plugin_enabled(plugin_playback::PLUGIN_NAME) {
            self.events.trigger_json(
                core_events::PLAY_AUDIO,
                &PlayAudioRequest {
                    stream_url: DEMO_STREAM_URL.to_string(),
                    volume: Some(0.8),
                    duration_secs: None,
                },
            )?;
        }
        Ok(())
    }

    /// Stops the plugins, then the bus, and reports final statistics.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!("🛑 Stopping plugins...");
        let host = self.host.clone();
        let stop = tokio::task::spawn_blocking(move || host.stop_plugins());
        if tokio::time::timeout(self.config.shutdown_grace(), stop)
            .await
            .is_err()
        {
            warn!(
                "⏳ Plugins did not stop within {:?}, continuing shutdown",
                self.config.shutdown_grace()
            );
        }

        let events = self.events.clone();
        tokio::task::spawn_blocking(move || events.stop()).await?;

        let bus_stats = self.events.stats();
        let host_stats = self.host.stats();
        info!("📊 Final Statistics:");
        info!("  - Events triggered: {}", bus_stats.events_triggered);
        info!("  - Events dispatched: {}", bus_stats.events_dispatched);
        info!("  - Callback failures: {}", bus_stats.callback_failures);
        info!(
            "  - Plugins: {} total, {} failed, {} stopped",
            host_stats.total_plugins, host_stats.failed, host_stats.stopped_plugins
        );
        if let Some(replicas) = &self.replicas {
            info!(
                "  - Replicas: {} live, {} packets sent",
                replicas.len(),
                self.transport.len()
            );
        }
        Ok(())
    }

    /// Runs until a termination signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("🌟 Starting Apertus");
        info!("📋 Configuration Summary:");
        info!("  ⏱️ Poll interval: {}ms", self.config.runtime.poll_interval_ms);
        info!("  🔌 Plugins: {:?}", self.config.plugins.enabled);
        info!(
            "  🔁 Replication: {} (owner {})",
            if self.config.replication.enabled { "enabled" } else { "disabled" },
            self.config.replication.owner_id
        );

        self.start().await?;

        let monitoring_handle = {
            let events = self.events.clone();
            let host = self.host.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let mut last_dispatched = 0u64;
                loop {
                    interval.tick().await;
                    let stats = events.stats();
                    let host_stats = host.stats();
                    info!(
                        "📊 System Health - {} events/min | {} subscriptions | {} plugins running",
                        stats.events_dispatched - last_dispatched,
                        stats.total_subscriptions,
                        host_stats.running
                    );
                    last_dispatched = stats.events_dispatched;
                }
            })
        };

        info!("✅ Apertus is now running");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        signals::setup_signal_handlers().await?;

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        monitoring_handle.abort();
        self.shutdown().await?;

        info!("👋 Apertus shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}

/// Display startup banner using proper logging
fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║              🔌 APERTUS 🔌               ║");
    info!("║           Plugin Host v{:<17} ║", version);
    info!("║                                          ║");
    info!("║  Event Bus · Plugin Lifecycle · Replicas ║");
    info!("╚══════════════════════════════════════════╝");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use replication::PlaybackStatus;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.runtime.poll_interval_ms = 10;
        config.plugins.heartbeat_interval_ms = 10;
        config.plugins.playback_tick_ms = 10;
        config
    }

    async fn wait_for(condition: impl Fn() -> bool) -> bool {
        for _ in 0..500 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_full_lifecycle() {
        let app = Application::from_config(fast_config()).unwrap();
        assert_eq!(app.host.plugin_names(), vec!["heartbeat", "playback"]);

        app.start().await.unwrap();
        assert!(wait_for(|| app.host.stats().running == 2).await);

        // The demo request makes the playback plugin publish both replicas.
        let transport = app.transport.clone();
        assert!(wait_for(|| transport.len() >= 2).await);
        let replicas = app.replicas.clone().unwrap();
        assert_eq!(replicas.len(), 2);

        app.shutdown().await.unwrap();
        assert!(app.host.is_stopped());
        assert!(!app.events.is_running());
        assert_eq!(app.host.stats().stopped_plugins, 2);

        let playing = transport
            .sent()
            .iter()
            .filter(|packet| packet.type_tag == "PlaybackState")
            .any(|packet| {
                let mut state = PlaybackStateReplica::new(replication::ReplicaMeta::new(
                    "probe", true, "test", false,
                ));
                replication::Replica::deserialize(&mut state, &packet.payload).is_ok()
                    && state.status() == PlaybackStatus::Playing
            });
        assert!(playing);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_heartbeat_only_without_replication() {
        let mut config = fast_config();
        config.plugins.enabled = vec!["heartbeat".to_string()];
        config.replication.enabled = false;
        assert!(config.validate().is_ok());

        let app = Application::from_config(config).unwrap();
        assert!(app.replicas.is_none());

        app.start().await.unwrap();
        assert!(wait_for(|| app.events.stats().events_dispatched > 3).await);
        app.shutdown().await.unwrap();
        assert!(app.transport.is_empty());
    }

    #[test]
    fn test_playback_without_replication_is_rejected() {
        let mut config = fast_config();
        config.replication.enabled = false;
        assert!(Application::from_config(config).is_err());
    }
}
