//! Configuration management for the Apertus runtime.
//!
//! Loads the TOML configuration file, applies defaults for missing keys and
//! converts the settings into the typed configs of the core crates.

use anyhow::Context;
use apertus_event_system::EventBusConfig;
use plugin_system::HostConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Names of the plugins built into the binary.
pub const KNOWN_PLUGINS: [&str; 2] = [plugin_heartbeat::PLUGIN_NAME, plugin_playback::PLUGIN_NAME];

fn default_poll_interval() -> u64 {
    100
}

fn default_shutdown_grace() -> u64 {
    5_000
}

fn default_enabled_plugins() -> Vec<String> {
    KNOWN_PLUGINS.iter().map(|name| name.to_string()).collect()
}

fn default_heartbeat_interval() -> u64 {
    1_000
}

fn default_playback_tick() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

fn default_owner_id() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub replication: ReplicationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Timing of the worker loops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    /// How often parked workers re-check their running flag. This is the
    /// worst-case shutdown latency of every loop.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long shutdown may take before the process reports it as stuck
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

/// Which built-in plugins run and how they are tuned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginSettings {
    /// Built-in plugins to register, in registration order
    #[serde(default = "default_enabled_plugins")]
    pub enabled: Vec<String>,
    /// Interval between `OnUpdate` ticks of the heartbeat plugin
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Position update interval of the playback plugin
    #[serde(default = "default_playback_tick")]
    pub playback_tick_ms: u64,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled_plugins(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            playback_tick_ms: default_playback_tick(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Owner written into every replica this process hosts
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            owner_id: default_owner_id(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing default config to {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.runtime.shutdown_grace_ms)
    }

    pub fn event_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            poll_interval: self.poll_interval(),
            ..EventBusConfig::default()
        }
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            poll_interval: self.poll_interval(),
            ..HostConfig::default()
        }
    }

    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.plugins.enabled.iter().any(|enabled| enabled == name)
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.runtime.poll_interval_ms == 0 {
            return Err("Poll interval must be greater than zero".to_string());
        }

        if self.plugins.heartbeat_interval_ms == 0 {
            return Err("Heartbeat interval must be greater than zero".to_string());
        }

        if self.plugins.playback_tick_ms == 0 {
            return Err("Playback tick must be greater than zero".to_string());
        }

        for name in &self.plugins.enabled {
            if !KNOWN_PLUGINS.contains(&name.as_str()) {
                return Err(format!(
                    "Unknown plugin: {}. Must be one of: {KNOWN_PLUGINS:?}",
                    name
                ));
            }
        }

        if self.replication.owner_id.is_empty() {
            return Err("Replication owner_id cannot be empty".to_string());
        }

        if self.is_plugin_enabled(plugin_playback::PLUGIN_NAME) && !self.replication.enabled {
            return Err("The playback plugin requires replication to be enabled".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
