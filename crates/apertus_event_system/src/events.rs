//! Event primitives shared by the bus, the plugin contract and the host.
//!
//! Events on the Apertus bus are deliberately untyped: a name plus a
//! caller-encoded string payload. Producers that want structure encode JSON
//! with [`serde_json`] (see [`EventBus::trigger_json`](crate::EventBus::trigger_json))
//! and consumers decode it with [`decode_payload`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

/// A single queued event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event name used for subscriber lookup
    pub name: String,
    /// Opaque payload, empty when the event carries no data
    pub payload: String,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// Callback handle stored in the subscriber table.
///
/// Handles are compared by pointer identity, so keep the `Arc` returned from
/// [`EventBus::on`](crate::EventBus::on) (or the one you passed to
/// [`EventBus::subscribe`](crate::EventBus::subscribe)) if you intend to
/// unsubscribe later.
pub type EventCallback = Arc<dyn Fn(&str) -> Result<(), EventError> + Send + Sync>;

/// Wraps a closure into an [`EventCallback`].
pub fn callback<F>(handler: F) -> EventCallback
where
    F: Fn(&str) -> Result<(), EventError> + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Decodes a JSON payload produced by [`EventBus::trigger_json`](crate::EventBus::trigger_json).
pub fn decode_payload<T: DeserializeOwned>(payload: &str) -> Result<T, EventError> {
    serde_json::from_str(payload).map_err(EventError::Deserialization)
}

/// Names of the events the runtime itself produces or reacts to.
pub mod core_events {
    /// Triggered by the host application once plugins are running.
    pub const ON_START: &str = "OnStart";
    /// Periodic tick produced by the heartbeat plugin.
    pub const ON_UPDATE: &str = "OnUpdate";
    /// Free-form application event.
    pub const CUSTOM_EVENT: &str = "CustomEvent";

    pub const PLAY_AUDIO: &str = "PlayAudio";
    pub const PAUSE_AUDIO: &str = "PauseAudio";
    pub const RESUME_AUDIO: &str = "ResumeAudio";
    pub const STOP_AUDIO: &str = "StopAudio";

    pub const PLAYBACK_STARTED: &str = "PlaybackStarted";
    pub const PLAYBACK_STOPPED: &str = "PlaybackStopped";
    pub const PLAYBACK_FINISHED: &str = "PlaybackFinished";
    pub const PLAYBACK_ERROR: &str = "PlaybackError";
    pub const PLAYBACK_STATE_CHANGED: &str = "PlaybackStateChanged";

    /// Plugin lifecycle notifications emitted by the plugin host.
    pub const PLUGIN_INITIALIZED: &str = "plugin_initialized";
    pub const PLUGIN_INIT_FAILED: &str = "plugin_init_failed";
    pub const PLUGIN_RUN_FAILED: &str = "plugin_run_failed";
    pub const PLUGINS_STOPPED: &str = "plugins_stopped";

    /// Emitted by the replica service after an inbound packet was applied.
    pub const REPLICA_RECEIVED: &str = "replica_received";
}

/// Payload of [`core_events::PLUGIN_INITIALIZED`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginInitializedEvent {
    pub plugin_name: String,
    pub timestamp: u64,
}

/// Payload of [`core_events::PLUGIN_INIT_FAILED`] and [`core_events::PLUGIN_RUN_FAILED`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginFailedEvent {
    pub plugin_name: String,
    pub error: String,
    pub timestamp: u64,
}

/// Payload of [`core_events::PLUGINS_STOPPED`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginsStoppedEvent {
    pub plugin_count: usize,
    pub timestamp: u64,
}

/// Errors that can occur during event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Serialization failed when encoding a payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Deserialization failed when decoding a payload
    #[error("Deserialization error: {0}")]
    Deserialization(serde_json::Error),
    /// A subscriber reported a failure while handling an event
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
    /// A subscriber panicked while handling an event
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
    /// The dispatch worker could not be spawned
    #[error("Failed to spawn dispatch worker: {0}")]
    WorkerSpawn(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_payload_round_trips_lifecycle_events() {
        let event = PluginFailedEvent {
            plugin_name: "greeter".to_string(),
            error: "boom".to_string(),
            timestamp: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: PluginFailedEvent = decode_payload(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_payload_reports_deserialization_errors() {
        let result: Result<PluginsStoppedEvent, _> = decode_payload("not json");
        assert!(matches!(result, Err(EventError::Deserialization(_))));
    }
}
