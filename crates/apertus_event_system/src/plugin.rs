//! The capability contract every plugin implements.

use crate::events::EventError;
use serde::{Deserialize, Serialize};
use std::thread::ThreadId;

/// A unit of work driven by the plugin host.
///
/// The host calls [`init`](Plugin::init) and [`run`](Plugin::run) on
/// dedicated threads, and [`destroy`](Plugin::destroy) from whichever thread
/// requests shutdown while `run` may still be executing. Implementations
/// therefore take `&self` and keep their mutable state behind
/// synchronization; [`PluginBase`](crate::PluginBase) provides the usual
/// pieces.
pub trait Plugin: Send + Sync {
    /// Stable identity used in logs, thread names and lifecycle events.
    fn name(&self) -> &str;

    /// One-time setup. Returning an error (or panicking) excludes the plugin
    /// from the run phase.
    fn init(&self) -> Result<(), PluginError>;

    /// Main body. Expected to loop cooperatively until `destroy` is called.
    fn run(&self) -> Result<(), PluginError>;

    /// Requests the plugin to stop and releases its resources. Must be safe
    /// to call more than once and must wake a blocked `run`.
    fn destroy(&self);

    /// Identity of the thread currently executing `run`, if any.
    fn execution_identity(&self) -> Option<ThreadId>;
}

/// Lifecycle state of a plugin as tracked by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    Registered,
    Initializing,
    Initialized,
    Running,
    Stopping,
    Stopped,
    /// Init or run failed; the plugin is excluded from further phases.
    Failed,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PluginState::Registered => "registered",
            PluginState::Initializing => "initializing",
            PluginState::Initialized => "initialized",
            PluginState::Running => "running",
            PluginState::Stopping => "stopping",
            PluginState::Stopped => "stopped",
            PluginState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in plugins and in the plugin host.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Plugin initialization failed during startup
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),
    /// Error occurred during plugin execution
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),
    /// Requested plugin was not found
    #[error("Plugin not found: {0}")]
    NotFound(String),
    /// Runtime error such as a panic or a thread that could not be spawned
    #[error("Plugin runtime error: {0}")]
    Runtime(String),
    /// The host no longer accepts registrations
    #[error("Plugin registration closed: {0}")]
    RegistrationClosed(String),
    /// Event bus interaction failed
    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

impl PluginError {
    /// Converts a `catch_unwind` payload into a runtime error.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        PluginError::Runtime(format!(
            "Plugin panicked: {}",
            crate::utils::panic_message(payload)
        ))
    }
}
