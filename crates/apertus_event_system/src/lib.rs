//! # Apertus Event System
//!
//! The process-local event bus and the plugin contract that the Apertus plugin
//! host is built on.
//!
//! ## Core Features
//!
//! - **Asynchronous bus**: `trigger` only enqueues; a single dispatch worker
//!   delivers events in the order they were accepted
//! - **Failure isolation**: a subscriber that returns an error or panics is
//!   logged and counted, the worker carries on
//! - **Drain on stop**: everything queued before `stop` is delivered before the
//!   worker exits
//! - **Identity-based unsubscribe**: once `unsubscribe` returns the callback is
//!   never invoked again for that event name
//! - **Plugin contract**: the [`Plugin`] trait plus [`PluginBase`], which gives
//!   each plugin a private inbox and worker thread
//!
//! ## Quick Start Example
//!
//! ```rust
//! use apertus_event_system::*;
//!
//! let bus = create_event_bus();
//! let handle = bus.on(core_events::ON_START, |payload| {
//!     println!("started with {payload:?}");
//!     Ok(())
//! });
//!
//! bus.start().unwrap();
//! bus.trigger(core_events::ON_START, "");
//! bus.unsubscribe(core_events::ON_START, &handle);
//! bus.stop();
//! ```

pub mod base;
pub mod events;
pub mod plugin;
pub mod system;
pub mod utils;

pub use base::{PluginBase, PluginEventHandler};
pub use events::{
    callback, core_events, decode_payload, Event, EventCallback, EventError,
    PluginFailedEvent, PluginInitializedEvent, PluginsStoppedEvent,
};
pub use plugin::{Plugin, PluginError, PluginState};
pub use system::{EventBus, EventBusConfig, EventBusStats};
pub use utils::{create_event_bus, create_event_bus_with_config, current_timestamp, panic_message};
