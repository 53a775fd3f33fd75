//! # Utility Functions
//!
//! Small helpers shared by every crate in the workspace: timestamps, panic
//! payload conversion and the event bus factory.

use crate::system::{EventBus, EventBusConfig};
use std::any::Any;
use std::sync::Arc;

/// Returns the current Unix timestamp in seconds.
///
/// A clock set before the Unix epoch yields `0` rather than panicking.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Extracts a readable message from a `catch_unwind` payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Creates a new, not yet started, event bus with default settings.
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}

/// Creates a new, not yet started, event bus with explicit settings.
pub fn create_event_bus_with_config(config: EventBusConfig) -> Arc<EventBus> {
    Arc::new(EventBus::with_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::catch_unwind;

    #[test]
    fn panic_message_handles_str_and_string_payloads() {
        let payload = catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload), "static message");

        let code = 7;
        let payload = catch_unwind(move || panic!("formatted {}", code)).unwrap_err();
        assert_eq!(panic_message(payload), "formatted 7");
    }

    #[test]
    fn panic_message_falls_back_for_other_payloads() {
        let payload = catch_unwind(|| std::panic::panic_any(13u32)).unwrap_err();
        assert_eq!(panic_message(payload), "unknown panic payload");
    }

    #[test]
    fn timestamp_is_after_2020() {
        assert!(current_timestamp() > 1_577_836_800);
    }
}
