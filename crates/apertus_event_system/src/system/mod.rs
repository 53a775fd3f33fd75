/// Event bus module - broken down into manageable components
mod core;
mod emitters;
mod handlers;
mod stats;

pub use self::core::{EventBus, EventBusConfig};
pub use stats::EventBusStats;
