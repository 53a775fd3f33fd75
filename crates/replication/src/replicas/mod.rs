//! Concrete replica types shipped with the runtime.

mod audio;
mod playback_state;

pub use audio::AudioReplica;
pub use playback_state::{PlaybackStateReplica, PlaybackStatus};
