use crate::error::ReplicaError;
use crate::replica::{Replica, ReplicaMeta, ReplicaType};
use crate::wire::{PayloadReader, PayloadWriter};
use std::any::Any;

/// Replicated state of an audio stream.
///
/// Payload layout: `stream_url \0`, `playback_position: f32`, `volume: f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioReplica {
    meta: ReplicaMeta,
    stream_url: String,
    /// Seconds into the stream
    playback_position: f32,
    /// Linear gain, 0.0 to 1.0
    volume: f32,
}

impl AudioReplica {
    /// Empty terminator plus two f32 fields.
    pub const MIN_PAYLOAD_LEN: usize = 1 + 4 + 4;

    pub fn new(meta: ReplicaMeta) -> Self {
        Self {
            meta,
            stream_url: String::new(),
            playback_position: 0.0,
            volume: 1.0,
        }
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn set_stream_url(&mut self, url: impl Into<String>) {
        self.stream_url = url.into();
    }

    pub fn playback_position(&self) -> f32 {
        self.playback_position
    }

    pub fn set_playback_position(&mut self, seconds: f32) {
        self.playback_position = seconds.max(0.0);
    }

    pub fn advance(&mut self, seconds: f32) {
        self.set_playback_position(self.playback_position + seconds);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }
}

impl Replica for AudioReplica {
    fn meta(&self) -> &ReplicaMeta {
        &self.meta
    }

    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn serialize(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::with_capacity(self.stream_url.len() + Self::MIN_PAYLOAD_LEN);
        writer
            .write_str(&self.stream_url)
            .write_f32(self.playback_position)
            .write_f32(self.volume);
        writer.into_bytes()
    }

    fn deserialize(&mut self, data: &[u8]) -> Result<(), ReplicaError> {
        let mut reader = PayloadReader::new(Self::TYPE_TAG, data);
        reader.require_len(Self::MIN_PAYLOAD_LEN)?;

        let stream_url = reader.read_str()?;
        let playback_position = reader.read_f32()?;
        let volume = reader.read_f32()?;

        self.stream_url = stream_url;
        self.playback_position = playback_position;
        self.volume = volume;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ReplicaType for AudioReplica {
    const TYPE_TAG: &'static str = "Audio";

    fn from_meta(meta: ReplicaMeta) -> Self {
        Self::new(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AudioReplica {
        let mut audio = AudioReplica::new(ReplicaMeta::new("music", true, "host-1", true));
        audio.set_stream_url("http://radio.example/stream.mp3");
        audio.set_playback_position(12.5);
        audio.set_volume(0.75);
        audio
    }

    #[test]
    fn payload_round_trips_into_a_mirror() {
        let source = sample();
        let mut mirror = AudioReplica::new(ReplicaMeta::with_id(
            source.unique_id(),
            "music",
            true,
            "host-1",
            false,
        ));

        mirror.deserialize(&source.serialize()).unwrap();
        assert_eq!(mirror.stream_url(), source.stream_url());
        assert_eq!(mirror.playback_position(), 12.5);
        assert_eq!(mirror.volume(), 0.75);
        assert_eq!(mirror.unique_id(), source.unique_id());
    }

    #[test]
    fn payload_does_not_carry_the_name() {
        let bytes = sample().serialize();
        assert!(!bytes.windows(5).any(|w| w == b"music"));
        assert_eq!(bytes.len(), "http://radio.example/stream.mp3".len() + 9);
    }

    #[test]
    fn truncated_payload_is_rejected_and_state_kept() {
        let mut audio = sample();
        let err = audio.deserialize(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, ReplicaError::MalformedPayload { .. }));
        assert_eq!(audio.playback_position(), 12.5);

        let bytes = sample().serialize();
        let err = audio.deserialize(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ReplicaError::MalformedPayload { .. }));
        assert_eq!(audio.volume(), 0.75);
    }

    #[test]
    fn setters_clamp_values() {
        let mut audio = sample();
        audio.set_volume(3.0);
        audio.set_playback_position(-1.0);
        assert_eq!(audio.volume(), 1.0);
        assert_eq!(audio.playback_position(), 0.0);
        audio.advance(1.5);
        assert_eq!(audio.playback_position(), 1.5);
    }
}
