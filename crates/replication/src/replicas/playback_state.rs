use crate::error::ReplicaError;
use crate::replica::{Replica, ReplicaMeta, ReplicaType};
use crate::wire::{PayloadReader, PayloadWriter};
use serde::{Deserialize, Serialize};
use std::any::Any;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
    Stopped,
    Finished,
    Error,
}

impl PlaybackStatus {
    fn to_wire(self) -> u8 {
        match self {
            PlaybackStatus::Idle => 0,
            PlaybackStatus::Playing => 1,
            PlaybackStatus::Paused => 2,
            PlaybackStatus::Stopped => 3,
            PlaybackStatus::Finished => 4,
            PlaybackStatus::Error => 5,
        }
    }

    fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            0 => PlaybackStatus::Idle,
            1 => PlaybackStatus::Playing,
            2 => PlaybackStatus::Paused,
            3 => PlaybackStatus::Stopped,
            4 => PlaybackStatus::Finished,
            5 => PlaybackStatus::Error,
            _ => return None,
        })
    }
}

/// Replicated transport state of a player.
///
/// Payload layout: `status: u8`, `position_ms: u64`, `stream_id \0`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStateReplica {
    meta: ReplicaMeta,
    status: PlaybackStatus,
    position_ms: u64,
    stream_id: String,
}

impl PlaybackStateReplica {
    pub const MIN_PAYLOAD_LEN: usize = 1 + 8 + 1;

    pub fn new(meta: ReplicaMeta) -> Self {
        Self {
            meta,
            status: PlaybackStatus::Idle,
            position_ms: 0,
            stream_id: String::new(),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn set_status(&mut self, status: PlaybackStatus) {
        self.status = status;
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn set_position_ms(&mut self, position_ms: u64) {
        self.position_ms = position_ms;
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn set_stream_id(&mut self, stream_id: impl Into<String>) {
        self.stream_id = stream_id.into();
    }
}

impl Replica for PlaybackStateReplica {
    fn meta(&self) -> &ReplicaMeta {
        &self.meta
    }

    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn serialize(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::with_capacity(Self::MIN_PAYLOAD_LEN + self.stream_id.len());
        writer
            .write_u8(self.status.to_wire())
            .write_u64(self.position_ms)
            .write_str(&self.stream_id);
        writer.into_bytes()
    }

    fn deserialize(&mut self, data: &[u8]) -> Result<(), ReplicaError> {
        let mut reader = PayloadReader::new(Self::TYPE_TAG, data);
        reader.require_len(Self::MIN_PAYLOAD_LEN)?;

        let raw_status = reader.read_u8()?;
        let status = PlaybackStatus::from_wire(raw_status).ok_or_else(|| {
            ReplicaError::malformed(Self::TYPE_TAG, format!("unknown status {}", raw_status))
        })?;
        let position_ms = reader.read_u64()?;
        let stream_id = reader.read_str()?;

        self.status = status;
        self.position_ms = position_ms;
        self.stream_id = stream_id;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ReplicaType for PlaybackStateReplica {
    const TYPE_TAG: &'static str = "PlaybackState";

    fn from_meta(meta: ReplicaMeta) -> Self {
        Self::new(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips() {
        let mut state = PlaybackStateReplica::new(ReplicaMeta::new("player", true, "me", true));
        state.set_status(PlaybackStatus::Paused);
        state.set_position_ms(90_000);
        state.set_stream_id("stream-42");

        let mut mirror = PlaybackStateReplica::new(ReplicaMeta::new("player", true, "me", false));
        mirror.deserialize(&state.serialize()).unwrap();
        assert_eq!(mirror.status(), PlaybackStatus::Paused);
        assert_eq!(mirror.position_ms(), 90_000);
        assert_eq!(mirror.stream_id(), "stream-42");
    }

    #[test]
    fn unknown_status_is_malformed() {
        let mut state = PlaybackStateReplica::new(ReplicaMeta::new("player", true, "me", true));
        let mut bytes = state.serialize();
        bytes[0] = 200;
        assert!(matches!(
            state.deserialize(&bytes),
            Err(ReplicaError::MalformedPayload { .. })
        ));
        assert_eq!(state.status(), PlaybackStatus::Idle);
    }
}
