//! Transport boundary for replica packets.
//!
//! The runtime does not ship a network transport. [`ReplicaTransport`] is the
//! seam a real one plugs into; [`LoopbackTransport`] records packets in memory
//! for tests and single-process setups.

use crate::error::{ReplicaError, TransportError};
use crate::replica::{Replica, ReplicaId};
use parking_lot::Mutex;

/// One replica update as handed to (or received from) a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaPacket {
    /// Factory tag used to build a mirror on the receiving side
    pub type_tag: String,
    pub unique_id: ReplicaId,
    /// `name \0 owner \0 host-flag`
    pub allocation_id: Vec<u8>,
    /// Output of [`Replica::serialize`]
    pub payload: Vec<u8>,
}

impl ReplicaPacket {
    /// Fixed part of a frame: empty tag terminator, id, two lengths.
    const MIN_FRAME_LEN: usize = 1 + 16 + 4 + 4;

    /// Captures the current state of `replica`.
    pub fn from_replica(replica: &dyn Replica) -> Self {
        let mut allocation_id = Vec::new();
        replica.write_allocation_id(&mut allocation_id);
        Self {
            type_tag: replica.type_tag().to_string(),
            unique_id: replica.unique_id(),
            allocation_id,
            payload: replica.serialize(),
        }
    }

    /// Frames the packet: `type_tag \0`, 16 id bytes, then the allocation id
    /// and the payload, each prefixed with a little-endian `u32` length.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(
            Self::MIN_FRAME_LEN + self.type_tag.len() + self.allocation_id.len() + self.payload.len(),
        );
        frame.extend_from_slice(self.type_tag.as_bytes());
        frame.push(0);
        frame.extend_from_slice(self.unique_id.as_bytes());
        frame.extend_from_slice(&(self.allocation_id.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.allocation_id);
        frame.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ReplicaError> {
        if frame.len() < Self::MIN_FRAME_LEN {
            return Err(ReplicaError::malformed("packet", "frame too short"));
        }

        let tag_end = frame
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ReplicaError::malformed("packet", "unterminated type tag"))?;
        let type_tag = std::str::from_utf8(&frame[..tag_end])
            .map_err(|e| ReplicaError::malformed("packet", format!("invalid type tag: {}", e)))?
            .to_string();

        let mut cursor = tag_end + 1;
        let id_bytes: [u8; 16] = take(frame, &mut cursor, 16)?
            .try_into()
            .map_err(|_| ReplicaError::malformed("packet", "truncated id"))?;
        let allocation_id = take_prefixed(frame, &mut cursor)?.to_vec();
        let payload = take_prefixed(frame, &mut cursor)?.to_vec();

        if cursor != frame.len() {
            return Err(ReplicaError::malformed(
                "packet",
                format!("{} trailing bytes", frame.len() - cursor),
            ));
        }

        Ok(Self {
            type_tag,
            unique_id: ReplicaId::from_bytes(id_bytes),
            allocation_id,
            payload,
        })
    }
}

fn take<'a>(frame: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], ReplicaError> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= frame.len())
        .ok_or_else(|| ReplicaError::malformed("packet", "frame truncated"))?;
    let slice = &frame[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn take_prefixed<'a>(frame: &'a [u8], cursor: &mut usize) -> Result<&'a [u8], ReplicaError> {
    let len_bytes = take(frame, cursor, 4)?;
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    take(frame, cursor, len)
}

/// Outbound side of replication.
pub trait ReplicaTransport: Send + Sync {
    fn send(&self, packet: &ReplicaPacket) -> Result<(), TransportError>;
}

/// Records every packet it is asked to send.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    sent: Mutex<Vec<ReplicaPacket>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of every packet sent so far.
    pub fn sent(&self) -> Vec<ReplicaPacket> {
        self.sent.lock().clone()
    }

    /// Removes and returns the recorded packets.
    pub fn take_sent(&self) -> Vec<ReplicaPacket> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl ReplicaTransport for LoopbackTransport {
    fn send(&self, packet: &ReplicaPacket) -> Result<(), TransportError> {
        self.sent.lock().push(packet.clone());
        Ok(())
    }
}
