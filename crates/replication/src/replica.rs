//! # Replicas
//!
//! A replica is an identity-bearing data object that can be serialized to a
//! fixed binary layout and applied on a peer. Every replica carries a
//! [`ReplicaMeta`] fixed at construction plus its own payload fields.
//!
//! ## Ownership
//!
//! By convention exactly one side of a replicated pair is the host
//! (`is_host = true`) and is the only writer; mirrors created from inbound
//! packets are never hosts. Only replicas flagged `synchronized` are handed to
//! the outbound transport.

use crate::error::ReplicaError;
use crate::wire::{PayloadReader, PayloadWriter};
use serde::{Deserialize, Serialize};
use std::any::Any;
use uuid::Uuid;

/// Universal identifier for a replica.
///
/// Generated from the operating system's random source (UUID v4), so ids can
/// be created from any thread without a shared generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub Uuid);

impl ReplicaId {
    /// Creates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id from its hyphenated text form.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ReplicaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields shared by every replica, set once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaMeta {
    pub unique_id: ReplicaId,
    pub name: String,
    pub owner_id: String,
    pub is_host: bool,
    pub synchronized: bool,
}

impl ReplicaMeta {
    /// Metadata for a brand new replica with a fresh id.
    pub fn new(
        name: impl Into<String>,
        synchronized: bool,
        owner_id: impl Into<String>,
        is_host: bool,
    ) -> Self {
        Self::with_id(ReplicaId::new(), name, synchronized, owner_id, is_host)
    }

    /// Metadata that adopts an existing id, used for mirrors of remote
    /// replicas.
    pub fn with_id(
        unique_id: ReplicaId,
        name: impl Into<String>,
        synchronized: bool,
        owner_id: impl Into<String>,
        is_host: bool,
    ) -> Self {
        Self {
            unique_id,
            name: name.into(),
            owner_id: owner_id.into(),
            is_host,
            synchronized,
        }
    }

    /// Appends `name \0 owner \0 ('1' | '0')`.
    pub fn write_allocation_id(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(self.name.as_bytes());
        buffer.push(0);
        buffer.extend_from_slice(self.owner_id.as_bytes());
        buffer.push(0);
        buffer.push(if self.is_host { b'1' } else { b'0' });
    }
}

/// Decoded form of the allocation-id bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationId {
    pub name: String,
    pub owner_id: String,
    pub is_host: bool,
}

impl AllocationId {
    pub fn parse(bytes: &[u8]) -> Result<Self, ReplicaError> {
        let mut reader = PayloadReader::new("allocation id", bytes);
        let name = reader.read_str()?;
        let owner_id = reader.read_str()?;
        let is_host = match reader.read_u8()? {
            b'1' => true,
            b'0' => false,
            other => {
                return Err(ReplicaError::malformed(
                    "allocation id",
                    format!("invalid host flag {:#04x}", other),
                ))
            }
        };
        Ok(Self {
            name,
            owner_id,
            is_host,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::new();
        writer
            .write_str(&self.name)
            .write_str(&self.owner_id)
            .write_u8(if self.is_host { b'1' } else { b'0' });
        writer.into_bytes()
    }
}

/// Trait for objects that can be replicated through the replica service.
pub trait Replica: Send + Sync + Any + std::fmt::Debug {
    /// Metadata fixed at construction.
    fn meta(&self) -> &ReplicaMeta;

    /// Tag the concrete type is registered under in the factory.
    fn type_tag(&self) -> &str;

    /// Encodes the payload fields. Exact inverse of [`deserialize`](Replica::deserialize).
    fn serialize(&self) -> Vec<u8>;

    /// Overwrites the payload fields from `data`.
    ///
    /// Fails with [`ReplicaError::MalformedPayload`] when `data` is shorter
    /// than the type's minimum layout or otherwise does not parse; the
    /// replica is left unchanged in that case.
    fn deserialize(&mut self, data: &[u8]) -> Result<(), ReplicaError>;

    /// Appends the allocation id (`name \0 owner \0 host-flag`) to `buffer`.
    fn write_allocation_id(&self, buffer: &mut Vec<u8>) {
        self.meta().write_allocation_id(buffer);
    }

    fn unique_id(&self) -> ReplicaId {
        self.meta().unique_id
    }

    fn is_synchronized(&self) -> bool {
        self.meta().synchronized
    }

    /// Get the replica as Any for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Get the replica as Any for mutable downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A concrete replica type with a static tag, usable with the generic
/// registration helpers.
pub trait ReplicaType: Replica + Sized {
    const TYPE_TAG: &'static str;

    /// Builds a replica with default payload fields.
    fn from_meta(meta: ReplicaMeta) -> Self;
}
