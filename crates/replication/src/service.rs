//! Table of live replicas plus the send/receive paths.
//!
//! The table is a [`DashMap`] keyed by [`ReplicaId`]; each entry holds its
//! replica behind its own `RwLock` so payload updates never need the table
//! lock. Registration from plugins and receive calls from a transport thread
//! can therefore run concurrently.

use crate::error::ReplicaError;
use crate::factory::ReplicaFactory;
use crate::replica::{AllocationId, Replica, ReplicaId, ReplicaType};
use crate::transport::{ReplicaPacket, ReplicaTransport};
use apertus_event_system::{core_events, current_timestamp, EventBus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A replica stored in the service table.
pub type SharedReplica = Arc<RwLock<Box<dyn Replica>>>;

/// Payload of [`core_events::REPLICA_RECEIVED`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaReceivedEvent {
    pub replica_id: ReplicaId,
    pub type_tag: String,
    pub name: String,
    pub owner_id: String,
    /// `true` when the packet created a new mirror
    pub created: bool,
    pub timestamp: u64,
}

pub struct ReplicaService {
    factory: Arc<ReplicaFactory>,
    transport: Arc<dyn ReplicaTransport>,
    events: Option<Arc<EventBus>>,
    replicas: DashMap<ReplicaId, SharedReplica>,
}

impl std::fmt::Debug for ReplicaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaService")
            .field("factory", &self.factory)
            .field("replicas", &self.replicas.len())
            .field("events", &self.events.is_some())
            .field("transport", &"[transport]")
            .finish()
    }
}

impl ReplicaService {
    pub fn new(factory: Arc<ReplicaFactory>, transport: Arc<dyn ReplicaTransport>) -> Self {
        Self {
            factory,
            transport,
            events: None,
            replicas: DashMap::new(),
        }
    }

    /// Publishes [`core_events::REPLICA_RECEIVED`] on `events` after every
    /// applied inbound packet.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn factory(&self) -> &Arc<ReplicaFactory> {
        &self.factory
    }

    // ============================================================================
    // Table
    // ============================================================================

    /// Inserts `replica` under its id. An existing entry with the same id is
    /// replaced.
    pub fn register_replica(&self, replica: Box<dyn Replica>) -> ReplicaId {
        let id = replica.unique_id();
        let type_tag = replica.type_tag().to_string();
        if self
            .replicas
            .insert(id, Arc::new(RwLock::new(replica)))
            .is_some()
        {
            debug!("🔁 Replaced replica {} ({})", id, type_tag);
        } else {
            debug!("📝 Registered replica {} ({})", id, type_tag);
        }
        id
    }

    /// Builds a replica through the factory and registers it.
    pub fn create_replica(
        &self,
        type_tag: &str,
        name: &str,
        synchronized: bool,
        owner_id: &str,
        is_host: bool,
    ) -> Result<ReplicaId, ReplicaError> {
        let replica = self
            .factory
            .create_replica(type_tag, name, synchronized, owner_id, is_host)?;
        Ok(self.register_replica(replica))
    }

    pub fn get(&self, id: ReplicaId) -> Option<SharedReplica> {
        self.replicas.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove_replica(&self, id: ReplicaId) -> Option<SharedReplica> {
        self.replicas.remove(&id).map(|(_, replica)| replica)
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<ReplicaId> {
        let mut ids: Vec<ReplicaId> = self.replicas.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Runs `f` against the replica `id` viewed as a `T`.
    pub fn with_replica<T, R>(&self, id: ReplicaId, f: impl FnOnce(&T) -> R) -> Result<R, ReplicaError>
    where
        T: ReplicaType,
    {
        let shared = self.get(id).ok_or(ReplicaError::NotFound(id))?;
        let guard = shared.read();
        let replica = guard
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| mismatch(id, T::TYPE_TAG, guard.type_tag()))?;
        Ok(f(replica))
    }

    /// Runs `f` against the replica `id` viewed as a mutable `T`.
    pub fn with_replica_mut<T, R>(
        &self,
        id: ReplicaId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, ReplicaError>
    where
        T: ReplicaType,
    {
        let shared = self.get(id).ok_or(ReplicaError::NotFound(id))?;
        let mut guard = shared.write();
        let found = guard.type_tag().to_string();
        let replica = guard
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| mismatch(id, T::TYPE_TAG, &found))?;
        Ok(f(replica))
    }

    // ============================================================================
    // Outbound
    // ============================================================================

    /// Hands the current state of `replica` to the transport.
    ///
    /// Returns `Ok(false)` without touching the transport when the replica
    /// is not synchronized, `Ok(true)` after exactly one transport send.
    pub fn send_replica(&self, replica: &dyn Replica) -> Result<bool, ReplicaError> {
        if !replica.is_synchronized() {
            trace!("Skipping unsynchronized replica {}", replica.unique_id());
            return Ok(false);
        }
        self.send_packet(ReplicaPacket::from_replica(replica))?;
        Ok(true)
    }

    /// Sends the registered replica `id`.
    pub fn send_replica_by_id(&self, id: ReplicaId) -> Result<bool, ReplicaError> {
        let shared = self.get(id).ok_or(ReplicaError::NotFound(id))?;
        let packet = {
            let replica = shared.read();
            if !replica.is_synchronized() {
                trace!("Skipping unsynchronized replica {}", id);
                return Ok(false);
            }
            ReplicaPacket::from_replica(&**replica)
        };
        self.send_packet(packet)?;
        Ok(true)
    }

    /// Sends every synchronized replica this side hosts. Mirrors are skipped.
    ///
    /// Returns the number of packets handed to the transport.
    pub fn send_all(&self) -> Result<usize, ReplicaError> {
        // Replica locks are only taken with no table lock held.
        let shared_replicas: Vec<SharedReplica> = self
            .replicas
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut sent = 0;
        for shared in shared_replicas {
            let packet = {
                let replica = shared.read();
                if !replica.meta().is_host || !replica.is_synchronized() {
                    continue;
                }
                ReplicaPacket::from_replica(&**replica)
            };
            self.send_packet(packet)?;
            sent += 1;
        }
        debug!("📤 Sent {} replicas", sent);
        Ok(sent)
    }

    fn send_packet(&self, packet: ReplicaPacket) -> Result<(), ReplicaError> {
        trace!(
            "Sending replica {} ({}, {} payload bytes)",
            packet.unique_id,
            packet.type_tag,
            packet.payload.len()
        );
        self.transport.send(&packet).map_err(|e| {
            warn!("❌ Transport rejected replica {}: {}", packet.unique_id, e);
            ReplicaError::from(e)
        })
    }

    // ============================================================================
    // Inbound
    // ============================================================================

    /// Applies an inbound packet.
    ///
    /// An id already in the table is updated in place; an unknown id gets a
    /// new mirror built through the factory from the wire type tag. A mirror
    /// adopts the wire id, is never a host and is synchronized. On any error
    /// the table is left as it was.
    pub fn receive_replica(&self, packet: &ReplicaPacket) -> Result<ReplicaId, ReplicaError> {
        let id = packet.unique_id;
        let allocation = AllocationId::parse(&packet.allocation_id)?;

        // Constructors and payload decoding run with no table lock held.
        let created = loop {
            if let Some(shared) = self.get(id) {
                if self.apply_update(id, &shared, packet)? {
                    break false;
                }
                continue;
            }

            let mut mirror = self.factory.create_replica_with_id(
                &packet.type_tag,
                id,
                &allocation.name,
                true,
                &allocation.owner_id,
                false,
            )?;
            mirror.deserialize(&packet.payload)?;

            match self.replicas.entry(id) {
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(RwLock::new(mirror)));
                    break true;
                }
                Entry::Occupied(_) => {
                    trace!("Replica {} registered while building its mirror", id);
                }
            }
        };

        debug!(
            "📥 Applied {} replica {} from {} ({})",
            packet.type_tag,
            id,
            allocation.owner_id,
            if created { "new mirror" } else { "update" }
        );

        if let Some(events) = &self.events {
            let notification = ReplicaReceivedEvent {
                replica_id: id,
                type_tag: packet.type_tag.clone(),
                name: allocation.name,
                owner_id: allocation.owner_id,
                created,
                timestamp: current_timestamp(),
            };
            if let Err(e) = events.trigger_json(core_events::REPLICA_RECEIVED, &notification) {
                warn!("Failed to publish replica notification: {}", e);
            }
        }

        Ok(id)
    }

    /// Writes `packet` into `shared`. Returns `Ok(false)` without touching it
    /// when `shared` is no longer the table entry for `id`.
    fn apply_update(
        &self,
        id: ReplicaId,
        shared: &SharedReplica,
        packet: &ReplicaPacket,
    ) -> Result<bool, ReplicaError> {
        let mut replica = shared.write();
        let current = self
            .replicas
            .get(&id)
            .map_or(false, |entry| Arc::ptr_eq(entry.value(), shared));
        if !current {
            trace!("Replica {} was replaced or removed during receive", id);
            return Ok(false);
        }

        if replica.type_tag() != packet.type_tag {
            return Err(mismatch(id, replica.type_tag(), &packet.type_tag));
        }
        replica.deserialize(&packet.payload)?;
        Ok(true)
    }

    /// Applies a batch of packets in order; each gets its own result.
    pub fn receive_replicas<'a, I>(&self, packets: I) -> Vec<Result<ReplicaId, ReplicaError>>
    where
        I: IntoIterator<Item = &'a ReplicaPacket>,
    {
        packets
            .into_iter()
            .map(|packet| {
                let result = self.receive_replica(packet);
                if let Err(e) = &result {
                    warn!("❌ Dropped inbound replica {}: {}", packet.unique_id, e);
                }
                result
            })
            .collect()
    }

    /// Decodes a raw frame (see [`ReplicaPacket::encode`]) and applies it.
    pub fn receive_frame(&self, frame: &[u8]) -> Result<ReplicaId, ReplicaError> {
        let packet = ReplicaPacket::decode(frame)?;
        self.receive_replica(&packet)
    }
}

fn mismatch(id: ReplicaId, expected: &str, found: &str) -> ReplicaError {
    ReplicaError::TypeMismatch {
        id,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}
