//! # Replication
//!
//! Identity-bearing data objects that serialize to a fixed binary layout and
//! can be mirrored on a peer.
//!
//! - [`ReplicaFactory`] maps a type tag to a constructor at runtime
//! - [`ReplicaRegistrar`] queues registrations until a factory exists
//! - [`ReplicaService`] owns the table of live replicas, gates outbound sends
//!   on the `synchronized` flag and applies inbound packets, building mirrors
//!   through the factory for ids it has not seen before
//! - [`ReplicaTransport`] is the seam to whatever carries packets between
//!   peers; [`LoopbackTransport`] records them in memory
//!
//! ```rust
//! use replication::*;
//! use std::sync::Arc;
//!
//! let registrar = ReplicaRegistrar::new();
//! registrar.add_pending::<AudioReplica>();
//!
//! let factory = Arc::new(ReplicaFactory::new());
//! registrar.register_all_replicas(&factory);
//!
//! let transport = Arc::new(LoopbackTransport::new());
//! let service = ReplicaService::new(factory, transport.clone());
//! let id = service.create_replica("Audio", "music", true, "host", true).unwrap();
//! service.send_replica_by_id(id).unwrap();
//! assert_eq!(transport.len(), 1);
//! ```

pub mod error;
pub mod factory;
pub mod registrar;
pub mod replica;
pub mod replicas;
pub mod service;
pub mod transport;
pub mod wire;

pub use error::{ReplicaError, TransportError};
pub use factory::{ReplicaConstructor, ReplicaFactory};
pub use registrar::ReplicaRegistrar;
pub use replica::{AllocationId, Replica, ReplicaId, ReplicaMeta, ReplicaType};
pub use replicas::{AudioReplica, PlaybackStateReplica, PlaybackStatus};
pub use service::{ReplicaReceivedEvent, ReplicaService, SharedReplica};
pub use transport::{LoopbackTransport, ReplicaPacket, ReplicaTransport};
pub use wire::{PayloadReader, PayloadWriter};
