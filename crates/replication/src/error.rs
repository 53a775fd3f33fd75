use crate::replica::ReplicaId;

/// Errors raised by the replica factory, codecs and service.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// No constructor is registered under the type tag
    #[error("Unknown replica type: {0}")]
    UnknownType(String),
    /// The payload does not match the type's binary layout
    #[error("Malformed {type_tag} payload: {reason}")]
    MalformedPayload { type_tag: String, reason: String },
    /// An inbound packet addresses a replica of a different type
    #[error("Replica {id} is a {expected}, packet carries {found}")]
    TypeMismatch {
        id: ReplicaId,
        expected: String,
        found: String,
    },
    /// No replica with this id is registered
    #[error("Replica not found: {0}")]
    NotFound(ReplicaId),
    /// The transport rejected an outbound packet
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ReplicaError {
    pub fn malformed(type_tag: &str, reason: impl Into<String>) -> Self {
        ReplicaError::MalformedPayload {
            type_tag: type_tag.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by a [`ReplicaTransport`](crate::ReplicaTransport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Transport closed")]
    Closed,
}
