//! Runtime registry mapping type tags to replica constructors.

use crate::error::ReplicaError;
use crate::replica::{Replica, ReplicaId, ReplicaMeta, ReplicaType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Constructor stored in the factory. Receives fully populated metadata.
pub type ReplicaConstructor = Arc<dyn Fn(ReplicaMeta) -> Box<dyn Replica> + Send + Sync>;

#[derive(Default)]
pub struct ReplicaFactory {
    constructors: RwLock<HashMap<String, ReplicaConstructor>>,
}

impl std::fmt::Debug for ReplicaFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaFactory")
            .field("types", &self.registered_types())
            .finish()
    }
}

impl ReplicaFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `constructor` under `type_tag`. Registering a tag again
    /// replaces the previous constructor.
    pub fn register_replica_type<F>(&self, type_tag: impl Into<String>, constructor: F)
    where
        F: Fn(ReplicaMeta) -> Box<dyn Replica> + Send + Sync + 'static,
    {
        let type_tag = type_tag.into();
        let previous = self
            .constructors
            .write()
            .insert(type_tag.clone(), Arc::new(constructor));

        if previous.is_some() {
            debug!("🔁 Replaced constructor for replica type {}", type_tag);
        } else {
            info!("📝 Registered replica type {}", type_tag);
        }
    }

    /// Registers a [`ReplicaType`] under its static tag.
    pub fn register<T: ReplicaType>(&self) {
        self.register_replica_type(T::TYPE_TAG, |meta| Box::new(T::from_meta(meta)) as Box<dyn Replica>);
    }

    /// Builds a new replica with a fresh id.
    pub fn create_replica(
        &self,
        type_tag: &str,
        name: &str,
        synchronized: bool,
        owner_id: &str,
        is_host: bool,
    ) -> Result<Box<dyn Replica>, ReplicaError> {
        self.create_from_meta(type_tag, ReplicaMeta::new(name, synchronized, owner_id, is_host))
    }

    /// Builds a replica that adopts `unique_id`, e.g. a mirror of a remote
    /// replica.
    pub fn create_replica_with_id(
        &self,
        type_tag: &str,
        unique_id: ReplicaId,
        name: &str,
        synchronized: bool,
        owner_id: &str,
        is_host: bool,
    ) -> Result<Box<dyn Replica>, ReplicaError> {
        self.create_from_meta(
            type_tag,
            ReplicaMeta::with_id(unique_id, name, synchronized, owner_id, is_host),
        )
    }

    pub fn create_from_meta(
        &self,
        type_tag: &str,
        meta: ReplicaMeta,
    ) -> Result<Box<dyn Replica>, ReplicaError> {
        // Clone the constructor so it runs without the registry lock held.
        let constructor = self
            .constructors
            .read()
            .get(type_tag)
            .cloned()
            .ok_or_else(|| ReplicaError::UnknownType(type_tag.to_string()))?;
        Ok(constructor(meta))
    }

    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.constructors.read().contains_key(type_tag)
    }

    /// Registered tags, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.constructors.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replicas::{AudioReplica, PlaybackStateReplica};

    #[test]
    fn unknown_type_is_an_error() {
        let factory = ReplicaFactory::new();
        let err = factory
            .create_replica("Video", "v", true, "me", true)
            .unwrap_err();
        assert!(matches!(err, ReplicaError::UnknownType(tag) if tag == "Video"));
    }

    #[test]
    fn created_replicas_carry_the_requested_metadata() {
        let factory = ReplicaFactory::new();
        factory.register::<AudioReplica>();

        let replica = factory
            .create_replica("Audio", "song", false, "owner", true)
            .unwrap();
        assert_eq!(replica.type_tag(), "Audio");
        assert_eq!(replica.meta().name, "song");
        assert_eq!(replica.meta().owner_id, "owner");
        assert!(replica.meta().is_host);
        assert!(!replica.is_synchronized());
        assert!(replica.as_any().downcast_ref::<AudioReplica>().is_some());
    }

    #[test]
    fn create_with_id_adopts_the_id() {
        let factory = ReplicaFactory::new();
        factory.register::<PlaybackStateReplica>();
        let id = ReplicaId::new();

        let replica = factory
            .create_replica_with_id("PlaybackState", id, "p", true, "remote", false)
            .unwrap();
        assert_eq!(replica.unique_id(), id);
    }

    #[test]
    fn re_registration_overwrites() {
        let factory = ReplicaFactory::new();
        factory.register::<AudioReplica>();
        factory.register_replica_type("Audio", |meta| {
            let mut audio = AudioReplica::new(meta);
            audio.set_volume(0.1);
            Box::new(audio) as Box<dyn Replica>
        });

        let replica = factory.create_replica("Audio", "a", true, "o", true).unwrap();
        let audio = replica.as_any().downcast_ref::<AudioReplica>().unwrap();
        assert_eq!(audio.volume(), 0.1);
        assert_eq!(factory.registered_types(), vec!["Audio".to_string()]);
    }
}
