//! Deferred registration of replica types.
//!
//! Types can be queued before a [`ReplicaFactory`] exists and flushed into it
//! in one pass once it does.

use crate::factory::ReplicaFactory;
use crate::replica::{Replica, ReplicaMeta, ReplicaType};
use parking_lot::Mutex;
use tracing::{debug, info};

type PendingRegistration = Box<dyn FnOnce(&ReplicaFactory) + Send>;

#[derive(Default)]
pub struct ReplicaRegistrar {
    pending: Mutex<Vec<(String, PendingRegistration)>>,
}

impl std::fmt::Debug for ReplicaRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaRegistrar")
            .field("pending", &self.pending_types())
            .finish()
    }
}

impl ReplicaRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a constructor for `type_tag`.
    pub fn add_pending_registration<F>(&self, type_tag: impl Into<String>, constructor: F)
    where
        F: Fn(ReplicaMeta) -> Box<dyn Replica> + Send + Sync + 'static,
    {
        let type_tag = type_tag.into();
        let tag = type_tag.clone();
        self.pending.lock().push((
            type_tag.clone(),
            Box::new(move |factory: &ReplicaFactory| {
                factory.register_replica_type(tag, constructor)
            }),
        ));
        debug!("Queued replica type {} for registration", type_tag);
    }

    /// Queues a [`ReplicaType`] under its static tag.
    pub fn add_pending<T: ReplicaType>(&self) {
        self.add_pending_registration(T::TYPE_TAG, |meta| {
            Box::new(T::from_meta(meta)) as Box<dyn Replica>
        });
    }

    /// Registers every queued type in queue order and empties the queue.
    ///
    /// Returns how many types were registered; a second call with nothing
    /// queued returns 0.
    pub fn register_all_replicas(&self, factory: &ReplicaFactory) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            debug!("No pending replica registrations");
            return 0;
        }

        let count = pending.len();
        for (type_tag, register) in pending {
            debug!("Registering pending replica type {}", type_tag);
            register(factory);
        }
        info!("📦 Registered {} pending replica types", count);
        count
    }

    pub fn pending_types(&self) -> Vec<String> {
        self.pending
            .lock()
            .iter()
            .map(|(tag, _)| tag.clone())
            .collect()
    }
}
