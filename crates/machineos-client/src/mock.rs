//! Mock MachineOSClient for unit testing
//!
//! An in-memory store with the API server's write semantics: resource
//! versions, generations, UIDs, the spec/status split and a watch stream.
//! Reconciler tests run against it without a cluster.

use futures::stream::{self, BoxStream, StreamExt};
use kube::Resource;
use machineos_crds::MachineOSResource;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::client::update_target;
use crate::client_trait::{MachineOSClientTrait, ResourceEvent};
use crate::error::ClientError;

const WATCH_CAPACITY: usize = 256;

#[derive(Debug)]
struct Store<K> {
    objects: BTreeMap<String, K>,
    // Cluster-wide counter, like etcd's revision
    last_resource_version: u64,
}

impl<K> Store<K> {
    fn next_resource_version(&mut self) -> String {
        self.last_resource_version += 1;
        self.last_resource_version.to_string()
    }
}

/// Mock MachineOSClient for testing
///
/// Clones share the same store and watch channel.
#[derive(Clone)]
pub struct MockMachineOSClient<K> {
    store: Arc<Mutex<Store<K>>>,
    events: broadcast::Sender<ResourceEvent<K>>,
}

impl<K: MachineOSResource> Default for MockMachineOSClient<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MachineOSResource> MockMachineOSClient<K> {
    /// Create an empty mock store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            store: Arc::new(Mutex::new(Store {
                objects: BTreeMap::new(),
                last_resource_version: 0,
            })),
            events,
        }
    }

    /// Insert an object as-is, bypassing validation (for test setup)
    ///
    /// Missing resourceVersion, generation and UID are filled in. Returns the
    /// stored object.
    pub fn insert(&self, resource: K) -> K {
        let mut store = self.lock();
        let mut resource = resource;
        let resource_version = store.next_resource_version();
        let meta = resource.meta_mut();
        meta.resource_version = Some(resource_version);
        meta.generation.get_or_insert(1);
        meta.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());

        let name = meta.name.clone().unwrap_or_default();
        store.objects.insert(name, resource.clone());
        resource
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Store<K>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    /// Broadcast a change. Called with the store lock held so events go out
    /// in resourceVersion order.
    fn publish(&self, event: ResourceEvent<K>) {
        // No receivers is not an error
        let _ = self.events.send(event);
    }
}

#[async_trait::async_trait]
impl<K: MachineOSResource> MachineOSClientTrait<K> for MockMachineOSClient<K> {
    async fn create(&self, resource: &K) -> Result<K, ClientError> {
        resource.validate_create()?;
        let name = resource.meta().name.clone().unwrap_or_default();

        let created = {
            let mut store = self.lock();
            if store.objects.contains_key(&name) {
                return Err(ClientError::already_exists(&Self::kind(), &name));
            }

            let mut created = resource.clone();
            created.clear_status();
            let resource_version = store.next_resource_version();
            let meta = created.meta_mut();
            meta.resource_version = Some(resource_version);
            meta.generation = Some(1);
            meta.uid = Some(uuid::Uuid::new_v4().to_string());

            store.objects.insert(name.clone(), created.clone());
            self.publish(ResourceEvent::Applied(created.clone()));
            created
        };

        debug!(kind = %Self::kind(), name = %name, "Created resource");
        Ok(created)
    }

    async fn get(&self, name: &str) -> Result<K, ClientError> {
        self.lock()
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::not_found(&Self::kind(), name))
    }

    async fn list(&self) -> Result<Vec<K>, ClientError> {
        Ok(self.lock().objects.values().cloned().collect())
    }

    async fn update(&self, resource: &K) -> Result<K, ClientError> {
        let (name, resource_version) = update_target(resource)?;

        let updated = {
            let mut store = self.lock();
            let current = store
                .objects
                .get(&name)
                .ok_or_else(|| ClientError::not_found(&Self::kind(), &name))?;
            if current.meta().resource_version.as_deref() != Some(resource_version.as_str()) {
                warn!(kind = %Self::kind(), name = %name, "Stale resourceVersion on update");
                return Err(ClientError::conflict(&Self::kind(), &name));
            }

            let mut updated = resource.clone();
            updated.adopt_status(current);
            updated.validate_update(current)?;

            let generation = current.meta().generation.unwrap_or(1);
            let generation = if updated.spec_differs(current) {
                generation + 1
            } else {
                generation
            };
            let uid = current.meta().uid.clone();

            let next_version = store.next_resource_version();
            let meta = updated.meta_mut();
            meta.resource_version = Some(next_version);
            meta.generation = Some(generation);
            meta.uid = uid;

            store.objects.insert(name.clone(), updated.clone());
            self.publish(ResourceEvent::Applied(updated.clone()));
            updated
        };

        debug!(
            kind = %Self::kind(),
            name = %name,
            generation = ?updated.meta().generation,
            "Updated resource"
        );
        Ok(updated)
    }

    async fn update_status(&self, resource: &K) -> Result<K, ClientError> {
        let (name, resource_version) = update_target(resource)?;

        let updated = {
            let mut store = self.lock();
            let current = store
                .objects
                .get(&name)
                .ok_or_else(|| ClientError::not_found(&Self::kind(), &name))?;
            if current.meta().resource_version.as_deref() != Some(resource_version.as_str()) {
                warn!(kind = %Self::kind(), name = %name, "Stale resourceVersion on status update");
                return Err(ClientError::conflict(&Self::kind(), &name));
            }

            let mut updated = current.clone();
            updated.adopt_status(resource);
            updated.validate_update(current)?;

            let next_version = store.next_resource_version();
            updated.meta_mut().resource_version = Some(next_version);

            store.objects.insert(name.clone(), updated.clone());
            self.publish(ResourceEvent::Applied(updated.clone()));
            updated
        };

        debug!(kind = %Self::kind(), name = %name, "Updated resource status");
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        {
            let mut store = self.lock();
            let removed = store
                .objects
                .remove(name)
                .ok_or_else(|| ClientError::not_found(&Self::kind(), name))?;
            self.publish(ResourceEvent::Deleted(removed));
        }

        debug!(kind = %Self::kind(), name = %name, "Deleted resource");
        Ok(())
    }

    fn watch(&self) -> BoxStream<'static, Result<ResourceEvent<K>, ClientError>> {
        // Subscribe before the snapshot so no write falls between the two
        let receiver = self.events.subscribe();
        let existing: Vec<Result<ResourceEvent<K>, ClientError>> = self
            .lock()
            .objects
            .values()
            .cloned()
            .map(|o| Ok(ResourceEvent::Applied(o)))
            .collect();

        let changes = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => Some((
                    Err(ClientError::Watch(format!("watch fell behind by {skipped} events"))),
                    receiver,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        stream::iter(existing).chain(changes).boxed()
    }
}
