//! MachineOSClient trait for mocking
//!
//! Reconcilers and tests program against this trait. The Kubernetes-backed
//! [`MachineOSClient`](crate::MachineOSClient) implements it, as does the
//! in-memory mock behind the `test-util` feature.

use futures::stream::BoxStream;
use machineos_crds::MachineOSResource;

use crate::error::ClientError;

/// A change observed on a watched kind
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<K> {
    /// The object was created or modified (or was present when the watch started)
    Applied(K),
    /// The object was deleted; carries its last known state
    Deleted(K),
}

impl<K> ResourceEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            ResourceEvent::Applied(o) | ResourceEvent::Deleted(o) => o,
        }
    }
}

/// Store operations for one cluster-scoped machine OS kind, keyed by name
///
/// Every write is validated before it reaches the store. Updates carry the
/// `metadata.resourceVersion` they were read at; writing from a stale
/// version fails with [`ClientError::Conflict`].
#[async_trait::async_trait]
pub trait MachineOSClientTrait<K: MachineOSResource>: Send + Sync {
    /// Create a new object. Any status on `resource` is dropped.
    async fn create(&self, resource: &K) -> Result<K, ClientError>;

    async fn get(&self, name: &str) -> Result<K, ClientError>;

    /// Like [`get`](Self::get), mapping not-found to `None`
    async fn get_opt(&self, name: &str) -> Result<Option<K>, ClientError> {
        match self.get(name).await {
            Ok(resource) => Ok(Some(resource)),
            Err(ClientError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<K>, ClientError>;

    /// Replace metadata and spec. Status in `resource` is ignored.
    async fn update(&self, resource: &K) -> Result<K, ClientError>;

    /// Replace status. Spec in `resource` is ignored.
    async fn update_status(&self, resource: &K) -> Result<K, ClientError>;

    async fn delete(&self, name: &str) -> Result<(), ClientError>;

    /// Stream of changes, starting with every existing object as `Applied`
    fn watch(&self) -> BoxStream<'static, Result<ResourceEvent<K>, ClientError>>;
}
