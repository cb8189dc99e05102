//! Kubernetes-backed machine OS store client
//!
//! Every update carries the caller's `metadata.resourceVersion`. A read at an
//! older version fails with [`ClientError::Conflict`] before validation runs,
//! and a 409 from the API server for a write that raced maps to the same error.

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use kube_runtime::watcher;
use machineos_crds::{MachineOSResource, ValidationError};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::client_trait::{MachineOSClientTrait, ResourceEvent};
use crate::error::ClientError;

/// Store client for one machine OS kind backed by the Kubernetes API
#[derive(Clone)]
pub struct MachineOSClient<K> {
    api: Api<K>,
}

impl<K: MachineOSResource> MachineOSClient<K> {
    /// Create a client for the cluster-scoped kind `K`
    pub fn new(client: Client) -> Self {
        Self::from_api(Api::all(client))
    }

    pub fn from_api(api: Api<K>) -> Self {
        Self { api }
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    async fn current(&self, name: &str) -> Result<K, ClientError> {
        self.api.get(name).await.map_err(|e| map_kube_error(e, &Self::kind(), name))
    }

    /// Fetch the stored object, failing with a conflict if it moved past `resource_version`
    async fn current_at(&self, name: &str, resource_version: &str) -> Result<K, ClientError> {
        let current = self.current(name).await?;
        if current.meta().resource_version.as_deref() != Some(resource_version) {
            warn!(kind = %Self::kind(), name = %name, "Stale resourceVersion on update");
            return Err(ClientError::conflict(&Self::kind(), name));
        }
        Ok(current)
    }
}

/// Serialize the status of `resource` for a merge patch
///
/// Empty conditions and a zero observedGeneration are omitted by the
/// serializer, and a merge patch leaves omitted keys untouched, so both are
/// written out explicitly.
fn status_patch_body<K: MachineOSResource>(resource: &K) -> Result<Value, ClientError> {
    let mut status = serde_json::to_value(resource)?
        .get("status")
        .cloned()
        .unwrap_or(Value::Null);
    if let Some(fields) = status.as_object_mut() {
        fields.entry("conditions").or_insert_with(|| Value::Array(Vec::new()));
        fields.entry("observedGeneration").or_insert_with(|| json!(0));
    }
    Ok(status)
}

/// Name and resourceVersion of an object about to be updated
pub(crate) fn update_target<K: MachineOSResource>(resource: &K) -> Result<(String, String), ClientError> {
    let meta = resource.meta();
    let name = meta
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ValidationError::required("metadata.name", "name is required"))?;
    let resource_version = meta
        .resource_version
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ValidationError::required(
                "metadata.resourceVersion",
                "updates must carry the resourceVersion they were read at",
            )
        })?;
    Ok((name, resource_version))
}

/// Map API status codes onto the store error taxonomy
pub(crate) fn map_kube_error(err: kube::Error, kind: &str, name: &str) -> ClientError {
    match err {
        kube::Error::Api(ref e) if e.code == 404 => ClientError::not_found(kind, name),
        kube::Error::Api(ref e) if e.code == 409 && e.reason == "AlreadyExists" => {
            ClientError::already_exists(kind, name)
        }
        kube::Error::Api(ref e) if e.code == 409 => ClientError::conflict(kind, name),
        other => ClientError::Kube(other),
    }
}

#[async_trait::async_trait]
impl<K: MachineOSResource> MachineOSClientTrait<K> for MachineOSClient<K> {
    async fn create(&self, resource: &K) -> Result<K, ClientError> {
        resource.validate_create()?;
        let name = resource.meta().name.clone().unwrap_or_default();

        let mut body = resource.clone();
        body.clear_status();
        let created = self
            .api
            .create(&PostParams::default(), &body)
            .await
            .map_err(|e| map_kube_error(e, &Self::kind(), &name))?;

        debug!(kind = %Self::kind(), name = %name, "Created resource");
        Ok(created)
    }

    async fn get(&self, name: &str) -> Result<K, ClientError> {
        self.current(name).await
    }

    async fn list(&self) -> Result<Vec<K>, ClientError> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn update(&self, resource: &K) -> Result<K, ClientError> {
        let (name, resource_version) = update_target(resource)?;
        let current = self.current_at(&name, &resource_version).await?;

        let mut merged = resource.clone();
        merged.adopt_status(&current);
        if let Err(e) = merged.validate_update(&current) {
            warn!(kind = %Self::kind(), name = %name, error = %e, "Rejected update");
            return Err(e.into());
        }

        let updated = self
            .api
            .replace(&name, &PostParams::default(), &merged)
            .await
            .map_err(|e| map_kube_error(e, &Self::kind(), &name))?;

        debug!(
            kind = %Self::kind(),
            name = %name,
            from = %resource_version,
            to = ?updated.meta().resource_version,
            "Updated resource"
        );
        Ok(updated)
    }

    async fn update_status(&self, resource: &K) -> Result<K, ClientError> {
        let (name, resource_version) = update_target(resource)?;
        let current = self.current_at(&name, &resource_version).await?;

        let mut merged = current.clone();
        merged.adopt_status(resource);
        if let Err(e) = merged.validate_update(&current) {
            warn!(kind = %Self::kind(), name = %name, error = %e, "Rejected status update");
            return Err(e.into());
        }

        let status = status_patch_body(&merged)?;
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });

        let updated = self
            .api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, &Self::kind(), &name))?;

        debug!(kind = %Self::kind(), name = %name, "Updated resource status");
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, &Self::kind(), name))?;
        debug!(kind = %Self::kind(), name = %name, "Deleted resource");
        Ok(())
    }

    fn watch(&self) -> BoxStream<'static, Result<ResourceEvent<K>, ClientError>> {
        watcher(self.api.clone(), watcher::Config::default())
            .map_err(|e| ClientError::Watch(format!("Watcher stream error: {e}")))
            .try_filter_map(|event| async move {
                Ok(match event {
                    watcher::Event::Apply(o) | watcher::Event::InitApply(o) => {
                        Some(ResourceEvent::Applied(o))
                    }
                    watcher::Event::Delete(o) => Some(ResourceEvent::Deleted(o)),
                    watcher::Event::Init | watcher::Event::InitDone => None,
                })
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use http::{Request, Response, StatusCode};
    use kube::client::Body;
    use machineos_crds::{
        BuildConfig, Condition, ConditionStatus, MachineOSBuild, MachineOSBuildSpec, ObjectReference,
    };
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    const DIGESTED: &str =
        "quay.io/openshift/os@sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const DIGESTED_2: &str =
        "quay.io/openshift/os@sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

    /// Requests seen by the fake API server, as (method, JSON body)
    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    /// A client whose API server answers with `responses` in order
    fn fake_api(responses: Vec<(StatusCode, Value)>) -> (MachineOSClient<MachineOSBuild>, Seen) {
        let seen: Seen = Arc::default();
        let responses = Arc::new(Mutex::new(responses.into_iter()));
        let recorder = Arc::clone(&seen);
        let service = tower::service_fn(move |request: Request<Body>| {
            let recorder = Arc::clone(&recorder);
            let responses = Arc::clone(&responses);
            async move {
                let method = request.method().to_string();
                let bytes = request.into_body().collect_bytes().await.unwrap();
                let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                recorder.lock().unwrap().push((method, body));

                let (status, body) = responses.lock().unwrap().next().expect("unexpected request");
                let response = Response::builder()
                    .status(status)
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap();
                Ok::<_, Infallible>(response)
            }
        });
        let client = kube::Client::new(service, "default");
        (MachineOSClient::new(client), seen)
    }

    fn methods(seen: &Seen) -> Vec<String> {
        seen.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    fn api_status(code: u16, reason: &str) -> (StatusCode, Value) {
        (
            StatusCode::from_u16(code).unwrap(),
            json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": format!("request failed: {reason}"),
                "reason": reason,
                "code": code
            }),
        )
    }

    fn stored(build: &MachineOSBuild, resource_version: &str) -> MachineOSBuild {
        let mut build = build.clone();
        build.metadata.resource_version = Some(resource_version.to_string());
        build.metadata.generation = Some(1);
        build
    }

    fn ok(build: &MachineOSBuild) -> (StatusCode, Value) {
        (StatusCode::OK, serde_json::to_value(build).unwrap())
    }

    fn record(build: &mut MachineOSBuild, seconds: i64, pullspec: &str, image: &str) {
        build
            .ensure_status()
            .record_successful_build(
                Utc.timestamp_opt(seconds, 0).single().unwrap(),
                pullspec,
                ObjectReference::machine_os_image(image),
            )
            .unwrap();
    }

    fn pool_build() -> MachineOSBuild {
        MachineOSBuild::new(
            "pool-a",
            MachineOSBuildSpec {
                containerfile: "FROM base\nRUN x".to_string(),
                build_config: BuildConfig::machine_config_pool("pool-a"),
                base_os_image: String::new(),
                node: None,
            },
        )
    }

    #[test]
    fn test_update_target_requires_resource_version() {
        let mut build = pool_build();
        let err = update_target(&build).unwrap_err();
        assert!(
            matches!(err, ClientError::Validation(ref e) if e.field == "metadata.resourceVersion"),
            "unexpected error: {err}"
        );

        build.metadata.resource_version = Some("42".to_string());
        let (name, version) = update_target(&build).unwrap();
        assert_eq!(name, "pool-a");
        assert_eq!(version, "42");
    }

    #[tokio::test]
    async fn test_stale_status_write_is_a_conflict_not_a_validation_failure() {
        let mut current = stored(&pool_build(), "6");
        record(&mut current, 60, DIGESTED, "pool-a-1");
        record(&mut current, 120, DIGESTED_2, "pool-a-2");

        // Read at 5, before the second build was recorded
        let mut stale = stored(&pool_build(), "5");
        record(&mut stale, 60, DIGESTED, "pool-a-1");
        record(&mut stale, 180, DIGESTED_2, "pool-a-other");

        let (client, seen) = fake_api(vec![ok(&current)]);
        let err = client.update_status(&stale).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict { .. }), "unexpected error: {err}");
        assert!(err.is_retryable());
        assert_eq!(methods(&seen), ["GET"], "The stale write must not reach the server");
    }

    #[tokio::test]
    async fn test_stale_spec_write_is_a_conflict() {
        let current = stored(&pool_build(), "6");
        let mut stale = stored(&pool_build(), "5");
        stale.spec.containerfile = "FROM other".to_string();

        let (client, seen) = fake_api(vec![ok(&current)]);
        let err = client.update(&stale).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict { .. }), "unexpected error: {err}");
        assert_eq!(methods(&seen), ["GET"]);
    }

    #[tokio::test]
    async fn test_status_write_clears_conditions_on_the_server() {
        let mut current = stored(&pool_build(), "6");
        current.ensure_status().merge_condition(Condition::new(
            "Building",
            ConditionStatus::True,
            "BuildStarted",
            "",
        ));

        let mut cleared = current.clone();
        cleared.ensure_status().conditions.clear();
        let mut written = cleared.clone();
        written.metadata.resource_version = Some("7".to_string());

        let (client, seen) = fake_api(vec![ok(&current), ok(&written)]);
        let updated = client.update_status(&cleared).await.unwrap();
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("7"));

        let seen = seen.lock().unwrap();
        let (method, patch) = &seen[1];
        assert_eq!(method, "PATCH");
        assert_eq!(patch["metadata"]["resourceVersion"], json!("6"));
        assert_eq!(patch["status"]["conditions"], json!([]));
        assert_eq!(patch["status"]["observedGeneration"], json!(0));
    }

    #[tokio::test]
    async fn test_api_errors_map_to_store_errors() {
        let current = stored(&pool_build(), "6");
        let (client, seen) = fake_api(vec![
            api_status(404, "NotFound"),
            api_status(409, "AlreadyExists"),
            ok(&current),
            api_status(409, "Conflict"),
            api_status(500, "InternalError"),
        ]);

        let err = client.get("missing").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound { .. }), "unexpected error: {err}");

        let err = client.create(&pool_build()).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists { .. }), "unexpected error: {err}");

        // The read matches but the server moved on before the write landed
        let err = client.update(&current).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict { .. }), "unexpected error: {err}");
        assert!(err.is_retryable());

        let err = client.list().await.unwrap_err();
        assert!(matches!(err, ClientError::Kube(_)), "unexpected error: {err}");

        assert_eq!(methods(&seen), ["GET", "POST", "GET", "PUT", "GET"]);
    }
}
