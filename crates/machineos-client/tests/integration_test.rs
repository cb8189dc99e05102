//! Integration tests for the Kubernetes-backed client
//!
//! These tests require a cluster with the machine OS CRDs installed
//! (`cargo run -p machineos-crds --bin crdgen | kubectl apply -f -`) and a
//! kubeconfig pointing at it.

use machineos_client::{ClientError, MachineOSClient, MachineOSClientTrait};
use machineos_crds::{BuildConfig, MachineOSBuild, MachineOSBuildSpec};

async fn build_client() -> MachineOSClient<MachineOSBuild> {
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create Kubernetes client");
    MachineOSClient::new(client)
}

fn pool_build(name: &str) -> MachineOSBuild {
    MachineOSBuild::new(
        name,
        MachineOSBuildSpec {
            containerfile: "FROM base\nRUN x".to_string(),
            build_config: BuildConfig::machine_config_pool(name),
            base_os_image: String::new(),
            node: None,
        },
    )
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_create_get_delete() {
    let client = build_client().await;
    let name = format!("it-{}", uuid::Uuid::new_v4().simple());

    let created = client.create(&pool_build(&name)).await.expect("Failed to create");
    assert_eq!(created.metadata.generation, Some(1));

    let fetched = client.get(&name).await.expect("Failed to get");
    assert_eq!(fetched.spec, created.spec);

    client.delete(&name).await.expect("Failed to delete");
}

#[tokio::test]
#[ignore]
async fn test_stale_status_write_conflicts() {
    let client = build_client().await;
    let name = format!("it-{}", uuid::Uuid::new_v4().simple());
    let stored = client.create(&pool_build(&name)).await.expect("Failed to create");

    let mut first = stored.clone();
    first.ensure_status().begin_build(vec![], 1);
    let mut second = stored.clone();
    second.ensure_status().record_failed_build("BuildPodFailed", "exit code 1");

    client.update_status(&first).await.expect("First writer should win");
    let err = client.update_status(&second).await.unwrap_err();
    assert!(matches!(err, ClientError::Conflict { .. }), "unexpected error: {err}");

    client.delete(&name).await.expect("Failed to delete");
}
