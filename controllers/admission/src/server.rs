//! HTTP servers: the TLS admission endpoint and the plain probe endpoint

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::WebhookError;
use crate::metrics::Metrics;
use crate::webhook;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared state of both servers
pub struct AppState {
    pub metrics: Metrics,
    ready: AtomicBool,
}

impl AppState {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the webhook ready (or not) for `/readyz`
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Router served over TLS to the API server
pub fn webhook_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/validate", post(webhook::validate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router for kubelet probes and Prometheus scrapes
pub fn probe_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, WebhookError> {
    state.metrics.render()
}

/// Serve both routers until SIGINT/SIGTERM
pub async fn run(config: Config, state: Arc<AppState>) -> Result<(), WebhookError> {
    let tls = RustlsConfig::from_pem_file(&config.tls_cert_path, &config.tls_key_path)
        .await
        .map_err(|e| {
            WebhookError::Tls(format!(
                "failed to load {} / {}: {e}",
                config.tls_cert_path.display(),
                config.tls_key_path.display()
            ))
        })?;

    let probe_listener = tokio::net::TcpListener::bind(config.probe_addr).await?;
    info!(addr = %config.probe_addr, "Serving probes and metrics");
    let probe_app = probe_router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(probe_listener, probe_app).await {
            error!(error = %e, "Probe server error");
        }
    });

    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone(), state.clone()));

    info!(addr = %config.admission_addr, "Serving admission webhook");
    state.set_ready(true);
    axum_server::bind_rustls(config.admission_addr, tls)
        .handle(handle)
        .serve(webhook_router(state).into_make_service())
        .await?;

    info!("Admission webhook stopped");
    Ok(())
}

async fn shutdown_on_signal(handle: Handle, state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, draining connections");
    state.set_ready(false);
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Metrics::new().unwrap()))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn review_body(spec: Value) -> Body {
        Body::from(
            json!({
                "apiVersion": "admission.k8s.io/v1",
                "kind": "AdmissionReview",
                "request": {
                    "uid": "1b0c4a4e-52c8-4f7e-9d1e-3f9c0e1d2a3b",
                    "kind": {"group": "machineconfiguration.openshift.io", "version": "v1alpha1", "kind": "MachineOSBuild"},
                    "resource": {"group": "machineconfiguration.openshift.io", "version": "v1alpha1", "resource": "machineosbuilds"},
                    "name": "pool-a",
                    "operation": "CREATE",
                    "userInfo": {},
                    "object": {
                        "apiVersion": "machineconfiguration.openshift.io/v1alpha1",
                        "kind": "MachineOSBuild",
                        "metadata": {"name": "pool-a"},
                        "spec": spec
                    },
                    "dryRun": false
                }
            })
            .to_string(),
        )
    }

    async fn post_review(state: Arc<AppState>, spec: Value) -> Value {
        let request = Request::post("/validate")
            .header("content-type", "application/json")
            .body(review_body(spec))
            .unwrap();
        let response = webhook_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_validate_endpoint_allows_and_denies() {
        let state = state();

        let allowed = post_review(
            state.clone(),
            json!({"containerfile": "FROM base\nRUN x", "machineConfigPool": {"name": "pool-a"}}),
        )
        .await;
        assert_eq!(allowed["response"]["allowed"], true);
        assert_eq!(allowed["response"]["uid"], "1b0c4a4e-52c8-4f7e-9d1e-3f9c0e1d2a3b");

        let denied = post_review(
            state.clone(),
            json!({
                "containerfile": "FROM base\nRUN x",
                "machineConfigPool": {"name": "pool-a"},
                "renderedMachineConfig": {"name": "rendered-pool-a-1"}
            }),
        )
        .await;
        assert_eq!(denied["response"]["allowed"], false);

        let metrics = &state.metrics;
        assert_eq!(metrics.decision_count("MachineOSBuild", "CREATE", crate::metrics::Decision::Allowed), 1);
        assert_eq!(metrics.decision_count("MachineOSBuild", "CREATE", crate::metrics::Decision::Denied), 1);
    }

    #[tokio::test]
    async fn test_probes() {
        let state = state();
        let app = probe_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let response = app
            .clone()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.metrics.record("MachineOSImage", "UPDATE", crate::metrics::Decision::Allowed);
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("machineos_admission_decisions_total"));
    }
}
