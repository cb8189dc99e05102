//! MachineOS Admission Webhook
//!
//! Validating admission webhook for the `MachineOSBuild` and `MachineOSImage`
//! CRDs. Rejects writes that break their invariants: identity self-reference,
//! a single build config, append-only build history, write-once image
//! provenance and digested image pullspecs.
//!
//! Configuration is read from environment variables:
//! - `ADMISSION_BIND_ADDR` (default `0.0.0.0:8443`)
//! - `PROBE_BIND_ADDR` (default `0.0.0.0:8080`)
//! - `TLS_CERT_PATH`, `TLS_KEY_PATH` (required)

mod config;
mod error;
mod metrics;
mod server;
mod webhook;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::WebhookError;
use crate::metrics::Metrics;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<(), WebhookError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Configure rustls crypto provider (ring) before any TLS config is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| WebhookError::Tls("failed to install the ring crypto provider".to_string()))?;

    info!("Starting MachineOS admission webhook");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Admission address: {}", config.admission_addr);
    info!("  Probe address: {}", config.probe_addr);
    info!("  TLS certificate: {}", config.tls_cert_path.display());

    let state = Arc::new(AppState::new(Metrics::new()?));
    server::run(config, state).await
}
