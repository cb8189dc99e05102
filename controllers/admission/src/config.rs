//! Webhook configuration, read once from the environment at startup

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::WebhookError;

pub const ADMISSION_BIND_ADDR: &str = "ADMISSION_BIND_ADDR";
pub const PROBE_BIND_ADDR: &str = "PROBE_BIND_ADDR";
pub const TLS_CERT_PATH: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH: &str = "TLS_KEY_PATH";

const DEFAULT_ADMISSION_ADDR: &str = "0.0.0.0:8443";
const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTPS listener for `POST /validate`
    pub admission_addr: SocketAddr,
    /// Plain HTTP listener for `/healthz`, `/readyz` and `/metrics`
    pub probe_addr: SocketAddr,
    /// PEM certificate chain served by the webhook
    pub tls_cert_path: PathBuf,
    /// PEM private key of the certificate
    pub tls_key_path: PathBuf,
}

impl Config {
    /// Load the configuration from the process environment
    pub fn from_env() -> Result<Self, WebhookError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from a variable lookup
    ///
    /// Bind addresses fall back to defaults; the TLS paths are required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WebhookError> {
        let addr = |key: &str, default: &str| -> Result<SocketAddr, WebhookError> {
            let raw = lookup(key).unwrap_or_else(|| default.to_string());
            raw.parse().map_err(|e| {
                WebhookError::InvalidConfig(format!("{key}={raw:?} is not a socket address: {e}"))
            })
        };
        let path = |key: &str| -> Result<PathBuf, WebhookError> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| {
                    WebhookError::InvalidConfig(format!("{key} environment variable is required"))
                })
        };

        let config = Config {
            admission_addr: addr(ADMISSION_BIND_ADDR, DEFAULT_ADMISSION_ADDR)?,
            probe_addr: addr(PROBE_BIND_ADDR, DEFAULT_PROBE_ADDR)?,
            tls_cert_path: path(TLS_CERT_PATH)?,
            tls_key_path: path(TLS_KEY_PATH)?,
        };

        if config.admission_addr == config.probe_addr {
            return Err(WebhookError::InvalidConfig(format!(
                "{ADMISSION_BIND_ADDR} and {PROBE_BIND_ADDR} must differ (both {})",
                config.admission_addr
            )));
        }
        Ok(config)
    }
}
