//! Store client errors

use machineos_crds::{Error as CrdError, ImmutableFieldError, ValidationError};
use thiserror::Error;

/// Errors that can occur when reading or writing machine OS resources
#[derive(Debug, Error)]
pub enum ClientError {
    /// The object violates an invariant of its kind
    #[error("Validation failed: {0}")]
    Validation(ValidationError),

    /// The write would modify write-once data
    #[error("Immutable field: {0}")]
    ImmutableField(ImmutableFieldError),

    /// The object changed since it was read (stale resourceVersion)
    #[error("Conflict: {kind} {name:?} was modified concurrently, re-read and retry")]
    Conflict { kind: String, name: String },

    /// No object with this name exists
    #[error("Not found: {kind} {name:?}")]
    NotFound { kind: String, name: String },

    /// An object with this name already exists
    #[error("Already exists: {kind} {name:?}")]
    AlreadyExists { kind: String, name: String },

    /// Kubernetes API error not covered above
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Watch stream error
    #[error("Watch error: {0}")]
    Watch(String),
}

impl ClientError {
    /// Whether re-reading the object and retrying the write may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }

    pub(crate) fn conflict(kind: &str, name: &str) -> Self {
        ClientError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn not_found(kind: &str, name: &str) -> Self {
        ClientError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: &str, name: &str) -> Self {
        ClientError::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

impl From<CrdError> for ClientError {
    fn from(err: CrdError) -> Self {
        match err {
            CrdError::Validation(e) => ClientError::Validation(e),
            CrdError::ImmutableField(e) => ClientError::ImmutableField(e),
            CrdError::Serialization(e) => ClientError::Serialization(e),
        }
    }
}

impl From<ValidationError> for ClientError {
    fn from(err: ValidationError) -> Self {
        ClientError::Validation(err)
    }
}
