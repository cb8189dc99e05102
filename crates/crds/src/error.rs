//! Admission errors for machine OS CRDs
//!
//! Validation failures always name the offending field by its wire path
//! (e.g. `spec.machineConfigPool`) so the message can be surfaced unchanged
//! to whoever wrote the object.

use std::fmt;
use thiserror::Error;

/// Why a field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    /// Field is required but missing or empty
    Required,
    /// Field has a value that is not allowed
    Invalid,
    /// Field may not be set in combination with another field
    Forbidden,
    /// Field duplicates a key that must be unique
    Duplicate,
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationReason::Required => "Required value",
            ValidationReason::Invalid => "Invalid value",
            ValidationReason::Forbidden => "Forbidden",
            ValidationReason::Duplicate => "Duplicate value",
        };
        f.write_str(s)
    }
}

/// A create/update was rejected because an invariant does not hold
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}: {message}")]
pub struct ValidationError {
    /// Wire path of the offending field
    pub field: String,
    /// Category of the failure
    pub reason: ValidationReason,
    /// Human-readable detail
    pub message: String,
}

impl ValidationError {
    /// A required field is missing or empty
    pub fn required(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ValidationReason::Required, message)
    }

    /// A field is set to a value that is not allowed
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ValidationReason::Invalid, message)
    }

    /// A field may not be set in this combination
    pub fn forbidden(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ValidationReason::Forbidden, message)
    }

    /// A keyed list holds the same key twice
    pub fn duplicate(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ValidationReason::Duplicate, message)
    }

    fn new(field: impl Into<String>, reason: ValidationReason, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason,
            message: message.into(),
        }
    }
}

/// An update tried to rewrite data that is write-once
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: field is immutable: {message}")]
pub struct ImmutableFieldError {
    /// Wire path of the field that was rewritten
    pub field: String,
    /// Human-readable detail
    pub message: String,
}

impl ImmutableFieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors produced by the schema and validation layer
#[derive(Debug, Error)]
pub enum Error {
    /// Invariant violated on create or update
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Write-once data was modified
    #[error("Immutable field: {0}")]
    ImmutableField(#[from] ImmutableFieldError),

    /// The document could not be decoded into the typed resource
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wire path of the rejected field, if the error names one
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation(e) => Some(&e.field),
            Error::ImmutableField(e) => Some(&e.field),
            Error::Serialization(_) => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
