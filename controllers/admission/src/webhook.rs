//! Validating admission for MachineOSBuild and MachineOSImage
//!
//! CREATE runs the create checks on the incoming object. UPDATE, including
//! writes to the `status` subresource, runs the update checks against the
//! stored object. DELETE and CONNECT are always allowed. Reviews for other
//! kinds are allowed unchanged.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use machineos_crds::{Error as CrdError, MachineOSBuild, MachineOSImage, MachineOSResource, ValidationError};
use tracing::{debug, error, info};

use crate::metrics::Decision;
use crate::server::AppState;

/// Handle a validating admission review
pub async fn validate_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = review(&request);
    let decision = if response.allowed {
        Decision::Allowed
    } else {
        Decision::Denied
    };
    state
        .metrics
        .record(kind_label(&request.kind.kind), operation_label(&request.operation), decision);

    Json(response.into_review())
}

/// Decide a single admission request
pub fn review(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let result = match request.kind.kind.as_str() {
        "MachineOSBuild" => review_as::<MachineOSBuild>(request),
        "MachineOSImage" => review_as::<MachineOSImage>(request),
        other => {
            debug!(uid = %request.uid, kind = %other, "Not a machine OS kind, allowing");
            Ok(())
        }
    };

    match result {
        Ok(()) => {
            debug!(
                uid = %request.uid,
                kind = %request.kind.kind,
                name = %request.name,
                operation = operation_label(&request.operation),
                "Allowed"
            );
            AdmissionResponse::from(request)
        }
        Err(e) => {
            info!(
                uid = %request.uid,
                kind = %request.kind.kind,
                name = %request.name,
                operation = operation_label(&request.operation),
                subresource = ?request.sub_resource,
                reason = %e,
                "Denied"
            );
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}

fn review_as<K: MachineOSResource>(request: &AdmissionRequest<DynamicObject>) -> Result<(), CrdError> {
    match request.operation {
        Operation::Create => decode::<K>(request.object.as_ref(), "object")?.validate_create(),
        Operation::Update => {
            let new = decode::<K>(request.object.as_ref(), "object")?;
            let old = decode::<K>(request.old_object.as_ref(), "oldObject")?;
            new.validate_update(&old)
        }
        Operation::Delete | Operation::Connect => Ok(()),
    }
}

fn decode<K: MachineOSResource>(object: Option<&DynamicObject>, field: &str) -> Result<K, CrdError> {
    let object = object.ok_or_else(|| {
        ValidationError::required(field, "admission request carries no object")
    })?;
    K::decode(&serde_json::to_value(object)?)
}

/// Kinds outside the machine OS pair share one label value
fn kind_label(kind: &str) -> &'static str {
    match kind {
        "MachineOSBuild" => "MachineOSBuild",
        "MachineOSImage" => "MachineOSImage",
        _ => "other",
    }
}

fn operation_label(operation: &Operation) -> &'static str {
    match operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}
