//! Admission-time validation for MachineOSBuild and MachineOSImage
//!
//! Create checks:
//! - `metadata.name` is set and matches `spec.node.name` when a node is given
//! - MachineOSBuild: a non-empty `spec.containerfile` and exactly one of
//!   `spec.renderedMachineConfig` / `spec.machineConfigPool`
//! - any status present: unique condition types, digested pullspecs, and no
//!   build objects left on a succeeded build
//!
//! Update checks re-run the create checks on the new object and reject any
//! rewrite of data that is write-once: recorded build history entries and
//! the provenance of a MachineOSImage.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use crate::conditions::Condition;
use crate::error::{ImmutableFieldError, Result, ValidationError};
use crate::machine_os_build::{
    BuildConditionType, BuildConfig, BuildConfigFields, MachineOSBuild, MachineOSBuildStatus,
};
use crate::machine_os_image::{MachineOSImage, MachineOSImageInfo, MachineOSImageStatus};
use crate::references::NodeReference;

/// Whether `pullspec` pins an image by digest (`<repo>@<algorithm>:<hex>`)
pub fn is_digested_pullspec(pullspec: &str) -> bool {
    let Some((repository, digest)) = pullspec.rsplit_once('@') else {
        return false;
    };
    let Some((algorithm, encoded)) = digest.split_once(':') else {
        return false;
    };
    !repository.is_empty()
        && !algorithm.is_empty()
        && algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'))
        && !encoded.is_empty()
        && encoded.chars().all(|c| c.is_ascii_hexdigit())
}

/// Check `metadata.name` against the embedded identity self-reference
pub fn validate_identity(
    metadata: &ObjectMeta,
    node: Option<&NodeReference>,
) -> Result<(), ValidationError> {
    let name = metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ValidationError::required("metadata.name", "name is required"))?;

    if let Some(node) = node {
        if node.name != name {
            return Err(ValidationError::invalid(
                "spec.node.name",
                format!(
                    "spec.node.name should match metadata.name ({:?} != {:?})",
                    node.name, name
                ),
            ));
        }
    }
    Ok(())
}

/// Conditions are a map keyed by type
fn validate_conditions(conditions: &[Condition]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for (i, condition) in conditions.iter().enumerate() {
        if condition.type_.is_empty() {
            return Err(ValidationError::required(
                format!("status.conditions[{i}].type"),
                "condition type is required",
            ));
        }
        if !seen.insert(condition.type_.as_str()) {
            return Err(ValidationError::duplicate(
                format!("status.conditions[{i}].type"),
                format!("condition type {:?} appears more than once", condition.type_),
            ));
        }
    }
    Ok(())
}

fn validate_build_config(config: &BuildConfig) -> Result<(), ValidationError> {
    let field = format!("spec.{}", config.field_name());
    let reference = config.reference();
    if reference.name().is_none() {
        return Err(ValidationError::required(
            format!("{field}.name"),
            "referenced object must be named",
        ));
    }

    let expected_kind = match config {
        BuildConfig::RenderedMachineConfig(_) => "MachineConfig",
        BuildConfig::MachineConfigPool(_) => "MachineConfigPool",
    };
    match reference.kind.as_deref() {
        None | Some("") => Ok(()),
        Some(kind) if kind == expected_kind => Ok(()),
        Some(kind) => Err(ValidationError::invalid(
            format!("{field}.kind"),
            format!("expected kind {expected_kind:?}, got {kind:?}"),
        )),
    }
}

/// Entries below `recorded` were accepted by an earlier write and are not re-checked
fn validate_build_status(status: &MachineOSBuildStatus, recorded: usize) -> Result<(), ValidationError> {
    validate_conditions(&status.conditions)?;

    if !status.build_objects.is_empty()
        && status
            .condition(BuildConditionType::Succeeded)
            .is_some_and(Condition::is_true)
    {
        return Err(ValidationError::invalid(
            "status.buildObjects",
            "build objects must be cleared once the build has succeeded",
        ));
    }

    for (i, entry) in status.build_history.iter().enumerate().skip(recorded) {
        if !is_digested_pullspec(&entry.image_pullspec) {
            return Err(ValidationError::invalid(
                format!("status.machineOSHistory[{i}].imagePullspec"),
                format!("{:?} is not a digested pullspec", entry.image_pullspec),
            ));
        }
    }
    Ok(())
}

/// `recorded` is the pullspec already stored, which is not re-checked
fn validate_image_status(status: &MachineOSImageStatus, recorded: &str) -> Result<(), ValidationError> {
    validate_conditions(&status.conditions)?;

    let pullspec = &status.info.image_pullspec;
    if !pullspec.is_empty() && pullspec != recorded && !is_digested_pullspec(pullspec) {
        return Err(ValidationError::invalid(
            "status.finalImagePullspec",
            format!("{pullspec:?} is not a digested pullspec"),
        ));
    }
    Ok(())
}

fn validate_build(build: &MachineOSBuild, recorded_history: usize) -> Result<()> {
    validate_identity(&build.metadata, build.spec.node.as_ref())?;

    if build.spec.containerfile.trim().is_empty() {
        return Err(ValidationError::required("spec.containerfile", "containerfile is required").into());
    }
    validate_build_config(&build.spec.build_config)?;

    if let Some(status) = &build.status {
        validate_build_status(status, recorded_history)?;
    }
    Ok(())
}

/// Validate a MachineOSBuild about to be created
pub fn validate_machine_os_build_create(build: &MachineOSBuild) -> Result<()> {
    validate_build(build, 0)
}

/// Validate a MachineOSBuild update from `old` to `new`
///
/// Recorded history entries are checked first, so rewriting one is always
/// reported as an immutable field.
pub fn validate_machine_os_build_update(old: &MachineOSBuild, new: &MachineOSBuild) -> Result<()> {
    let empty = Vec::new();
    let old_history = old.status.as_ref().map_or(&empty, |s| &s.build_history);
    let new_history = new.status.as_ref().map_or(&empty, |s| &s.build_history);

    for (i, recorded) in old_history.iter().enumerate() {
        match new_history.get(i) {
            None => {
                return Err(ImmutableFieldError::new(
                    "status.machineOSHistory",
                    format!(
                        "recorded entries may not be removed ({} recorded, {} given)",
                        old_history.len(),
                        new_history.len()
                    ),
                )
                .into());
            }
            Some(entry) if entry != recorded => {
                return Err(ImmutableFieldError::new(
                    format!("status.machineOSHistory[{i}]"),
                    "recorded build history entries may not be modified",
                )
                .into());
            }
            Some(_) => {}
        }
    }

    validate_build(new, old_history.len())?;

    if new_history.len() > old_history.len() {
        debug!(
            name = ?new.metadata.name,
            appended = new_history.len() - old_history.len(),
            "MachineOSBuild history appended"
        );
    }
    Ok(())
}

/// Validate a MachineOSImage about to be created
pub fn validate_machine_os_image_create(image: &MachineOSImage) -> Result<()> {
    validate_image(image, "")
}

fn validate_image(image: &MachineOSImage, recorded_pullspec: &str) -> Result<()> {
    validate_identity(&image.metadata, image.spec.node.as_ref())?;

    if let Some(status) = &image.status {
        validate_image_status(status, recorded_pullspec)?;
    }
    Ok(())
}

/// Validate a MachineOSImage update from `old` to `new`
///
/// Provenance is write-once: a field that is set in `old` may not change.
pub fn validate_machine_os_image_update(old: &MachineOSImage, new: &MachineOSImage) -> Result<()> {
    let default_info = MachineOSImageInfo::default();
    let old_info = old.info().unwrap_or(&default_info);
    let new_info = new.info().unwrap_or(&default_info);

    let changed = |set: bool, equal: bool| set && !equal;
    let violation = if changed(!old_info.base_os_image.is_empty(), old_info.base_os_image == new_info.base_os_image) {
        Some("status.baseOSImage")
    } else if changed(
        !old_info.rendered_machine_config.is_empty(),
        old_info.rendered_machine_config == new_info.rendered_machine_config,
    ) {
        Some("status.renderedMachineConfig")
    } else if changed(!old_info.containerfile.is_empty(), old_info.containerfile == new_info.containerfile) {
        Some("status.containerfile")
    } else if changed(!old_info.image_pullspec.is_empty(), old_info.image_pullspec == new_info.image_pullspec) {
        Some("status.finalImagePullspec")
    } else if changed(old_info.built.is_some(), old_info.built == new_info.built) {
        Some("status.built")
    } else {
        None
    };

    if let Some(field) = violation {
        return Err(ImmutableFieldError::new(field, "image provenance may not be revised").into());
    }
    validate_image(new, &old_info.image_pullspec)
}

/// Decode a raw MachineOSBuild document
///
/// Shape problems that would otherwise surface as opaque decode errors are
/// reported as validation errors naming the field.
pub fn decode_machine_os_build(value: &Value) -> Result<MachineOSBuild> {
    let spec = value
        .get("spec")
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::required("spec", "spec is required"))?;

    match spec.get("containerfile") {
        None | Some(Value::Null) => {
            return Err(ValidationError::required("spec.containerfile", "containerfile is required").into());
        }
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(ValidationError::invalid("spec.containerfile", "containerfile must be a string").into());
        }
    }

    let fields: BuildConfigFields = serde_json::from_value(Value::Object(spec.clone()))?;
    BuildConfig::try_from(fields)?;

    Ok(serde_json::from_value(value.clone())?)
}

/// Decode a raw MachineOSImage document
pub fn decode_machine_os_image(value: &Value) -> Result<MachineOSImage> {
    if !value.get("spec").is_some_and(Value::is_object) {
        return Err(ValidationError::required("spec", "spec is required").into());
    }
    Ok(serde_json::from_value(value.clone())?)
}
