//! CustomResourceDefinitions with server-side validation rules
//!
//! The derived CRDs are extended with `x-kubernetes-validations` CEL rules so
//! the API server rejects identity mismatches and conflicting build configs
//! even when the admission webhook is not installed.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, ValidationRule,
};
use kube::CustomResourceExt;

use crate::machine_os_build::MachineOSBuild;
use crate::machine_os_image::MachineOSImage;

const IDENTITY_RULE: &str = "!has(self.spec.node) || self.metadata.name == self.spec.node.name";

const EXCLUSIVE_CONFIG_RULE: &str =
    "!(has(self.spec.renderedMachineConfig) && has(self.spec.machineConfigPool))";

const REQUIRED_CONFIG_RULE: &str =
    "has(self.spec.renderedMachineConfig) || has(self.spec.machineConfigPool)";

fn rule(rule: &str, message: &str, field_path: Option<&str>) -> ValidationRule {
    ValidationRule {
        rule: rule.to_string(),
        message: Some(message.to_string()),
        field_path: field_path.map(str::to_string),
        ..Default::default()
    }
}

fn identity_rule() -> ValidationRule {
    rule(
        IDENTITY_RULE,
        "spec.node.name should match metadata.name",
        Some(".spec.node.name"),
    )
}

/// Attach `rules` to the root schema of every served version
fn with_rules(mut crd: CustomResourceDefinition, rules: Vec<ValidationRule>) -> CustomResourceDefinition {
    for version in &mut crd.spec.versions {
        if let Some(schema) = version
            .schema
            .as_mut()
            .and_then(|s| s.open_api_v3_schema.as_mut())
        {
            schema
                .x_kubernetes_validations
                .get_or_insert_with(Vec::new)
                .extend(rules.iter().cloned());
        }
    }
    crd
}

/// CRD for MachineOSBuild
pub fn machine_os_build_crd() -> CustomResourceDefinition {
    with_rules(
        MachineOSBuild::crd(),
        vec![
            identity_rule(),
            rule(
                EXCLUSIVE_CONFIG_RULE,
                "only one of spec.renderedMachineConfig or spec.machineConfigPool may be set",
                Some(".spec.machineConfigPool"),
            ),
            rule(
                REQUIRED_CONFIG_RULE,
                "one of spec.renderedMachineConfig or spec.machineConfigPool must be set",
                Some(".spec.renderedMachineConfig"),
            ),
        ],
    )
}

/// CRD for MachineOSImage
pub fn machine_os_image_crd() -> CustomResourceDefinition {
    with_rules(MachineOSImage::crd(), vec![identity_rule()])
}

/// Every CRD of this crate, in install order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![machine_os_build_crd(), machine_os_image_crd()]
}
