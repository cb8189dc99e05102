//! MachineOSBuild Custom Resource Definition
//!
//! Declares the inputs of an OS image build for a pool of nodes and records
//! the observed outcome: conditions, the history of produced images, and the
//! transient objects of an in-flight build.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::conditions::{self, Condition, ConditionStatus};
use crate::error::ValidationError;
use crate::references::{NodeReference, ObjectReference};
use crate::validation::is_digested_pullspec;

/// MachineOSBuildSpec defines the desired inputs of a machine OS build
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1alpha1",
    kind = "MachineOSBuild",
    plural = "machineosbuilds",
    singular = "machineosbuild",
    status = "MachineOSBuildStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Prepared","type":"string","jsonPath":".status.conditions[?(@.type==\"Prepared\")].status"}"#,
    printcolumn = r#"{"name":"Building","type":"string","jsonPath":".status.conditions[?(@.type==\"Building\")].status"}"#,
    printcolumn = r#"{"name":"Succeeded","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].status"}"#,
    printcolumn = r#"{"name":"Failed","type":"string","jsonPath":".status.conditions[?(@.type==\"Failed\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineOSBuildSpec {
    /// Containerfile the machine OS image is built with
    pub containerfile: String,

    /// Which MachineConfig input the build consumes
    #[serde(flatten)]
    pub build_config: BuildConfig,

    /// Base OS image pullspec for the build
    ///
    /// When empty, a reconciler fills in the cluster's current default OS
    /// image before acting on the build.
    #[serde(rename = "baseOSImage", default, skip_serializing_if = "String::is_empty")]
    pub base_os_image: String,

    /// Identity self-reference (must match metadata.name when set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeReference>,
}

/// The MachineConfig input of a build
///
/// Exactly one input is consumed. On the wire this is two optional fields,
/// `renderedMachineConfig` and `machineConfigPool`, flattened into the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BuildConfigFields", into = "BuildConfigFields")]
pub enum BuildConfig {
    /// A pinned rendered MachineConfig. Never triggers an automatic rebuild.
    RenderedMachineConfig(ObjectReference),

    /// A MachineConfigPool. Rebuilds whenever the pool picks up a new
    /// rendered MachineConfig.
    MachineConfigPool(ObjectReference),
}

impl BuildConfig {
    /// Build from a pinned rendered MachineConfig
    pub fn rendered_machine_config(name: impl Into<String>) -> Self {
        BuildConfig::RenderedMachineConfig(ObjectReference::machine_config(name))
    }

    /// Build from whatever a MachineConfigPool currently renders
    pub fn machine_config_pool(name: impl Into<String>) -> Self {
        BuildConfig::MachineConfigPool(ObjectReference::machine_config_pool(name))
    }

    /// The referenced object, whichever variant is set
    pub fn reference(&self) -> &ObjectReference {
        match self {
            BuildConfig::RenderedMachineConfig(r) | BuildConfig::MachineConfigPool(r) => r,
        }
    }

    /// Wire name of the populated field
    pub fn field_name(&self) -> &'static str {
        match self {
            BuildConfig::RenderedMachineConfig(_) => "renderedMachineConfig",
            BuildConfig::MachineConfigPool(_) => "machineConfigPool",
        }
    }

    /// Whether a pool picking up a new rendered config should rebuild
    pub fn rebuilds_on_pool_change(&self) -> bool {
        matches!(self, BuildConfig::MachineConfigPool(_))
    }
}

/// Wire shape of [`BuildConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigFields {
    /// Reference to a rendered MachineConfig. Will not automatically rebuild.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_machine_config: Option<ObjectReference>,

    /// Reference to a MachineConfigPool. Will automatically rebuild if the
    /// pool picks up a new rendered MachineConfig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_config_pool: Option<ObjectReference>,
}

impl TryFrom<BuildConfigFields> for BuildConfig {
    type Error = ValidationError;

    fn try_from(fields: BuildConfigFields) -> Result<Self, Self::Error> {
        match (fields.rendered_machine_config, fields.machine_config_pool) {
            (Some(rendered), None) => Ok(BuildConfig::RenderedMachineConfig(rendered)),
            (None, Some(pool)) => Ok(BuildConfig::MachineConfigPool(pool)),
            (Some(_), Some(_)) => Err(ValidationError::forbidden(
                "spec.machineConfigPool",
                "may not be set together with spec.renderedMachineConfig",
            )),
            (None, None) => Err(ValidationError::required(
                "spec.renderedMachineConfig",
                "one of spec.renderedMachineConfig or spec.machineConfigPool must be set",
            )),
        }
    }
}

impl From<BuildConfig> for BuildConfigFields {
    fn from(config: BuildConfig) -> Self {
        match config {
            BuildConfig::RenderedMachineConfig(r) => BuildConfigFields {
                rendered_machine_config: Some(r),
                machine_config_pool: None,
            },
            BuildConfig::MachineConfigPool(p) => BuildConfigFields {
                rendered_machine_config: None,
                machine_config_pool: Some(p),
            },
        }
    }
}

impl JsonSchema for BuildConfig {
    fn inline_schema() -> bool {
        true
    }

    fn schema_name() -> Cow<'static, str> {
        BuildConfigFields::schema_name()
    }

    fn json_schema(generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        BuildConfigFields::json_schema(generator)
    }
}

/// Well-known condition types of a MachineOSBuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildConditionType {
    Prepared,
    Building,
    Succeeded,
    Failed,
    Interrupted,
}

impl BuildConditionType {
    /// Condition type as written on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildConditionType::Prepared => "Prepared",
            BuildConditionType::Building => "Building",
            BuildConditionType::Succeeded => "Succeeded",
            BuildConditionType::Failed => "Failed",
            BuildConditionType::Interrupted => "Interrupted",
        }
    }
}

impl fmt::Display for BuildConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build phase derived from the conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildPhase {
    #[default]
    Pending,
    Prepared,
    Building,
    Succeeded,
    Failed,
    Interrupted,
}

/// MachineOSBuildStatus defines the observed state of a machine OS build
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineOSBuildStatus {
    /// Observations of the build's current state, keyed by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(extend("x-kubernetes-list-type" = "map", "x-kubernetes-list-map-keys" = ["type"]))]
    pub conditions: Vec<Condition>,

    /// Generation of the spec the controller last acted on
    #[serde(default, skip_serializing_if = "is_zero")]
    pub observed_generation: i64,

    /// Successfully produced images, oldest first. Append-only.
    #[serde(rename = "machineOSHistory", default)]
    pub build_history: Vec<MachineOSBuildHistory>,

    /// Build pods, ConfigMaps and Secrets of the in-flight build.
    /// Cleared once the build succeeds.
    #[serde(default)]
    pub build_objects: Vec<ObjectReference>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// One successfully produced machine OS image
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineOSBuildHistory {
    /// When the build was performed
    pub built: DateTime<Utc>,

    /// Digested pullspec of the built image
    pub image_pullspec: String,

    /// The produced MachineOSImage (inlined on the wire)
    #[serde(flatten)]
    pub machine_os_image: ObjectReference,
}

impl MachineOSBuildStatus {
    /// Upsert a condition by type
    pub fn merge_condition(&mut self, condition: Condition) -> bool {
        conditions::merge_condition(&mut self.conditions, condition)
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: BuildConditionType) -> Option<&Condition> {
        conditions::find_condition(&self.conditions, type_.as_str())
    }

    fn is_true(&self, type_: BuildConditionType) -> bool {
        conditions::is_condition_true(&self.conditions, type_.as_str())
    }

    /// Current phase, derived from the terminal conditions first
    pub fn phase(&self) -> BuildPhase {
        if self.is_true(BuildConditionType::Succeeded) {
            BuildPhase::Succeeded
        } else if self.is_true(BuildConditionType::Failed) {
            BuildPhase::Failed
        } else if self.is_true(BuildConditionType::Interrupted) {
            BuildPhase::Interrupted
        } else if self.is_true(BuildConditionType::Building) {
            BuildPhase::Building
        } else if self.is_true(BuildConditionType::Prepared) {
            BuildPhase::Prepared
        } else {
            BuildPhase::Pending
        }
    }

    /// Most recently produced image
    pub fn latest_build(&self) -> Option<&MachineOSBuildHistory> {
        self.build_history.last()
    }

    /// Record that a build for `generation` started with the given objects
    pub fn begin_build(&mut self, build_objects: Vec<ObjectReference>, generation: i64) {
        self.build_objects = build_objects;
        self.observed_generation = generation;
        self.set(BuildConditionType::Building, ConditionStatus::True, "BuildStarted", "", generation);
        self.set(BuildConditionType::Succeeded, ConditionStatus::False, "BuildInProgress", "", generation);
        self.set(BuildConditionType::Failed, ConditionStatus::False, "BuildInProgress", "", generation);
        self.set(BuildConditionType::Interrupted, ConditionStatus::False, "BuildInProgress", "", generation);
    }

    /// Record a successful build
    ///
    /// Appends one history entry, clears the transient build objects and
    /// marks the build succeeded. The pullspec must be digested.
    pub fn record_successful_build(
        &mut self,
        built: DateTime<Utc>,
        image_pullspec: impl Into<String>,
        machine_os_image: ObjectReference,
    ) -> Result<&MachineOSBuildHistory, ValidationError> {
        let image_pullspec = image_pullspec.into();
        let field = format!("status.machineOSHistory[{}].imagePullspec", self.build_history.len());
        if image_pullspec.is_empty() {
            return Err(ValidationError::required(field, "image pullspec must be set"));
        }
        if !is_digested_pullspec(&image_pullspec) {
            return Err(ValidationError::invalid(
                field,
                format!("{image_pullspec:?} is not a digested pullspec"),
            ));
        }

        let generation = self.observed_generation;
        let message = format!("built {image_pullspec}");
        self.build_objects.clear();
        self.set(BuildConditionType::Building, ConditionStatus::False, "BuildFinished", "", generation);
        self.set(BuildConditionType::Failed, ConditionStatus::False, "BuildSucceeded", "", generation);
        self.set(BuildConditionType::Interrupted, ConditionStatus::False, "BuildSucceeded", "", generation);
        self.set(BuildConditionType::Succeeded, ConditionStatus::True, "BuildSucceeded", &message, generation);
        let index = self.build_history.len();
        self.build_history.push(MachineOSBuildHistory {
            built,
            image_pullspec,
            machine_os_image,
        });
        Ok(&self.build_history[index])
    }

    /// Record a failed build. Build objects are kept for inspection.
    pub fn record_failed_build(&mut self, reason: &str, message: &str) {
        let generation = self.observed_generation;
        self.set(BuildConditionType::Building, ConditionStatus::False, reason, "", generation);
        self.set(BuildConditionType::Succeeded, ConditionStatus::False, reason, "", generation);
        self.set(BuildConditionType::Failed, ConditionStatus::True, reason, message, generation);
    }

    /// Record that an in-flight build was interrupted
    pub fn record_interrupted_build(&mut self, reason: &str, message: &str) {
        let generation = self.observed_generation;
        self.set(BuildConditionType::Building, ConditionStatus::False, reason, "", generation);
        self.set(BuildConditionType::Interrupted, ConditionStatus::True, reason, message, generation);
    }

    fn set(
        &mut self,
        type_: BuildConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        generation: i64,
    ) {
        let mut condition = Condition::new(type_.as_str(), status, reason, message);
        if generation > 0 {
            condition = condition.observed_generation(generation);
        }
        self.merge_condition(condition);
    }
}

impl MachineOSBuild {
    /// The MachineConfig input of this build
    pub fn build_config(&self) -> &BuildConfig {
        &self.spec.build_config
    }

    /// Whether a pool adopting a new rendered config should rebuild this
    pub fn rebuilds_on_pool_change(&self) -> bool {
        self.spec.build_config.rebuilds_on_pool_change()
    }

    /// Fill in the base OS image if the spec left it empty
    ///
    /// Returns whether the spec changed.
    pub fn apply_default_base_os_image(&mut self, default_image: &str) -> bool {
        if !self.spec.base_os_image.is_empty() || default_image.is_empty() {
            return false;
        }
        self.spec.base_os_image = default_image.to_string();
        true
    }

    /// Whether the status reflects the current spec generation
    pub fn is_observed(&self) -> bool {
        let generation = self.metadata.generation.unwrap_or_default();
        self.status
            .as_ref()
            .is_some_and(|s| s.observed_generation >= generation)
    }

    /// Current build phase (Pending when there is no status yet)
    pub fn phase(&self) -> BuildPhase {
        self.status.as_ref().map(|s| s.phase()).unwrap_or_default()
    }

    /// Mutable status, created empty if absent
    pub fn ensure_status(&mut self) -> &mut MachineOSBuildStatus {
        self.status.get_or_insert_with(MachineOSBuildStatus::default)
    }
}
