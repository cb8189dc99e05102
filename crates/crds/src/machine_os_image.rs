//! MachineOSImage Custom Resource Definition
//!
//! A machine OS image produced by a successful build. Objects of this kind
//! are written by the build reconciler, not by cluster admins: the spec holds
//! no build configuration and the provenance of the image lives in status.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{self, Condition};
use crate::machine_os_build::MachineOSBuild;
use crate::references::{NodeReference, ObjectReference};

/// MachineOSImageSpec carries no user-settable configuration
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1alpha1",
    kind = "MachineOSImage",
    plural = "machineosimages",
    singular = "machineosimage",
    status = "MachineOSImageStatus",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.finalImagePullspec"}"#,
    printcolumn = r#"{"name":"Built","type":"date","jsonPath":".status.built"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineOSImageSpec {
    /// Identity self-reference (must match metadata.name when set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeReference>,
}

/// Provenance of a produced image
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineOSImageInfo {
    /// Base OS image pullspec the image was built from
    #[serde(rename = "baseOSImage", default)]
    pub base_os_image: String,

    /// Rendered MachineConfig the image was built with
    #[serde(default)]
    pub rendered_machine_config: ObjectReference,

    /// Containerfile the image was built with
    #[serde(default)]
    pub containerfile: String,

    /// Final digested pullspec of the built image
    #[serde(rename = "finalImagePullspec", default)]
    pub image_pullspec: String,

    /// When the image was built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built: Option<DateTime<Utc>>,
}

/// MachineOSImageStatus carries the observed state and provenance of an image
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineOSImageStatus {
    /// Observations of the image's current state, keyed by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(extend("x-kubernetes-list-type" = "map", "x-kubernetes-list-map-keys" = ["type"]))]
    pub conditions: Vec<Condition>,

    /// Generation the controller last acted on
    #[serde(default, skip_serializing_if = "is_zero")]
    pub observed_generation: i64,

    /// Image provenance (inlined on the wire)
    #[serde(flatten)]
    pub info: MachineOSImageInfo,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl MachineOSImageStatus {
    /// Upsert a condition by type
    pub fn merge_condition(&mut self, condition: Condition) -> bool {
        conditions::merge_condition(&mut self.conditions, condition)
    }
}

impl MachineOSImage {
    /// Describe the image produced by a completed build
    ///
    /// The rendered MachineConfig is passed explicitly because a pool-based
    /// build only names the pool; the caller knows which rendered config the
    /// pool pointed at when the build ran.
    pub fn from_successful_build(
        name: &str,
        build: &MachineOSBuild,
        rendered_machine_config: ObjectReference,
        image_pullspec: impl Into<String>,
        built: DateTime<Utc>,
    ) -> Self {
        let mut image = MachineOSImage::new(name, MachineOSImageSpec::default());
        image.status = Some(MachineOSImageStatus {
            conditions: Vec::new(),
            observed_generation: 0,
            info: MachineOSImageInfo {
                base_os_image: build.spec.base_os_image.clone(),
                rendered_machine_config,
                containerfile: build.spec.containerfile.clone(),
                image_pullspec: image_pullspec.into(),
                built: Some(built),
            },
        });
        image
    }

    /// Provenance of this image, if status has been written
    pub fn info(&self) -> Option<&MachineOSImageInfo> {
        self.status.as_ref().map(|s| &s.info)
    }

    /// Reference to this image, as recorded in build history
    pub fn object_ref(&self) -> ObjectReference {
        let mut reference = ObjectReference::machine_os_image(self.metadata.name.clone().unwrap_or_default());
        reference.uid = self.metadata.uid.clone();
        reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine_os_build::{BuildConfig, MachineOSBuildSpec};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_status_info_is_inlined() {
        let build = MachineOSBuild::new(
            "worker",
            MachineOSBuildSpec {
                containerfile: "FROM base\nRUN dnf install -y tmux".to_string(),
                build_config: BuildConfig::machine_config_pool("worker"),
                base_os_image: "quay.io/os@sha256:aaaa".to_string(),
                node: None,
            },
        );
        let built = Utc.timestamp_opt(60, 0).single().unwrap();
        let image = MachineOSImage::from_successful_build(
            "worker-1",
            &build,
            ObjectReference::machine_config("rendered-worker-1"),
            "quay.io/custom@sha256:bbbb",
            built,
        );

        let value = serde_json::to_value(&image).unwrap();
        assert_eq!(value["kind"], "MachineOSImage");
        assert_eq!(value["spec"], json!({}), "Spec carries no configuration");
        let status = &value["status"];
        assert_eq!(status["baseOSImage"], "quay.io/os@sha256:aaaa");
        assert_eq!(status["renderedMachineConfig"]["name"], "rendered-worker-1");
        assert_eq!(status["containerfile"], "FROM base\nRUN dnf install -y tmux");
        assert_eq!(status["finalImagePullspec"], "quay.io/custom@sha256:bbbb");
        assert_eq!(status["built"], "1970-01-01T00:01:00Z");
        assert!(status.get("info").is_none());
    }

    #[test]
    fn test_decode_status_from_wire() {
        let image: MachineOSImage = serde_json::from_value(json!({
            "apiVersion": "machineconfiguration.openshift.io/v1alpha1",
            "kind": "MachineOSImage",
            "metadata": {"name": "worker-1"},
            "spec": {},
            "status": {
                "observedGeneration": 1,
                "baseOSImage": "quay.io/os@sha256:aaaa",
                "renderedMachineConfig": {"kind": "MachineConfig", "name": "rendered-worker-1"},
                "containerfile": "FROM base",
                "finalImagePullspec": "quay.io/custom@sha256:bbbb",
                "built": "2024-01-01T00:00:00Z"
            }
        }))
        .unwrap();

        let info = image.info().unwrap();
        assert_eq!(info.image_pullspec, "quay.io/custom@sha256:bbbb");
        assert_eq!(info.rendered_machine_config.name(), Some("rendered-worker-1"));
        assert_eq!(image.status.as_ref().unwrap().observed_generation, 1);
    }

    #[test]
    fn test_object_ref_points_at_image() {
        let image = MachineOSImage::new("worker-1", MachineOSImageSpec::default());
        let reference = image.object_ref();
        assert_eq!(reference.kind.as_deref(), Some("MachineOSImage"));
        assert_eq!(reference.name(), Some("worker-1"));
    }
}
