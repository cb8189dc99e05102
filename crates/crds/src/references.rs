//! Kubernetes object references for machine OS CRDs
//!
//! `ObjectReference` is wire-compatible with core/v1 `ObjectReference`, which
//! is what the build config, the build history and the transient build
//! objects point at. Every field is optional on the wire, matching upstream.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API version of MachineConfig, MachineConfigPool and the machine OS kinds' parent group
pub const MACHINE_CONFIGURATION_V1: &str = "machineconfiguration.openshift.io/v1";

/// Reference to another Kubernetes object
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referent (e.g. "MachineConfigPool", "Pod")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace of the referent (unset for cluster-scoped kinds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// UID of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Specific resourceVersion to which this reference is made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Piece of an object this reference points at, instead of the whole object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
}

impl ObjectReference {
    /// Create a reference by kind and name (cluster-scoped)
    pub fn new(api_version: &str, kind: &str, name: impl Into<String>) -> Self {
        Self {
            api_version: Some(api_version.to_string()),
            kind: Some(kind.to_string()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Create a namespaced reference by kind and name
    pub fn namespaced(
        api_version: &str,
        kind: &str,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::new(api_version, kind, name)
        }
    }

    /// Reference to a rendered MachineConfig
    pub fn machine_config(name: impl Into<String>) -> Self {
        Self::new(MACHINE_CONFIGURATION_V1, "MachineConfig", name)
    }

    /// Reference to a MachineConfigPool
    pub fn machine_config_pool(name: impl Into<String>) -> Self {
        Self::new(MACHINE_CONFIGURATION_V1, "MachineConfigPool", name)
    }

    /// Reference to a produced MachineOSImage
    pub fn machine_os_image(name: impl Into<String>) -> Self {
        Self::new(crate::API_VERSION, "MachineOSImage", name)
    }

    /// Reference to a build pod
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::namespaced("v1", "Pod", namespace, name)
    }

    /// Reference to a ConfigMap consumed by a build
    pub fn config_map(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::namespaced("v1", "ConfigMap", namespace, name)
    }

    /// Reference to a Secret consumed by a build
    pub fn secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::namespaced("v1", "Secret", namespace, name)
    }

    /// Name of the referent, treating an empty string as unset
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Whether this reference carries no information at all
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Identity self-reference embedded in a machine OS resource
///
/// When present, `name` must equal the owning object's `metadata.name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NodeReference {
    /// Name that must match `metadata.name`
    pub name: String,
}

impl NodeReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
