//! Machine OS CRD Definitions
//!
//! Kubernetes Custom Resource Definitions tracking OS image builds for pools
//! of cluster nodes, together with the validation layer that enforces their
//! invariants at admission time.
//!
//! - [`MachineOSBuild`]: desired build inputs and the observed build outcome
//! - [`MachineOSImage`]: a produced image and its provenance

pub mod conditions;
pub mod error;
pub mod machine_os_build;
pub mod machine_os_image;
pub mod references;
pub mod resource;
pub mod schema;
pub mod validation;

pub use conditions::*;
pub use error::*;
pub use machine_os_build::*;
pub use machine_os_image::*;
pub use references::*;
pub use resource::MachineOSResource;
pub use schema::{all_crds, machine_os_build_crd, machine_os_image_crd};
pub use validation::{
    decode_machine_os_build, decode_machine_os_image, is_digested_pullspec,
    validate_machine_os_build_create, validate_machine_os_build_update,
    validate_machine_os_image_create, validate_machine_os_image_update,
};

/// API group of the machine OS kinds
pub const GROUP: &str = "machineconfiguration.openshift.io";

/// `apiVersion` of the machine OS kinds
pub const API_VERSION: &str = "machineconfiguration.openshift.io/v1alpha1";
