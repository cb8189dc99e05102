//! Common behavior of the machine OS kinds
//!
//! Stores and the admission webhook are generic over this trait, so both
//! kinds share one code path for decoding, validation and the spec/status
//! split of writes.

use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;

use crate::error::Result;
use crate::machine_os_build::MachineOSBuild;
use crate::machine_os_image::MachineOSImage;
use crate::validation;

pub trait MachineOSResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Decode a raw wire document
    fn decode(value: &Value) -> Result<Self>;

    fn validate_create(&self) -> Result<()>;

    /// Validate a transition from `old` to `self`
    fn validate_update(&self, old: &Self) -> Result<()>;

    /// Whether the specs of `self` and `other` differ
    fn spec_differs(&self, other: &Self) -> bool;

    /// Replace the status of `self` with the status of `other`
    fn adopt_status(&mut self, other: &Self);

    /// Replace the spec of `self` with the spec of `other`
    fn adopt_spec(&mut self, other: &Self);

    fn clear_status(&mut self);
}

impl MachineOSResource for MachineOSBuild {
    fn decode(value: &Value) -> Result<Self> {
        validation::decode_machine_os_build(value)
    }

    fn validate_create(&self) -> Result<()> {
        validation::validate_machine_os_build_create(self)
    }

    fn validate_update(&self, old: &Self) -> Result<()> {
        validation::validate_machine_os_build_update(old, self)
    }

    fn spec_differs(&self, other: &Self) -> bool {
        self.spec != other.spec
    }

    fn adopt_status(&mut self, other: &Self) {
        self.status = other.status.clone();
    }

    fn adopt_spec(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }

    fn clear_status(&mut self) {
        self.status = None;
    }
}

impl MachineOSResource for MachineOSImage {
    fn decode(value: &Value) -> Result<Self> {
        validation::decode_machine_os_image(value)
    }

    fn validate_create(&self) -> Result<()> {
        validation::validate_machine_os_image_create(self)
    }

    fn validate_update(&self, old: &Self) -> Result<()> {
        validation::validate_machine_os_image_update(old, self)
    }

    fn spec_differs(&self, other: &Self) -> bool {
        self.spec != other.spec
    }

    fn adopt_status(&mut self, other: &Self) {
        self.status = other.status.clone();
    }

    fn adopt_spec(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }

    fn clear_status(&mut self) {
        self.status = None;
    }
}
