//! Machine OS store client
//!
//! Create/get/list/update/watch access to MachineOSBuild and MachineOSImage
//! objects, keyed by name. Every write runs the validation layer from
//! `machineos-crds` first, and updates use optimistic concurrency on
//! `metadata.resourceVersion`.
//!
//! # Example
//!
//! ```no_run
//! use machineos_client::{MachineOSClient, MachineOSClientTrait};
//! use machineos_crds::MachineOSBuild;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client: MachineOSClient<MachineOSBuild> = MachineOSClient::new(kube::Client::try_default().await?);
//!
//! let mut build = client.get("worker").await?;
//! build.ensure_status().observed_generation = build.metadata.generation.unwrap_or_default();
//! match client.update_status(&build).await {
//!     Ok(_) => {}
//!     Err(e) if e.is_retryable() => { /* re-read and retry */ }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod client_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::MachineOSClient;
pub use client_trait::{MachineOSClientTrait, ResourceEvent};
pub use error::ClientError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockMachineOSClient;
