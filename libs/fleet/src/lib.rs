//! # mapanim-fleet
//!
//! The render gateway never owns a worker's lifecycle. It can only ask the
//! fleet provider to resize a managed group of identical workers and observe
//! what the provider reports back. This crate holds that contract:
//!
//! - [`FleetProvider`]: resize, list managed instances, look up one instance
//! - [`ComputeEngineFleet`]: the Compute Engine REST implementation
//! - [`InMemoryFleet`]: an in-process fleet for local development and tests
//!
//! ## Convergence
//!
//! A resize is a request, not a promise. Providers converge asynchronously
//! and callers must treat [`FleetProvider::list_managed_instances`] as the
//! only ground truth for what exists right now.

mod compute;
mod error;
mod memory;
mod provider;
mod types;

pub use compute::{
    AddressKind, ComputeEngineConfig, ComputeEngineFleet, TokenSource, DEFAULT_API_URL,
    DEFAULT_METADATA_TOKEN_URL,
};
pub use error::FleetError;
pub use memory::InMemoryFleet;
pub use provider::FleetProvider;
pub use types::{InstanceDetails, InstanceStatus, ManagedInstance, Worker};
