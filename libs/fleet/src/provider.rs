//! The fleet provider interface.

use async_trait::async_trait;

use crate::error::FleetError;
use crate::types::{InstanceDetails, ManagedInstance};

/// Cloud API managing a group of identical render workers.
///
/// Implementations must be safe to call concurrently from many jobs.
#[async_trait]
pub trait FleetProvider: Send + Sync {
    /// Ask the provider to converge the group to `size` instances.
    ///
    /// Returns once the request is accepted. It does not wait for the group
    /// to reach the new size.
    async fn resize(&self, size: u32) -> Result<(), FleetError>;

    /// List every instance currently in the group, in provider order.
    async fn list_managed_instances(&self) -> Result<Vec<ManagedInstance>, FleetError>;

    /// Look up status and service address for one instance.
    async fn get_instance(&self, name: &str) -> Result<InstanceDetails, FleetError>;
}
