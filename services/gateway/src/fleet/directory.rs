//! Fleet directory: running workers with resolved addresses.

use std::sync::Arc;

use futures_util::future::join_all;
use mapanim_fleet::{FleetProvider, InstanceStatus, Worker};
use tracing::{debug, error};

/// Read-only view of the provider's group membership.
#[derive(Clone)]
pub struct FleetDirectory {
    provider: Arc<dyn FleetProvider>,
}

impl FleetDirectory {
    pub fn new(provider: Arc<dyn FleetProvider>) -> Self {
        Self { provider }
    }

    /// List running workers that have a resolvable address, in provider order.
    ///
    /// Instances that are still transitioning (no address, lookup failure) are
    /// left out. A failed listing is logged and reported as an empty fleet, so
    /// callers keep waiting rather than aborting.
    pub async fn list_running_workers(&self) -> Vec<Worker> {
        let instances = match self.provider.list_managed_instances().await {
            Ok(instances) => instances,
            Err(e) => {
                error!(error = %e, "Failed to list managed instances");
                return Vec::new();
            }
        };

        let running: Vec<_> = instances
            .into_iter()
            .filter(|instance| instance.status == InstanceStatus::Running)
            .collect();

        let lookups = running
            .iter()
            .map(|instance| self.provider.get_instance(&instance.name));
        let details = join_all(lookups).await;

        let mut workers = Vec::with_capacity(running.len());
        for (instance, result) in running.iter().zip(details) {
            match result {
                Ok(details) if details.status == InstanceStatus::Running => {
                    match details.address {
                        Some(address) => workers.push(Worker::new(details.name, address)),
                        None => {
                            debug!(
                                instance = %instance.name,
                                "Running instance has no address yet"
                            )
                        }
                    }
                }
                Ok(details) => {
                    debug!(
                        instance = %instance.name,
                        status = %details.status,
                        "Instance left running state"
                    )
                }
                Err(e) => debug!(instance = %instance.name, error = %e, "Instance lookup failed"),
            }
        }

        workers
    }
}
