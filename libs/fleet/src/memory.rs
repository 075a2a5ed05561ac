//! In-memory fleet provider.
//!
//! Models a managed group over a fixed pool of worker addresses. A resize to
//! `n` makes the first `n` pool entries members of the group (running, unless
//! a status override says otherwise); the rest disappear. Convergence is
//! immediate.
//!
//! Used by the gateway's `memory` provider mode for local development against
//! hand-started workers, and by tests that need to control provider state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::FleetError;
use crate::provider::FleetProvider;
use crate::types::{InstanceDetails, InstanceStatus, ManagedInstance};

struct PoolEntry {
    name: String,
    address: Option<SocketAddr>,
    status: Option<InstanceStatus>,
}

#[derive(Default)]
struct FleetState {
    pool: Vec<PoolEntry>,
    size: u32,
    resize_calls: Vec<u32>,
    list_calls: u32,
    fail_resize: Option<String>,
    fail_list: Option<String>,
    resize_delays: HashMap<u32, Duration>,
}

impl FleetState {
    fn members(&self) -> impl Iterator<Item = &PoolEntry> {
        self.pool.iter().take(self.size as usize)
    }
}

/// Fleet provider backed by an in-process pool of worker addresses.
#[derive(Default)]
pub struct InMemoryFleet {
    state: Mutex<FleetState>,
}

impl InMemoryFleet {
    /// Create an empty fleet with no pool entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fleet whose pool is the given addresses, named
    /// `render-worker-{n}` in order. The group starts at size zero.
    pub fn with_workers(addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        let fleet = Self::new();
        for (i, address) in addresses.into_iter().enumerate() {
            fleet.push_worker(format!("render-worker-{}", i + 1), Some(address));
        }
        fleet
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a pool entry. `None` models an instance that never gets an address.
    pub fn push_worker(&self, name: impl Into<String>, address: Option<SocketAddr>) {
        self.lock().pool.push(PoolEntry {
            name: name.into(),
            address,
            status: None,
        });
    }

    /// Pin the reported status of a pool entry.
    pub fn set_status(&self, name: &str, status: InstanceStatus) {
        let mut state = self.lock();
        if let Some(entry) = state.pool.iter_mut().find(|e| e.name == name) {
            entry.status = Some(status);
        }
    }

    /// Set the group size directly, without recording a resize call.
    pub fn set_size(&self, size: u32) {
        self.lock().size = size;
    }

    /// Make every subsequent resize fail with the given message (or succeed again with `None`).
    pub fn fail_resize(&self, message: Option<&str>) {
        self.lock().fail_resize = message.map(str::to_string);
    }

    /// Make every subsequent listing fail with the given message (or succeed again with `None`).
    pub fn fail_list(&self, message: Option<&str>) {
        self.lock().fail_list = message.map(str::to_string);
    }

    /// Make resizes to `size` take `delay` before they are applied.
    pub fn delay_resize(&self, size: u32, delay: Duration) {
        self.lock().resize_delays.insert(size, delay);
    }

    /// Current group size.
    pub fn size(&self) -> u32 {
        self.lock().size
    }

    /// Every size passed to a successful or failed resize, in call order.
    pub fn resize_calls(&self) -> Vec<u32> {
        self.lock().resize_calls.clone()
    }

    /// Number of times the group has been listed.
    pub fn list_calls(&self) -> u32 {
        self.lock().list_calls
    }
}

#[async_trait]
impl FleetProvider for InMemoryFleet {
    async fn resize(&self, size: u32) -> Result<(), FleetError> {
        let delay = {
            let mut state = self.lock();
            state.resize_calls.push(size);
            if let Some(message) = &state.fail_resize {
                return Err(FleetError::Unavailable(message.clone()));
            }
            state.resize_delays.get(&size).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock().size = size;
        debug!(size, "In-memory fleet resized");
        Ok(())
    }

    async fn list_managed_instances(&self) -> Result<Vec<ManagedInstance>, FleetError> {
        let mut state = self.lock();
        state.list_calls += 1;
        if let Some(message) = &state.fail_list {
            return Err(FleetError::Unavailable(message.clone()));
        }
        Ok(state
            .members()
            .map(|entry| ManagedInstance {
                name: entry.name.clone(),
                status: entry.status.unwrap_or(InstanceStatus::Running),
            })
            .collect())
    }

    async fn get_instance(&self, name: &str) -> Result<InstanceDetails, FleetError> {
        let state = self.lock();
        let entry = state
            .members()
            .find(|entry| entry.name == name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;

        let status = entry.status.unwrap_or(InstanceStatus::Running);
        Ok(InstanceDetails {
            name: entry.name.clone(),
            status,
            address: entry.address.filter(|_| status == InstanceStatus::Running),
        })
    }
}
