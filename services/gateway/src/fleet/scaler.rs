//! Fleet scaler: demand-driven resize requests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use mapanim_fleet::{FleetError, FleetProvider};
use tokio::sync::Mutex;
use tracing::info;

use crate::ledger::Ledger;

const NONE_REQUESTED: i64 = -1;

/// Issues capped resize requests to the fleet provider.
///
/// Resizing is a hint. A resize returns as soon as the provider accepts the
/// request and never waits for the group to converge; the
/// [`FleetDirectory`](super::FleetDirectory) is the only source of truth for
/// which workers exist.
///
/// Resizes are issued one at a time. Demand-driven sizes are read from the
/// ledger only once the previous resize has been accepted, so a slow request
/// can never be overtaken by an older, smaller one.
pub struct FleetScaler {
    provider: Arc<dyn FleetProvider>,
    ledger: Arc<Ledger>,
    max_workers: u32,
    resizing: Mutex<()>,
    last_requested: AtomicI64,
}

impl FleetScaler {
    pub fn new(provider: Arc<dyn FleetProvider>, ledger: Arc<Ledger>, max_workers: u32) -> Self {
        Self {
            provider,
            ledger,
            max_workers,
            resizing: Mutex::new(()),
            last_requested: AtomicI64::new(NONE_REQUESTED),
        }
    }

    pub fn max_workers(&self) -> u32 {
        self.max_workers
    }

    /// The size most recently accepted by the provider.
    pub fn last_requested(&self) -> Option<u32> {
        u32::try_from(self.last_requested.load(Ordering::Acquire)).ok()
    }

    /// Request a fleet of `min(demand, max_workers)` workers, reading demand
    /// from the ledger at the time the resize is issued.
    ///
    /// Returns the size actually requested.
    pub async fn scale_to_demand(&self) -> Result<u32, FleetError> {
        let _resizing = self.resizing.lock().await;
        let desired = self.ledger.demand();
        self.resize(desired).await
    }

    /// Request an empty fleet and, once accepted, reset the ledger.
    ///
    /// No demand-driven resize can slip in between the two. On failure the
    /// ledger is left as it was.
    pub async fn scale_to_zero(&self) -> Result<(), FleetError> {
        let _resizing = self.resizing.lock().await;
        self.resize(0).await?;
        self.ledger.reset();
        Ok(())
    }

    async fn resize(&self, desired: u64) -> Result<u32, FleetError> {
        let capped = desired.min(u64::from(self.max_workers)) as u32;
        info!(
            size = capped,
            desired,
            max_workers = self.max_workers,
            "Requesting fleet resize"
        );

        self.provider.resize(capped).await?;
        self.last_requested.store(i64::from(capped), Ordering::Release);
        Ok(capped)
    }
}
