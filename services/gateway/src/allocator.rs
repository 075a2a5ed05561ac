//! Worker allocation.
//!
//! Matches waiting jobs to running workers that no other job holds. The
//! allocator polls the fleet directory at a fixed interval because a fresh
//! worker can take minutes to boot after a resize.
//!
//! Claims go through the ledger as a compare-and-set. Two jobs can both see
//! the same worker as idle between listing and claiming; only one claim
//! succeeds and the loser moves on to the next idle candidate or polls again.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mapanim_fleet::Worker;
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::fleet::FleetDirectory;
use crate::ledger::{JobTicket, Ledger};

/// Bounds on how long a job waits for a worker.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 90,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Hands out idle workers and owns the busy set via the ledger.
pub struct Allocator {
    directory: FleetDirectory,
    ledger: Arc<Ledger>,
    config: AdmissionConfig,
}

impl Allocator {
    pub fn new(directory: FleetDirectory, ledger: Arc<Ledger>, config: AdmissionConfig) -> Self {
        Self {
            directory,
            ledger,
            config,
        }
    }

    async fn idle_workers(&self) -> (Vec<Worker>, usize) {
        let workers = self.directory.list_running_workers().await;
        let running = workers.len();
        let idle = workers
            .into_iter()
            .filter(|worker| !self.ledger.is_occupied(&worker.address))
            .collect();
        (idle, running)
    }

    /// The first running worker that no job holds, if any.
    pub async fn find_idle_worker(&self) -> Option<Worker> {
        self.idle_workers().await.0.into_iter().next()
    }

    /// Mark `address` busy. Returns false if it already was.
    pub fn claim(&self, address: SocketAddr) -> bool {
        self.ledger.claim(address)
    }

    /// Mark `address` idle. Releasing an idle address is a no-op.
    pub fn release(&self, address: SocketAddr) -> bool {
        self.ledger.release(address)
    }

    /// Wait for an idle worker and claim it for `ticket`.
    ///
    /// Polls up to the configured number of attempts. On success the worker's
    /// address is held by the ticket; on timeout nothing is held.
    pub async fn acquire(&self, ticket: &mut JobTicket) -> Result<Worker, GatewayError> {
        let attempts = self.config.poll_attempts.max(1);

        for attempt in 1..=attempts {
            let (idle, running) = self.idle_workers().await;

            for worker in idle {
                if ticket.try_claim(worker.address) {
                    info!(
                        job_id = %ticket.id(),
                        worker = %worker.name,
                        address = %worker.address,
                        attempt,
                        "Claimed idle worker"
                    );
                    return Ok(worker);
                }
                debug!(
                    job_id = %ticket.id(),
                    address = %worker.address,
                    "Worker claimed by another job first"
                );
            }

            debug!(
                job_id = %ticket.id(),
                attempt,
                running,
                busy = self.ledger.occupied_count(),
                "No idle worker yet"
            );

            if attempt < attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        Err(GatewayError::BootTimeout { attempts })
    }
}
