//! Demand and occupancy bookkeeping.
//!
//! The ledger is the gateway's only shared mutable state:
//! - the demand counter (jobs between acceptance and release)
//! - the occupancy set (worker addresses claimed by a job)
//! - the phase of every live job
//!
//! All of it sits behind one mutex. The lock is never held across an
//! `.await`, so every operation here is an atomic step with respect to every
//! other job.
//!
//! Jobs hold a [`JobTicket`]. The ticket resolves the job exactly once:
//! explicitly via [`JobTicket::resolve`], or as a failure when it is dropped.
//! A [`Ledger::reset`] starts a new generation; tickets from an older
//! generation resolve without touching the new generation's state.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::job::{JobId, JobOutcome, JobPhase};

#[derive(Debug)]
struct JobEntry {
    phase: JobPhase,
    worker: Option<SocketAddr>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    demand: u64,
    occupied: BTreeSet<SocketAddr>,
    jobs: BTreeMap<JobId, JobEntry>,
    generation: u64,
}

impl LedgerInner {
    fn decrement(&mut self) -> u64 {
        self.demand = self.demand.saturating_sub(1);
        self.demand
    }
}

/// One live job in a [`LedgerSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub phase: JobPhase,
    pub worker: Option<SocketAddr>,
}

/// Point-in-time copy of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub demand: u64,
    pub occupied: Vec<SocketAddr>,
    pub jobs: Vec<JobStatus>,
}

impl LedgerSnapshot {
    /// Number of live jobs currently in `phase`.
    pub fn count(&self, phase: JobPhase) -> usize {
        self.jobs.iter().filter(|j| j.phase == phase).count()
    }
}

/// Demand counter, occupancy set and job table under a single lock.
#[derive(Debug, Default)]
pub struct Ledger {
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increase demand by one, returning the new count.
    pub fn increment(&self) -> u64 {
        let mut inner = self.lock();
        inner.demand += 1;
        inner.demand
    }

    /// Decrease demand by one (never below zero), returning the new count.
    pub fn decrement(&self) -> u64 {
        self.lock().decrement()
    }

    pub fn demand(&self) -> u64 {
        self.lock().demand
    }

    /// Claim a worker address.
    ///
    /// Compare-and-set: returns false and leaves the set untouched if the
    /// address is already claimed.
    pub fn claim(&self, address: SocketAddr) -> bool {
        self.lock().occupied.insert(address)
    }

    /// Release a worker address. Releasing an unclaimed address is a no-op.
    pub fn release(&self, address: SocketAddr) -> bool {
        self.lock().occupied.remove(&address)
    }

    pub fn is_occupied(&self, address: &SocketAddr) -> bool {
        self.lock().occupied.contains(address)
    }

    pub fn occupied_count(&self) -> usize {
        self.lock().occupied.len()
    }

    /// Zero demand, clear occupancy and forget every live job.
    ///
    /// Tickets issued before the reset become inert.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let dropped_jobs = inner.jobs.len();
        inner.demand = 0;
        inner.occupied.clear();
        inner.jobs.clear();
        inner.generation += 1;
        info!(generation = inner.generation, dropped_jobs, "Ledger reset");
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.lock();
        LedgerSnapshot {
            demand: inner.demand,
            occupied: inner.occupied.iter().copied().collect(),
            jobs: inner
                .jobs
                .iter()
                .map(|(id, entry)| JobStatus {
                    id: *id,
                    phase: entry.phase,
                    worker: entry.worker,
                })
                .collect(),
        }
    }

    /// Accept a new job: increment demand and start tracking it.
    ///
    /// Returns the ticket together with the demand count that includes it.
    pub fn admit(self: &Arc<Self>) -> (JobTicket, u64) {
        let id = JobId::new();
        let mut inner = self.lock();
        inner.demand += 1;
        inner.jobs.insert(
            id,
            JobEntry {
                phase: JobPhase::Accepted,
                worker: None,
            },
        );
        let ticket = JobTicket {
            ledger: Arc::clone(self),
            id,
            generation: inner.generation,
            worker: None,
            resolved: false,
        };
        (ticket, inner.demand)
    }

    fn set_phase(&self, id: JobId, generation: u64, phase: JobPhase) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if let Some(entry) = inner.jobs.get_mut(&id) {
            entry.phase = phase;
        }
    }

    fn claim_for(&self, id: JobId, generation: u64, address: SocketAddr) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || !inner.occupied.insert(address) {
            return false;
        }
        if let Some(entry) = inner.jobs.get_mut(&id) {
            entry.worker = Some(address);
        }
        true
    }

    fn finish(&self, ticket: &JobTicket, outcome: JobOutcome) {
        let mut inner = self.lock();
        if inner.generation != ticket.generation {
            debug!(
                job_id = %ticket.id,
                outcome = outcome.as_str(),
                "Job resolved after ledger reset; nothing to release"
            );
            return;
        }

        inner.jobs.remove(&ticket.id);
        if let Some(address) = ticket.worker {
            inner.occupied.remove(&address);
        }
        let demand = inner.decrement();
        let busy = inner.occupied.len();
        drop(inner);

        match outcome {
            JobOutcome::Succeeded => info!(
                job_id = %ticket.id,
                worker = ?ticket.worker,
                demand,
                busy,
                "Job released"
            ),
            JobOutcome::Failed => warn!(
                job_id = %ticket.id,
                worker = ?ticket.worker,
                demand,
                busy,
                "Job released after failure"
            ),
        }
    }
}

/// A job's hold on demand and, once claimed, on one worker address.
#[derive(Debug)]
pub struct JobTicket {
    ledger: Arc<Ledger>,
    id: JobId,
    generation: u64,
    worker: Option<SocketAddr>,
    resolved: bool,
}

impl JobTicket {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The claimed worker address, if any.
    pub fn worker(&self) -> Option<SocketAddr> {
        self.worker
    }

    pub fn set_phase(&self, phase: JobPhase) {
        self.ledger.set_phase(self.id, self.generation, phase);
    }

    /// Claim `address` for this job.
    ///
    /// Fails if the address is held by another job, if this ticket already
    /// holds a worker, or if the ledger was reset since admission.
    pub fn try_claim(&mut self, address: SocketAddr) -> bool {
        if self.worker.is_some() {
            return false;
        }
        if self.ledger.claim_for(self.id, self.generation, address) {
            self.worker = Some(address);
            true
        } else {
            false
        }
    }

    /// Release the worker (if claimed) and decrement demand.
    pub fn resolve(mut self, outcome: JobOutcome) {
        self.resolved = true;
        self.ledger.finish(&self, outcome);
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.ledger.finish(self, JobOutcome::Failed);
        }
    }
}
