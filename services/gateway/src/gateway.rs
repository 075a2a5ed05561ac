//! The gateway: admission, allocation and proxying wired together.
//!
//! A render job goes through:
//!
//! ```text
//! admit (demand + 1) -> scale to demand -> poll for idle worker + claim
//!     -> probe (best effort) -> proxy + stream -> release (demand - 1)
//! ```
//!
//! The gateway is cheap to clone and is used directly as the HTTP state.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Response};
use mapanim_fleet::FleetProvider;
use serde::Serialize;
use tracing::info;

use crate::allocator::{AdmissionConfig, Allocator};
use crate::error::GatewayError;
use crate::fleet::{FleetDirectory, FleetScaler};
use crate::job::{JobPhase, RenderJob};
use crate::ledger::{Ledger, LedgerSnapshot};
use crate::probe::{ProbeConfig, ReadinessProber};
use crate::proxy::{Proxy, ProxyConfig};
use crate::shutdown::ShutdownController;

/// Settings the gateway core needs.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub max_workers: u32,
    pub shutdown_key: String,
    pub admission: AdmissionConfig,
    pub probe: ProbeConfig,
    pub proxy: ProxyConfig,
}

/// Gateway-wide status, as served on `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub max_workers: u32,
    pub requested_workers: Option<u32>,
    #[serde(flatten)]
    pub ledger: LedgerSnapshot,
}

/// Shared gateway state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    ledger: Arc<Ledger>,
    scaler: Arc<FleetScaler>,
    allocator: Allocator,
    proxy: Proxy,
    shutdown: ShutdownController,
}

impl Gateway {
    /// Build a gateway over `provider`.
    pub fn new(
        provider: Arc<dyn FleetProvider>,
        settings: GatewaySettings,
    ) -> Result<Self, reqwest::Error> {
        // One pooled client for probes and proxied renders. Timeouts are set per request.
        let client = reqwest::Client::builder().build()?;

        let ledger = Arc::new(Ledger::new());
        let directory = FleetDirectory::new(Arc::clone(&provider));
        let scaler = Arc::new(FleetScaler::new(
            provider,
            Arc::clone(&ledger),
            settings.max_workers,
        ));
        let allocator = Allocator::new(directory, Arc::clone(&ledger), settings.admission);
        let prober = ReadinessProber::new(client.clone(), settings.probe);
        let proxy = Proxy::new(client, prober, settings.proxy);
        let shutdown = ShutdownController::new(Arc::clone(&scaler), &settings.shutdown_key);

        Ok(Self {
            inner: Arc::new(GatewayInner {
                ledger,
                scaler,
                allocator,
                proxy,
                shutdown,
            }),
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.inner.ledger
    }

    /// Run one render job to the point where its response starts streaming.
    ///
    /// Every error path resolves the job before returning.
    pub async fn render(
        &self,
        job: RenderJob,
        credential: Option<HeaderValue>,
    ) -> Result<Response<Body>, GatewayError> {
        let inner = &self.inner;
        let (mut ticket, demand) = inner.ledger.admit();
        info!(
            job_id = %ticket.id(),
            demand,
            busy = inner.ledger.occupied_count(),
            "Render job accepted"
        );

        ticket.set_phase(JobPhase::Scaling);
        inner
            .scaler
            .scale_to_demand()
            .await
            .map_err(GatewayError::Admission)?;

        ticket.set_phase(JobPhase::AwaitingWorker);
        let worker = inner.allocator.acquire(&mut ticket).await?;

        inner.proxy.forward(job, worker, credential, ticket).await
    }

    /// Scale the fleet to zero on behalf of an idle worker.
    pub async fn shutdown(&self, credential: Option<&str>) -> Result<(), GatewayError> {
        self.inner.shutdown.request_shutdown(credential).await
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            max_workers: self.inner.scaler.max_workers(),
            requested_workers: self.inner.scaler.last_requested(),
            ledger: self.inner.ledger.snapshot(),
        }
    }
}
