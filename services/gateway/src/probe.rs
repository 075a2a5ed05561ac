//! Worker readiness probing.
//!
//! A worker that the provider reports as running may still be booting its
//! render service. Before proxying, the gateway polls the worker's `/health`
//! route until it answers.
//!
//! Probing is best effort: a worker that never answers within the attempt
//! budget is still used. Failing a job fast on a slow boot is more expensive
//! than one failed proxy attempt.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info, warn};

/// Probe tuning.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Timeout for a single health request.
    pub request_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Alive,
    NotReady,
}

/// Polls worker health endpoints.
#[derive(Clone)]
pub struct ReadinessProber {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl ReadinessProber {
    pub fn new(client: reqwest::Client, config: ProbeConfig) -> Self {
        Self { client, config }
    }

    /// Probe with the configured attempt budget.
    pub async fn await_ready(&self, address: SocketAddr) -> bool {
        self.await_ready_with(address, self.config.max_attempts, self.config.interval)
            .await
    }

    /// Probe `address` up to `max_attempts` times, `interval` apart.
    ///
    /// Returns true as soon as the worker answers, false once the budget is
    /// spent.
    pub async fn await_ready_with(
        &self,
        address: SocketAddr,
        max_attempts: u32,
        interval: Duration,
    ) -> bool {
        let url = format!("http://{address}/health");
        debug!(url = %url, max_attempts, "Waiting for worker service");

        for attempt in 1..=max_attempts {
            if self.probe_once(&url).await == ProbeOutcome::Alive {
                info!(worker = %address, attempt, "Worker service is answering");
                return true;
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        warn!(
            worker = %address,
            max_attempts,
            "Worker readiness check exhausted; proceeding anyway"
        );
        false
    }

    async fn probe_once(&self, url: &str) -> ProbeOutcome {
        let result = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await;

        match result {
            // 404 means the process is up but does not expose /health.
            Ok(response)
                if response.status().is_success() || response.status() == StatusCode::NOT_FOUND =>
            {
                ProbeOutcome::Alive
            }
            Ok(response) => {
                debug!(url, status = %response.status(), "Health probe returned non-ready status");
                ProbeOutcome::NotReady
            }
            Err(e) if e.is_timeout() => {
                debug!(url, "Health probe timed out");
                ProbeOutcome::NotReady
            }
            Err(e) => {
                debug!(url, error = %e, "Health probe connection failed");
                ProbeOutcome::NotReady
            }
        }
    }
}
