//! Gateway error taxonomy.

use std::net::SocketAddr;

use mapanim_fleet::FleetError;
use thiserror::Error;

/// Errors a render job or shutdown request can end with.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request body is not a usable job description.
    #[error("invalid render job: {0}")]
    InvalidJob(String),

    /// The fleet resize issued on admission failed.
    #[error("fleet resize failed during admission: {0}")]
    Admission(#[source] FleetError),

    /// No idle worker appeared within the polling bound.
    #[error("timed out waiting for an idle worker after {attempts} polls")]
    BootTimeout { attempts: u32 },

    /// The worker's transport failed before a response head arrived.
    #[error("upstream worker {worker} failed: {source}")]
    Upstream {
        worker: SocketAddr,
        #[source]
        source: reqwest::Error,
    },

    /// The proxy task ended without reporting a response head.
    #[error("proxying to worker {worker} was interrupted")]
    Interrupted { worker: SocketAddr },

    /// The worker did not answer within the render bound.
    #[error("render timed out on worker {worker}")]
    RenderTimeout { worker: SocketAddr },

    /// Shutdown was requested with a missing or wrong credential.
    #[error("invalid shutdown credential")]
    Unauthorized,

    /// The fleet resize to zero failed.
    #[error("fleet resize to zero failed: {0}")]
    Shutdown(#[source] FleetError),
}

impl GatewayError {
    /// Whether the same request might succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Admission(_)
                | GatewayError::BootTimeout { .. }
                | GatewayError::Upstream { .. }
                | GatewayError::Interrupted { .. }
                | GatewayError::RenderTimeout { .. }
        )
    }
}
