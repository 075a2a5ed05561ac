//! Fleet teardown on behalf of idle workers.
//!
//! A render worker that has sat idle past its own threshold cannot scale the
//! fleet itself. It calls back into the gateway with the shared secret, and
//! the gateway zeroes the fleet and forgets all local job state: once the
//! fleet is gone no in-flight job can complete.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::error::GatewayError;
use crate::fleet::FleetScaler;

/// Authenticated scale-to-zero path.
pub struct ShutdownController {
    scaler: Arc<FleetScaler>,
    secret_digest: [u8; 32],
}

fn digest(value: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(value.as_bytes()));
    out
}

/// Compare digests without short-circuiting on the first differing byte.
fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl ShutdownController {
    pub fn new(scaler: Arc<FleetScaler>, shared_secret: &str) -> Self {
        Self {
            scaler,
            secret_digest: digest(shared_secret),
        }
    }

    /// Validate `credential`, scale the fleet to zero and reset the ledger.
    ///
    /// A bad credential changes nothing. A failed resize leaves the ledger
    /// as it was.
    pub async fn request_shutdown(&self, credential: Option<&str>) -> Result<(), GatewayError> {
        let authorized = credential
            .map(|c| digests_match(&digest(c), &self.secret_digest))
            .unwrap_or(false);
        if !authorized {
            warn!(
                credential_present = credential.is_some(),
                "Rejected unauthorized fleet shutdown request"
            );
            return Err(GatewayError::Unauthorized);
        }

        info!("Fleet shutdown requested by worker; scaling to zero");
        self.scaler.scale_to_zero().await.map_err(|e| {
            error!(error = %e, "Fleet shutdown failed");
            GatewayError::Shutdown(e)
        })
    }
}
