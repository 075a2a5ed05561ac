//! Error types for fleet provider operations.

use thiserror::Error;

/// Errors returned by a [`FleetProvider`](crate::FleetProvider).
#[derive(Debug, Error)]
pub enum FleetError {
    /// The HTTP request to the provider could not be completed.
    #[error("fleet provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("fleet provider returned {status}: {body}")]
    Api { status: u16, body: String },

    /// No usable access token could be obtained.
    #[error("failed to obtain provider access token: {0}")]
    Auth(String),

    /// The named instance is not (or no longer) part of the group.
    #[error("instance not found: {0}")]
    NotFound(String),

    /// The provider response could not be interpreted.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The provider refused the operation for a reason of its own.
    #[error("fleet provider unavailable: {0}")]
    Unavailable(String),
}

impl FleetError {
    /// Returns true if the instance simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FleetError::NotFound(_))
    }
}
