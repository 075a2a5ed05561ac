//! Render jobs as seen by the gateway.
//!
//! The gateway does not interpret the job description beyond checking that
//! it is a JSON object. Coordinates, resolution, frame rate, duration and
//! quality are the worker's business and are forwarded verbatim.

use std::fmt;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use ulid::Ulid;

use crate::error::GatewayError;

/// Identifier of one render job, formatted as `job_{ulid}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(Ulid);

impl JobId {
    pub const PREFIX: &'static str = "job";

    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where a job currently is in its lifecycle.
///
/// `Released` is not a phase: a released job is no longer tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Accepted,
    Scaling,
    AwaitingWorker,
    Probing,
    Routed,
    Streaming,
}

/// How a job was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
        }
    }
}

/// A validated render job description.
#[derive(Debug, Clone)]
pub struct RenderJob {
    body: Bytes,
}

impl RenderJob {
    /// Accept a request body if it is a JSON object.
    pub fn from_body(body: Bytes) -> Result<Self, GatewayError> {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Object(_)) => Ok(Self { body }),
            Ok(_) => Err(GatewayError::InvalidJob(
                "job description must be a JSON object".to_string(),
            )),
            Err(e) => Err(GatewayError::InvalidJob(e.to_string())),
        }
    }

    /// Size of the job description in bytes.
    pub fn size_bytes(&self) -> usize {
        self.body.len()
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}
