//! Worker and lifecycle types reported by fleet providers.

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

/// Lifecycle state of an instance as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Being created or booted; no address yet.
    Provisioning,
    /// Running and (once it has an address) routable.
    Running,
    /// Stopping, stopped, suspended or deleted.
    Terminating,
    /// Anything the gateway does not recognise.
    Unknown,
}

impl InstanceStatus {
    /// Map a provider status string onto the gateway's lifecycle states.
    pub fn from_provider(status: Option<&str>) -> Self {
        match status {
            Some("PROVISIONING" | "STAGING") => Self::Provisioning,
            Some("RUNNING") => Self::Running,
            Some("STOPPING" | "STOPPED" | "SUSPENDING" | "SUSPENDED" | "TERMINATED") => {
                Self::Terminating
            }
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Running => "RUNNING",
            Self::Terminating => "TERMINATING",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance as listed in the managed group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedInstance {
    /// Instance name, unique within the group.
    pub name: String,
    /// Current lifecycle state.
    pub status: InstanceStatus,
}

/// Detailed view of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDetails {
    pub name: String,
    pub status: InstanceStatus,
    /// Service address of the worker. Only assigned once the instance runs.
    pub address: Option<SocketAddr>,
}

/// A running worker with a resolved service address.
///
/// This is the only shape the gateway routes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Worker {
    pub name: String,
    pub address: SocketAddr,
}

impl Worker {
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    /// Base URL of the worker's HTTP service.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }
}
