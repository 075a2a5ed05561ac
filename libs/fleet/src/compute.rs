//! Compute Engine managed instance group client.
//!
//! Talks to the Compute Engine REST API (v1):
//! - `instanceGroupManagers.resize` to request a group size
//! - `instanceGroupManagers.listManagedInstances` to enumerate members
//! - `instances.get` to resolve an instance's network address
//!
//! Access tokens come either from configuration or from the GCE metadata
//! server and are cached until shortly before they expire.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::FleetError;
use crate::provider::FleetProvider;
use crate::types::{InstanceDetails, InstanceStatus, ManagedInstance};

/// Default Compute Engine API root.
pub const DEFAULT_API_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Default metadata server token endpoint.
pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before their reported expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Which interface address a worker is reached on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressKind {
    /// The NAT (external) IP of the first access config.
    #[default]
    External,
    /// The VPC-internal IP of the first network interface.
    Internal,
}

/// Where bearer tokens for the API come from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// A fixed token (for example from `gcloud auth print-access-token`).
    Static(String),
    /// The instance metadata server at the given URL.
    Metadata { url: String },
}

/// Identity of the managed group and how to reach its workers.
#[derive(Debug, Clone)]
pub struct ComputeEngineConfig {
    pub api_url: String,
    pub project: String,
    pub zone: String,
    pub group: String,
    /// Port the render worker service listens on.
    pub worker_port: u16,
    pub address_kind: AddressKind,
    /// Per-call timeout for API requests.
    pub request_timeout: Duration,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListManagedInstancesResponse {
    #[serde(default)]
    managed_instances: Vec<ManagedInstanceItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedInstanceItem {
    instance: String,
    #[serde(default)]
    instance_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceResource {
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(rename = "networkIP", default)]
    network_ip: Option<String>,
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
struct AccessConfig {
    #[serde(rename = "natIP", default)]
    nat_ip: Option<String>,
}

/// Fleet provider backed by a Compute Engine managed instance group.
pub struct ComputeEngineFleet {
    client: reqwest::Client,
    config: ComputeEngineConfig,
    token_source: TokenSource,
    token: Mutex<Option<CachedToken>>,
}

impl ComputeEngineFleet {
    /// Create a new client for the configured group.
    pub fn new(config: ComputeEngineConfig, token_source: TokenSource) -> Result<Self, FleetError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            token_source,
            token: Mutex::new(None),
        })
    }

    fn zone_url(&self) -> String {
        format!(
            "{}/projects/{}/zones/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.project,
            self.config.zone
        )
    }

    fn group_url(&self) -> String {
        format!(
            "{}/instanceGroupManagers/{}",
            self.zone_url(),
            self.config.group
        )
    }

    async fn access_token(&self) -> Result<String, FleetError> {
        let url = match &self.token_source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Metadata { url } => url,
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        debug!(url = %url, "Fetching access token from metadata server");
        let response = self
            .client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| FleetError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FleetError::Auth(format!(
                "metadata server returned {status}: {body}"
            )));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| FleetError::Auth(e.to_string()))?;

        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    async fn check(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<reqwest::Response, FleetError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FleetError::NotFound(operation.to_string()));
        }
        error!(status = %status, body = %body, operation, "Compute Engine request failed");
        Err(FleetError::Api {
            status: status.as_u16(),
            body,
        })
    }

    fn resolve_address(&self, instance: &InstanceResource) -> Option<SocketAddr> {
        let nic = instance.network_interfaces.first()?;
        let raw = match self.config.address_kind {
            AddressKind::External => nic.access_configs.first()?.nat_ip.as_deref()?,
            AddressKind::Internal => nic.network_ip.as_deref()?,
        };
        let ip: IpAddr = raw.parse().ok()?;
        Some(SocketAddr::new(ip, self.config.worker_port))
    }
}

/// Instance names in list results are full resource URLs.
fn instance_name(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}

#[async_trait]
impl FleetProvider for ComputeEngineFleet {
    async fn resize(&self, size: u32) -> Result<(), FleetError> {
        let token = self.access_token().await?;
        let url = format!("{}/resize", self.group_url());
        debug!(url = %url, size, "Requesting group resize");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .query(&[("size", size)])
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await?;

        // The returned operation is not awaited: convergence is observed by listing.
        Self::check(response, "resize").await?;
        Ok(())
    }

    async fn list_managed_instances(&self) -> Result<Vec<ManagedInstance>, FleetError> {
        let token = self.access_token().await?;
        let url = format!("{}/listManagedInstances", self.group_url());

        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .post(&url)
                .bearer_auth(&token)
                .header(reqwest::header::CONTENT_LENGTH, "0");
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }

            let response = Self::check(request.send().await?, "listManagedInstances").await?;
            let page: ListManagedInstancesResponse = response
                .json()
                .await
                .map_err(|e| FleetError::Malformed(e.to_string()))?;

            instances.extend(page.managed_instances.into_iter().map(|item| ManagedInstance {
                name: instance_name(&item.instance).to_string(),
                status: InstanceStatus::from_provider(item.instance_status.as_deref()),
            }));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!(count = instances.len(), "Listed managed instances");
        Ok(instances)
    }

    async fn get_instance(&self, name: &str) -> Result<InstanceDetails, FleetError> {
        let token = self.access_token().await?;
        let url = format!("{}/instances/{}", self.zone_url(), name);

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let response = Self::check(response, name).await?;
        let instance: InstanceResource = response
            .json()
            .await
            .map_err(|e| FleetError::Malformed(e.to_string()))?;

        let status = InstanceStatus::from_provider(instance.status.as_deref());
        let address = match status {
            InstanceStatus::Running => self.resolve_address(&instance),
            _ => None,
        };

        Ok(InstanceDetails {
            name: instance.name,
            status,
            address,
        })
    }
}
