//! Render gateway
//!
//! Sits in front of a managed group of render workers. This service:
//! - Scales the group with the number of in-flight render jobs
//! - Routes each job to exactly one idle, running worker
//! - Streams the rendered artifact back to the caller
//! - Scales the group to zero when an idle worker asks it to

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mapanim_fleet::{
    ComputeEngineConfig, ComputeEngineFleet, FleetProvider, InMemoryFleet, TokenSource,
};
use mapanim_gateway::{
    api,
    config::{Config, ProviderConfig},
    Gateway, GatewaySettings,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for individual fleet provider API calls.
const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_provider(config: &Config) -> Result<Arc<dyn FleetProvider>> {
    match &config.provider {
        ProviderConfig::Compute {
            api_url,
            project,
            zone,
            group,
            address_kind,
            access_token,
            metadata_token_url,
        } => {
            let token_source = match access_token {
                Some(token) => TokenSource::Static(token.clone()),
                None => TokenSource::Metadata {
                    url: metadata_token_url.clone(),
                },
            };
            let fleet = ComputeEngineFleet::new(
                ComputeEngineConfig {
                    api_url: api_url.clone(),
                    project: project.clone(),
                    zone: zone.clone(),
                    group: group.clone(),
                    worker_port: config.worker_port,
                    address_kind: *address_kind,
                    request_timeout: PROVIDER_REQUEST_TIMEOUT,
                },
                token_source,
            )
            .context("Failed to build Compute Engine client")?;
            info!(project = %project, zone = %zone, group = %group, "Using Compute Engine fleet");
            Ok(Arc::new(fleet))
        }
        ProviderConfig::Memory { workers } => {
            info!(worker_count = workers.len(), "Using in-memory fleet");
            Ok(Arc::new(InMemoryFleet::with_workers(workers.iter().copied())))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to RENDER_GATEWAY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting render gateway");
    info!(
        listen_addr = %config.listen_addr,
        max_workers = config.max_workers,
        worker_port = config.worker_port,
        boot_poll_attempts = config.admission.poll_attempts,
        render_timeout_secs = config.proxy.render_timeout.as_secs(),
        "Configuration loaded"
    );

    let provider = build_provider(&config)?;
    let gateway = Gateway::new(
        provider,
        GatewaySettings {
            max_workers: config.max_workers,
            shutdown_key: config.shutdown_key.clone(),
            admission: config.admission.clone(),
            probe: config.probe.clone(),
            proxy: config.proxy.clone(),
        },
    )
    .context("Failed to build HTTP client")?;

    let app = api::create_router(gateway);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    });

    if let Err(e) = server.await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Render gateway stopped");
    Ok(())
}
