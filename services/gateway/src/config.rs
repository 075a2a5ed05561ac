//! Gateway configuration.
//!
//! Everything is read from the environment once at startup.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mapanim_fleet::{AddressKind, DEFAULT_API_URL, DEFAULT_METADATA_TOKEN_URL};

use crate::allocator::AdmissionConfig;
use crate::probe::ProbeConfig;
use crate::proxy::ProxyConfig;

/// Which fleet provider backs the gateway.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// A Compute Engine managed instance group.
    Compute {
        api_url: String,
        project: String,
        zone: String,
        group: String,
        address_kind: AddressKind,
        /// Static bearer token; the metadata server is used when absent.
        access_token: Option<String>,
        metadata_token_url: String,
    },
    /// An in-process pool of already-running workers (local development).
    Memory { workers: Vec<SocketAddr> },
}

/// Gateway configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Shared secret workers present to `/shutdown`.
    pub shutdown_key: String,

    /// Port the render worker service listens on.
    pub worker_port: u16,

    /// Upper bound on the fleet size.
    pub max_workers: u32,

    pub provider: ProviderConfig,
    pub admission: AdmissionConfig,
    pub probe: ProbeConfig,
    pub proxy: ProxyConfig,
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .ok()
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("Missing required setting {name}"))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = match lookup("RENDER_GATEWAY_LISTEN_ADDR") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("RENDER_GATEWAY_LISTEN_ADDR is not a socket address: {addr:?}"))?,
            None => {
                let port: u16 = parse_var(&lookup, "PORT", 8080)?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let log_level =
            lookup("RENDER_GATEWAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let shutdown_key = required(&lookup, "RENDER_GATEWAY_SHUTDOWN_KEY")?;
        let worker_port: u16 = parse_var(&lookup, "RENDER_WORKER_PORT", 8080)?;

        let max_workers: u32 = parse_var(&lookup, "RENDER_FLEET_MAX_WORKERS", 10)?;
        if max_workers == 0 {
            bail!("RENDER_FLEET_MAX_WORKERS must be at least 1");
        }

        let provider = match lookup("RENDER_FLEET_PROVIDER").as_deref() {
            None | Some("compute") => {
                let address_kind = match lookup("RENDER_FLEET_ADDRESS").as_deref() {
                    None | Some("external") => AddressKind::External,
                    Some("internal") => AddressKind::Internal,
                    Some(other) => {
                        bail!("RENDER_FLEET_ADDRESS must be 'external' or 'internal', got {other:?}")
                    }
                };
                ProviderConfig::Compute {
                    api_url: lookup("RENDER_COMPUTE_API_URL")
                        .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                    project: required(&lookup, "RENDER_FLEET_PROJECT")?,
                    zone: required(&lookup, "RENDER_FLEET_ZONE")?,
                    group: required(&lookup, "RENDER_FLEET_GROUP")?,
                    address_kind,
                    access_token: lookup("RENDER_COMPUTE_ACCESS_TOKEN")
                        .filter(|t| !t.trim().is_empty()),
                    metadata_token_url: lookup("RENDER_COMPUTE_METADATA_URL")
                        .unwrap_or_else(|| DEFAULT_METADATA_TOKEN_URL.to_string()),
                }
            }
            Some("memory") => {
                let workers = lookup("RENDER_FLEET_WORKERS")
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<SocketAddr>()
                            .with_context(|| format!("RENDER_FLEET_WORKERS entry is not a socket address: {s:?}"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                ProviderConfig::Memory { workers }
            }
            Some(other) => {
                bail!("RENDER_FLEET_PROVIDER must be 'compute' or 'memory', got {other:?}")
            }
        };

        let admission = AdmissionConfig {
            poll_attempts: parse_var(&lookup, "RENDER_BOOT_POLL_ATTEMPTS", 90u32)?.max(1),
            poll_interval: Duration::from_millis(parse_var(
                &lookup,
                "RENDER_BOOT_POLL_INTERVAL_MS",
                2000u64,
            )?),
        };

        let probe = ProbeConfig {
            max_attempts: parse_var(&lookup, "RENDER_PROBE_ATTEMPTS", 60u32)?.max(1),
            interval: Duration::from_millis(parse_var(
                &lookup,
                "RENDER_PROBE_INTERVAL_MS",
                2000u64,
            )?),
            request_timeout: Duration::from_millis(
                parse_var(&lookup, "RENDER_PROBE_TIMEOUT_MS", 2000u64)?.max(1),
            ),
        };

        let proxy = ProxyConfig {
            render_timeout: Duration::from_secs(
                parse_var(&lookup, "RENDER_TIMEOUT_SECS", 3600u64)?.max(1),
            ),
            worker_api_key: lookup("RENDER_WORKER_API_KEY").filter(|k| !k.is_empty()),
        };

        Ok(Self {
            listen_addr,
            log_level,
            shutdown_key,
            worker_port,
            max_workers,
            provider,
            admission,
            probe,
            proxy,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |name| vars.get(name).cloned())
    }

    const COMPUTE: &[(&str, &str)] = &[
        ("RENDER_GATEWAY_SHUTDOWN_KEY", "k"),
        ("RENDER_FLEET_PROJECT", "maps"),
        ("RENDER_FLEET_ZONE", "us-central1-a"),
        ("RENDER_FLEET_GROUP", "renderers"),
    ];

    #[test]
    fn test_compute_defaults() {
        let config = load(COMPUTE).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.worker_port, 8080);
        assert_eq!(config.admission.poll_attempts, 90);
        assert_eq!(config.admission.poll_interval, Duration::from_secs(2));
        assert_eq!(config.probe.max_attempts, 60);
        assert_eq!(config.proxy.render_timeout, Duration::from_secs(3600));
        match config.provider {
            ProviderConfig::Compute {
                api_url,
                address_kind,
                access_token,
                ..
            } => {
                assert_eq!(api_url, DEFAULT_API_URL);
                assert_eq!(address_kind, AddressKind::External);
                assert_eq!(access_token, None);
            }
            other => panic!("unexpected provider {other:?}"),
        }
    }

    #[test]
    fn test_port_and_overrides() {
        let mut vars = COMPUTE.to_vec();
        vars.extend([
            ("PORT", "9000"),
            ("RENDER_FLEET_MAX_WORKERS", "2"),
            ("RENDER_BOOT_POLL_ATTEMPTS", "3"),
            ("RENDER_FLEET_ADDRESS", "internal"),
        ]);
        let config = load(&vars).unwrap();

        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.admission.poll_attempts, 3);
    }

    #[test]
    fn test_memory_provider_workers() {
        let config = load(&[
            ("RENDER_GATEWAY_SHUTDOWN_KEY", "k"),
            ("RENDER_FLEET_PROVIDER", "memory"),
            ("RENDER_FLEET_WORKERS", "127.0.0.1:9001, 127.0.0.1:9002"),
        ])
        .unwrap();

        match config.provider {
            ProviderConfig::Memory { workers } => assert_eq!(workers.len(), 2),
            other => panic!("unexpected provider {other:?}"),
        }
    }

    #[test]
    fn test_missing_shutdown_key_is_an_error() {
        let err = load(&COMPUTE[1..]).unwrap_err();
        assert!(err.to_string().contains("RENDER_GATEWAY_SHUTDOWN_KEY"));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let mut vars = COMPUTE.to_vec();
        vars.push(("RENDER_FLEET_MAX_WORKERS", "0"));
        assert!(load(&vars).is_err());

        let mut vars = COMPUTE.to_vec();
        vars.push(("RENDER_TIMEOUT_SECS", "soon"));
        assert!(load(&vars).is_err());

        let mut vars = COMPUTE.to_vec();
        vars.push(("RENDER_FLEET_PROVIDER", "kubernetes"));
        assert!(load(&vars).is_err());
    }
}
