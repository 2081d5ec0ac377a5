//! Externally visible gateway location.
//!
//! The broker reaches the caching service through the gateway, so it needs
//! the gateway's `scheme://host[:port]`. The location is either known at
//! startup (`GATEWAY_EXTERNAL_URL`) or discovered in the background from the
//! discovery service. Readers see either "not resolved" or a complete value;
//! a location is published at most once.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayLocationError {
    #[error("Gateway location is not resolved yet")]
    NotResolved,

    #[error("Invalid gateway address: {0}")]
    InvalidAddress(String),

    #[error("Gateway lookup failed: {0}")]
    Lookup(String),
}

/// Scheme and authority of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAddress {
    scheme: String,
    host: String,
}

impl GatewayAddress {
    /// Build an address from its parts. `host` may carry a port.
    pub fn new(scheme: &str, host: &str) -> Result<Self, GatewayLocationError> {
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(GatewayLocationError::InvalidAddress(format!(
                "unsupported scheme '{}'",
                scheme
            )));
        }
        if host.is_empty() {
            return Err(GatewayLocationError::InvalidAddress(
                "host is empty".to_string(),
            ));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
        })
    }

    /// Parse `scheme://host[:port]`. Any path is ignored.
    pub fn parse(url: &str) -> Result<Self, GatewayLocationError> {
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|e| GatewayLocationError::InvalidAddress(e.to_string()))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| GatewayLocationError::InvalidAddress("host is empty".to_string()))?;

        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Self::new(parsed.scheme(), &authority)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host with optional port.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }
}

impl fmt::Display for GatewayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

/// Source of the gateway address when it is not configured statically.
#[async_trait]
pub trait GatewayResolver: Send + Sync {
    async fn resolve(&self) -> Result<GatewayAddress, GatewayLocationError>;
}

/// Shared, write-once gateway location.
#[derive(Debug, Default)]
pub struct GatewayLocation {
    address: OnceCell<GatewayAddress>,
}

impl GatewayLocation {
    /// A location that is known up front.
    pub fn resolved(address: GatewayAddress) -> Self {
        Self {
            address: OnceCell::new_with(Some(address)),
        }
    }

    /// A location that will be filled in by `resolve_until_found`.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Result<GatewayAddress, GatewayLocationError> {
        self.address
            .get()
            .cloned()
            .ok_or(GatewayLocationError::NotResolved)
    }

    pub fn is_resolved(&self) -> bool {
        self.address.initialized()
    }

    /// Publish the address. Returns `false` if one was already published.
    pub fn publish(&self, address: GatewayAddress) -> bool {
        self.address.set(address).is_ok()
    }

    /// Ask `resolver` every `interval` until the gateway is found or
    /// `cancel` fires.
    #[instrument(skip_all, name = "broker.task.gateway_location")]
    pub async fn resolve_until_found(
        self: Arc<Self>,
        resolver: Arc<dyn GatewayResolver>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);

        while !self.is_resolved() {
            tokio::select! {
                _ = ticker.tick() => {
                    match resolver.resolve().await {
                        Ok(address) => {
                            tracing::info!(
                                target: "broker.gateway_location",
                                gateway = %address,
                                "Gateway location resolved"
                            );
                            self.publish(address);
                        }
                        Err(e) => {
                            tracing::warn!(
                                target: "broker.gateway_location",
                                error = %e,
                                "Gateway location lookup failed, retrying"
                            );
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!(
                        target: "broker.gateway_location",
                        "Gateway location task received shutdown signal, exiting"
                    );
                    return;
                }
            }
        }
    }
}

/// Eureka-style discovery lookup of the gateway service.
pub struct DiscoveryGatewayResolver {
    discovery_url: String,
    service_id: String,
    http_client: reqwest::Client,
}

#[derive(Deserialize)]
struct EurekaApplicationEnvelope {
    application: EurekaApplication,
}

#[derive(Deserialize)]
struct EurekaApplication {
    #[serde(default)]
    instance: Vec<EurekaInstance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EurekaInstance {
    host_name: String,
    status: String,
    port: Option<EurekaPort>,
    secure_port: Option<EurekaPort>,
}

#[derive(Deserialize)]
struct EurekaPort {
    #[serde(rename = "$")]
    value: u16,
    #[serde(rename = "@enabled", default)]
    enabled: String,
}

impl EurekaPort {
    fn is_enabled(&self) -> bool {
        self.enabled.eq_ignore_ascii_case("true")
    }
}

impl DiscoveryGatewayResolver {
    pub fn new(discovery_url: String, service_id: String, http_client: reqwest::Client) -> Self {
        Self {
            discovery_url: discovery_url.trim_end_matches('/').to_string(),
            service_id,
            http_client,
        }
    }
}

#[async_trait]
impl GatewayResolver for DiscoveryGatewayResolver {
    #[instrument(skip(self), fields(service_id = %self.service_id))]
    async fn resolve(&self) -> Result<GatewayAddress, GatewayLocationError> {
        let url = format!("{}/eureka/apps/{}", self.discovery_url, self.service_id);

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| GatewayLocationError::Lookup(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayLocationError::Lookup(format!(
                "discovery service returned {}",
                response.status()
            )));
        }

        let envelope: EurekaApplicationEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayLocationError::Lookup(e.to_string()))?;

        let instance = envelope
            .application
            .instance
            .into_iter()
            .find(|i| i.status.eq_ignore_ascii_case("UP"))
            .ok_or_else(|| {
                GatewayLocationError::Lookup("no gateway instance is UP".to_string())
            })?;

        match (&instance.secure_port, &instance.port) {
            (Some(secure), _) if secure.is_enabled() => GatewayAddress::new(
                "https",
                &format!("{}:{}", instance.host_name, secure.value),
            ),
            (_, Some(plain)) => {
                GatewayAddress::new("http", &format!("{}:{}", instance.host_name, plain.value))
            }
            _ => Err(GatewayLocationError::Lookup(
                "gateway instance has no port".to_string(),
            )),
        }
    }
}
