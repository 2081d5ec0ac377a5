//! z/OSMF token exchange.
//!
//! A caller's identity is exchanged for a z/OSMF-native token by
//! authenticating to the target instance with a PassTicket. Instances that
//! publish a JWT builder hand out `jwtToken`; older ones only `LtpaToken2`.
//! The capability is probed once per instance and forgotten on any failure.

use crate::errors::BrokerError;
use crate::services::http::send_with_retry;
use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

pub const JWT_COOKIE_NAME: &str = "jwtToken";
pub const LTPA_COOKIE_NAME: &str = "LtpaToken2";

const CSRF_HEADER: &str = "X-CSRF-ZOSMF-HEADER";
const AUTHENTICATE_PATH: &str = "/zosmf/services/authenticate";
const JWT_BUILDER_PATH: &str = "/jwt/ibm/api/zOSMFBuilder/jwk";

/// Token kinds a z/OSMF instance can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZosmfCapability {
    Jwt,
    LtpaOnly,
}

impl ZosmfCapability {
    fn cookie_name(self) -> &'static str {
        match self {
            ZosmfCapability::Jwt => JWT_COOKIE_NAME,
            ZosmfCapability::LtpaOnly => LTPA_COOKIE_NAME,
        }
    }
}

/// A token obtained from z/OSMF and the cookie it travels in.
#[derive(Clone, PartialEq, Eq)]
pub struct ZosmfToken {
    pub token: String,
    pub cookie_name: &'static str,
}

impl std::fmt::Debug for ZosmfToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZosmfToken")
            .field("token", &"[REDACTED]")
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ZosmfError {
    #[error("No z/OSMF instance is configured for service '{0}'")]
    UnknownInstance(String),

    #[error("z/OSMF unreachable: {0}")]
    Unreachable(String),

    #[error("z/OSMF answered status {0}")]
    Rejected(u16),

    #[error("z/OSMF response carried no token cookie")]
    NoToken,
}

/// z/OSMF refusing the PassTicket is a credential failure; anything else
/// means no token could be obtained from the instance.
impl From<ZosmfError> for BrokerError {
    fn from(err: ZosmfError) -> Self {
        match err {
            ZosmfError::Rejected(status @ (401 | 403)) => {
                tracing::debug!(target: "broker.services.zosmf", status, "z/OSMF rejected the credentials");
                BrokerError::InvalidCredentials
            }
            other => BrokerError::ZosmfToken(other.to_string()),
        }
    }
}

/// Exchanges a PassTicket for a z/OSMF token at a given instance.
#[async_trait]
pub trait ZosmfAuthenticator: Send + Sync {
    /// Whether an instance is configured for `service_id`.
    fn serves(&self, service_id: &str) -> bool;

    async fn authenticate(
        &self,
        service_id: &str,
        user_id: &str,
        pass_ticket: &str,
    ) -> Result<ZosmfToken, ZosmfError>;
}

/// HTTP client for configured z/OSMF instances.
pub struct ZosmfClient {
    http_client: Client,
    instances: HashMap<String, String>,
    capabilities: RwLock<HashMap<String, ZosmfCapability>>,
}

impl ZosmfClient {
    pub fn new(http_client: Client) -> Self {
        Self {
            http_client,
            instances: HashMap::new(),
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    /// Register the instance serving `service_id`. Service ids are matched
    /// case-insensitively.
    pub fn with_instance(mut self, service_id: &str, base_url: &str) -> Self {
        self.instances.insert(
            service_id.to_lowercase(),
            base_url.trim_end_matches('/').to_string(),
        );
        self
    }

    fn base_url(&self, service_id: &str) -> Result<&str, ZosmfError> {
        self.instances
            .get(&service_id.to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| ZosmfError::UnknownInstance(service_id.to_string()))
    }

    /// Cached capability of the instance, probing it on first use.
    pub async fn capability(&self, service_id: &str) -> Result<ZosmfCapability, ZosmfError> {
        let key = service_id.to_lowercase();
        if let Some(capability) = self.capabilities.read().await.get(&key) {
            return Ok(*capability);
        }

        let capability = self.probe(service_id).await?;
        self.capabilities.write().await.insert(key, capability);
        Ok(capability)
    }

    async fn forget_capability(&self, service_id: &str) {
        self.capabilities
            .write()
            .await
            .remove(&service_id.to_lowercase());
    }

    #[instrument(skip(self))]
    async fn probe(&self, service_id: &str) -> Result<ZosmfCapability, ZosmfError> {
        let url = format!("{}{}", self.base_url(service_id)?, JWT_BUILDER_PATH);
        let response = send_with_retry("zosmf", self.http_client.get(url))
            .await
            .map_err(|e| ZosmfError::Unreachable(e.to_string()))?;

        let capability = match response.status() {
            StatusCode::NOT_FOUND => ZosmfCapability::LtpaOnly,
            status if status.is_success() => ZosmfCapability::Jwt,
            status => return Err(ZosmfError::Rejected(status.as_u16())),
        };
        tracing::info!(
            target: "broker.services.zosmf",
            service_id = %service_id,
            capability = ?capability,
            "Probed z/OSMF token capability"
        );
        Ok(capability)
    }

    async fn exchange(
        &self,
        service_id: &str,
        user_id: &str,
        pass_ticket: &str,
    ) -> Result<ZosmfToken, ZosmfError> {
        let capability = self.capability(service_id).await?;
        let url = format!("{}{}", self.base_url(service_id)?, AUTHENTICATE_PATH);

        let request = self
            .http_client
            .post(url)
            .header(CSRF_HEADER, "")
            .basic_auth(user_id, Some(pass_ticket));
        let response = send_with_retry("zosmf", request)
            .await
            .map_err(|e| ZosmfError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ZosmfError::Rejected(response.status().as_u16()));
        }

        let cookies: Vec<(String, String)> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        let preferred = capability.cookie_name();
        let token = cookies
            .iter()
            .find(|(name, _)| name == preferred)
            .or_else(|| {
                cookies
                    .iter()
                    .find(|(name, _)| name == JWT_COOKIE_NAME || name == LTPA_COOKIE_NAME)
            })
            .ok_or(ZosmfError::NoToken)?;

        let cookie_name = if token.0 == JWT_COOKIE_NAME {
            JWT_COOKIE_NAME
        } else {
            LTPA_COOKIE_NAME
        };
        Ok(ZosmfToken {
            token: token.1.clone(),
            cookie_name,
        })
    }
}

#[async_trait]
impl ZosmfAuthenticator for ZosmfClient {
    fn serves(&self, service_id: &str) -> bool {
        self.base_url(service_id).is_ok()
    }

    #[instrument(skip(self, user_id, pass_ticket))]
    async fn authenticate(
        &self,
        service_id: &str,
        user_id: &str,
        pass_ticket: &str,
    ) -> Result<ZosmfToken, ZosmfError> {
        match self.exchange(service_id, user_id, pass_ticket).await {
            Ok(token) => Ok(token),
            Err(e) => {
                tracing::warn!(
                    target: "broker.services.zosmf",
                    service_id = %service_id,
                    error = %e,
                    "z/OSMF token exchange failed"
                );
                self.forget_capability(service_id).await;
                Err(e)
            }
        }
    }
}

/// `name=value` of a `Set-Cookie` header; attributes are ignored.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

/// Test double for z/OSMF.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers `ZOSMF.<service>.<user>.<n>` in the configured cookie.
    pub struct MockZosmfAuthenticator {
        service_id: String,
        cookie_name: &'static str,
        failure: Option<ZosmfError>,
        call_count: AtomicUsize,
    }

    impl MockZosmfAuthenticator {
        pub fn jwt(service_id: &str) -> Self {
            Self::new(service_id, JWT_COOKIE_NAME, None)
        }

        pub fn ltpa(service_id: &str) -> Self {
            Self::new(service_id, LTPA_COOKIE_NAME, None)
        }

        pub fn failing(service_id: &str, err: ZosmfError) -> Self {
            Self::new(service_id, JWT_COOKIE_NAME, Some(err))
        }

        fn new(service_id: &str, cookie_name: &'static str, failure: Option<ZosmfError>) -> Self {
            Self {
                service_id: service_id.to_lowercase(),
                cookie_name,
                failure,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ZosmfAuthenticator for MockZosmfAuthenticator {
        fn serves(&self, service_id: &str) -> bool {
            self.service_id == service_id.to_lowercase()
        }

        async fn authenticate(
            &self,
            service_id: &str,
            user_id: &str,
            _pass_ticket: &str,
        ) -> Result<ZosmfToken, ZosmfError> {
            let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.serves(service_id) {
                return Err(ZosmfError::UnknownInstance(service_id.to_string()));
            }
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            Ok(ZosmfToken {
                token: format!("ZOSMF.{}.{}.{}", service_id, user_id, n),
                cookie_name: self.cookie_name,
            })
        }
    }
}
