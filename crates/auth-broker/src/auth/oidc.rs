//! OIDC token introspection (RFC 7662).

use crate::errors::BrokerError;
use crate::services::http::send_with_retry;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

/// Introspection answer. Only the fields the broker reads are kept.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct TokenIntrospection {
    pub active: bool,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl std::fmt::Debug for TokenIntrospection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIntrospection")
            .field("active", &self.active)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("exp", &self.exp)
            .finish()
    }
}

#[async_trait]
pub trait OidcProvider: Send + Sync {
    async fn introspect(&self, token: &SecretString) -> Result<TokenIntrospection, BrokerError>;
}

/// Introspects tokens at the provider's endpoint with client credentials.
pub struct IntrospectionClient {
    http_client: Client,
    introspection_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl IntrospectionClient {
    pub fn new(
        http_client: Client,
        introspection_url: String,
        client_id: String,
        client_secret: SecretString,
    ) -> Self {
        Self {
            http_client,
            introspection_url,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl OidcProvider for IntrospectionClient {
    #[instrument(skip_all)]
    async fn introspect(&self, token: &SecretString) -> Result<TokenIntrospection, BrokerError> {
        let request = self
            .http_client
            .post(&self.introspection_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[
                ("token", token.expose_secret()),
                ("token_type_hint", "access_token"),
            ]);

        let response = send_with_retry("oidc", request).await.map_err(|e| {
            tracing::warn!(target: "broker.auth.oidc", error = %e, "OIDC provider unreachable");
            BrokerError::UpstreamUnavailable("OIDC provider".to_string())
        })?;

        if !response.status().is_success() {
            tracing::warn!(
                target: "broker.auth.oidc",
                status = %response.status(),
                "OIDC introspection rejected"
            );
            return Err(BrokerError::UpstreamUnavailable("OIDC provider".to_string()));
        }

        response.json().await.map_err(|e| {
            tracing::warn!(target: "broker.auth.oidc", error = %e, "Invalid introspection response");
            BrokerError::UpstreamUnavailable("OIDC provider".to_string())
        })
    }
}

pub mod mock {
    use super::*;

    /// Reports every token as active for `sub`, or every token as inactive.
    pub struct MockOidcProvider {
        sub: Option<String>,
    }

    impl MockOidcProvider {
        pub fn active(sub: &str) -> Self {
            Self {
                sub: Some(sub.to_string()),
            }
        }

        pub fn inactive() -> Self {
            Self { sub: None }
        }
    }

    #[async_trait]
    impl OidcProvider for MockOidcProvider {
        async fn introspect(
            &self,
            _token: &SecretString,
        ) -> Result<TokenIntrospection, BrokerError> {
            Ok(TokenIntrospection {
                active: self.sub.is_some(),
                sub: self.sub.clone(),
                exp: self
                    .sub
                    .as_ref()
                    .map(|_| chrono::Utc::now().timestamp() + 3600),
            })
        }
    }
}
