//! Mapping of distributed identities to mainframe user ids.
//!
//! Certificates and OIDC identities are mapped by the ZSS-style identity
//! mapper. `Ok(None)` means the mapper answered but knows no user; errors
//! are reserved for the mapper being unreachable.

use crate::auth::x509::ClientCertificate;
use crate::errors::BrokerError;
use crate::services::http::send_with_retry;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[async_trait]
pub trait IdentityMapper: Send + Sync {
    async fn map_certificate(
        &self,
        certificate: &ClientCertificate,
    ) -> Result<Option<String>, BrokerError>;

    async fn map_distributed_id(
        &self,
        distributed_id: &str,
        registry: &str,
    ) -> Result<Option<String>, BrokerError>;
}

#[derive(Deserialize)]
struct MapperResponse {
    #[serde(default)]
    userid: String,
    #[serde(default)]
    rc: i32,
}

impl MapperResponse {
    fn user_id(self) -> Option<String> {
        let user_id = self.userid.trim();
        if self.rc != 0 || user_id.is_empty() {
            None
        } else {
            Some(user_id.to_string())
        }
    }
}

#[derive(Serialize)]
struct DistributedIdRequest<'a> {
    dn: &'a str,
    registry: &'a str,
}

/// HTTP client for the identity mapper.
pub struct ZssIdentityMapper {
    http_client: Client,
    base_url: String,
}

impl ZssIdentityMapper {
    pub fn new(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Option<String>, BrokerError> {
        let response = send_with_retry("mapper", request).await.map_err(|e| {
            tracing::warn!(target: "broker.auth.identity", error = %e, "Identity mapper unreachable");
            BrokerError::UpstreamUnavailable("identity mapper".to_string())
        })?;

        let status = response.status();
        if status.is_server_error() {
            tracing::warn!(target: "broker.auth.identity", status = %status, "Identity mapper failed");
            return Err(BrokerError::UpstreamUnavailable("identity mapper".to_string()));
        }
        if !status.is_success() {
            tracing::debug!(target: "broker.auth.identity", status = %status, "Identity mapper found no user");
            return Ok(None);
        }

        let body: MapperResponse = response.json().await.map_err(|e| {
            tracing::warn!(target: "broker.auth.identity", error = %e, "Invalid identity mapper response");
            BrokerError::UpstreamUnavailable("identity mapper".to_string())
        })?;
        Ok(body.user_id())
    }
}

#[async_trait]
impl IdentityMapper for ZssIdentityMapper {
    #[instrument(skip_all)]
    async fn map_certificate(
        &self,
        certificate: &ClientCertificate,
    ) -> Result<Option<String>, BrokerError> {
        let request = self
            .http_client
            .post(format!("{}/certificate/x509/map", self.base_url))
            .header("content-type", "application/octet-stream")
            .body(certificate.der().to_vec());
        self.send(request).await
    }

    #[instrument(skip_all)]
    async fn map_distributed_id(
        &self,
        distributed_id: &str,
        registry: &str,
    ) -> Result<Option<String>, BrokerError> {
        let request = self
            .http_client
            .post(format!("{}/certificate/dn", self.base_url))
            .json(&DistributedIdRequest {
                dn: distributed_id,
                registry,
            });
        self.send(request).await
    }
}

pub mod mock {
    use super::*;
    use std::collections::HashMap;

    /// Maps certificate common names and distributed ids from fixed tables.
    #[derive(Default)]
    pub struct MockIdentityMapper {
        by_common_name: HashMap<String, String>,
        by_distributed_id: HashMap<String, String>,
    }

    impl MockIdentityMapper {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_certificate(mut self, common_name: &str, user_id: &str) -> Self {
            self.by_common_name
                .insert(common_name.to_string(), user_id.to_string());
            self
        }

        pub fn with_distributed_id(mut self, distributed_id: &str, user_id: &str) -> Self {
            self.by_distributed_id
                .insert(distributed_id.to_string(), user_id.to_string());
            self
        }
    }

    #[async_trait]
    impl IdentityMapper for MockIdentityMapper {
        async fn map_certificate(
            &self,
            certificate: &ClientCertificate,
        ) -> Result<Option<String>, BrokerError> {
            Ok(certificate
                .common_name()
                .and_then(|cn| self.by_common_name.get(cn))
                .cloned())
        }

        async fn map_distributed_id(
            &self,
            distributed_id: &str,
            _registry: &str,
        ) -> Result<Option<String>, BrokerError> {
            Ok(self.by_distributed_id.get(distributed_id).cloned())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn certificate() -> ClientCertificate {
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "client-one");
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        ClientCertificate::from_der(cert.der().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_map_certificate_posts_der() {
        let server = MockServer::start().await;
        let cert = certificate();
        Mock::given(method("POST"))
            .and(path("/certificate/x509/map"))
            .and(header("content-type", "application/octet-stream"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"userid": "USER1", "rc": 0})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let mapper = ZssIdentityMapper::new(reqwest::Client::new(), server.uri());

        let user = mapper.map_certificate(&cert).await.unwrap();

        assert_eq!(user.as_deref(), Some("USER1"));
    }

    #[tokio::test]
    async fn test_map_distributed_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/certificate/dn"))
            .and(body_json(serde_json::json!({"dn": "alice@example.com", "registry": "ldap://corp"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"userid": "ALICE", "rc": 0})),
            )
            .mount(&server)
            .await;
        let mapper = ZssIdentityMapper::new(reqwest::Client::new(), server.uri());

        let user = mapper
            .map_distributed_id("alice@example.com", "ldap://corp")
            .await
            .unwrap();

        assert_eq!(user.as_deref(), Some("ALICE"));
    }

    #[tokio::test]
    async fn test_unmapped_answers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/certificate/dn"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"userid": "", "rc": 8})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/certificate/x509/map"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let mapper = ZssIdentityMapper::new(reqwest::Client::new(), server.uri());

        assert_eq!(mapper.map_distributed_id("bob", "").await.unwrap(), None);
        assert_eq!(mapper.map_certificate(&certificate()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mapper_outage_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/certificate/dn"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let mapper = ZssIdentityMapper::new(reqwest::Client::new(), server.uri());

        let result = mapper.map_distributed_id("bob", "").await;

        assert!(matches!(result, Err(BrokerError::UpstreamUnavailable(_))));
    }
}
