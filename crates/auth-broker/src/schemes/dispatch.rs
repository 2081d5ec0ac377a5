//! Scheme dispatch.
//!
//! The dispatcher knows what this deployment can produce. It rejects
//! schemes it cannot serve at registration, and builds the per-call command
//! for the ones it can.

use crate::auth::source::{AuthSource, Parsed, PAT_COOKIE_NAME, PRIVATE_TOKEN_HEADER};
use crate::errors::BrokerError;
use crate::schemes::command::{AuthenticationCommand, Mutation};
use crate::schemes::{
    AuthenticationScheme, CertificateHeader, SchemeConfigError, SchemeHandler, OIDC_TOKEN_HEADER,
    SAF_TOKEN_HEADER,
};
use crate::services::broker::{CredentialBroker, Resolved};
use axum::http::header::AUTHORIZATION;
use base64::{engine::general_purpose::STANDARD, Engine};
use common::secret::ExposeSecret;
use std::sync::Arc;
use tracing::instrument;

pub struct SchemeDispatcher {
    broker: Arc<CredentialBroker>,
}

impl SchemeDispatcher {
    pub fn new(broker: Arc<CredentialBroker>) -> Self {
        Self { broker }
    }

    /// Check that `handler` can be served for `service_id`.
    pub fn supports(&self, service_id: &str, handler: &SchemeHandler) -> Result<(), SchemeConfigError> {
        let unsupported = |reason: &str| SchemeConfigError::Unsupported {
            scheme: handler.scheme(),
            reason: reason.to_string(),
        };
        let sources = self.broker.sources();

        match handler {
            SchemeHandler::Bypass | SchemeHandler::ZoweJwt => Ok(()),
            SchemeHandler::HttpBasicPassTicket { .. } if !self.broker.issues_pass_tickets() => {
                Err(unsupported("no security service is configured"))
            }
            SchemeHandler::HttpBasicPassTicket { .. } => Ok(()),
            SchemeHandler::SafIdt { .. } if !self.broker.issues_saf_idt() => {
                Err(unsupported("no security service is configured"))
            }
            SchemeHandler::SafIdt { .. } => Ok(()),
            SchemeHandler::Zosmf if !self.broker.serves_zosmf(service_id) => Err(unsupported(
                &format!("no z/OSMF instance is configured for '{}'", service_id),
            )),
            SchemeHandler::Zosmf => Ok(()),
            SchemeHandler::X509 { .. } if !sources.x509_enabled() => {
                Err(unsupported("client certificate authentication is disabled"))
            }
            SchemeHandler::X509 { .. } => Ok(()),
            SchemeHandler::Oidc if !sources.oidc_enabled() => {
                Err(unsupported("OIDC authentication is disabled"))
            }
            SchemeHandler::Oidc => Ok(()),
        }
    }

    /// Build the command for one call to `service_id`.
    ///
    /// With no credential the command is empty and the call goes through
    /// anonymously.
    #[instrument(skip(self, handler, source), fields(scheme = %handler.scheme()))]
    pub async fn create_command(
        &self,
        service_id: &str,
        handler: &SchemeHandler,
        source: Option<&AuthSource>,
    ) -> Result<AuthenticationCommand, BrokerError> {
        let scheme = handler.scheme();
        let Some(source) = source else {
            return Ok(AuthenticationCommand::empty(scheme));
        };
        if scheme == AuthenticationScheme::Bypass {
            return Ok(AuthenticationCommand::empty(scheme));
        }

        let resolved = self.broker.resolve(source).await?;
        let mutations = match (handler, resolved) {
            (SchemeHandler::Bypass, _) => Vec::new(),

            (SchemeHandler::Oidc | SchemeHandler::ZoweJwt, Resolved::OidcPassthrough(token)) => {
                vec![Mutation::set_header(OIDC_TOKEN_HEADER, token.expose_secret())?]
            }
            (_, Resolved::OidcPassthrough(_)) => {
                return Err(BrokerError::NoMainframeIdentity {
                    valid_token_otherwise: true,
                })
            }

            (SchemeHandler::ZoweJwt, Resolved::Identity(parsed)) => {
                let jwt = self.broker.issue_zowe_jwt(source, &parsed)?;
                vec![
                    Mutation::SetCookie(
                        self.broker.sources().auth_cookie_name().to_string(),
                        jwt.expose_secret().to_string(),
                    ),
                    Mutation::RemoveHeader(AUTHORIZATION),
                ]
            }

            (SchemeHandler::HttpBasicPassTicket { application_id }, Resolved::Identity(parsed)) => {
                let ticket = self
                    .broker
                    .issue_pass_ticket(parsed.user_id(), application_id)
                    .await?;
                let credentials = STANDARD.encode(format!(
                    "{}:{}",
                    parsed.user_id(),
                    ticket.expose_secret()
                ));
                vec![
                    Mutation::set_header(AUTHORIZATION.as_str(), &format!("Basic {}", credentials))?,
                    Mutation::RemoveCookie(self.broker.sources().auth_cookie_name().to_string()),
                    Mutation::RemoveCookie(PAT_COOKIE_NAME.to_string()),
                    Mutation::remove_header(PRIVATE_TOKEN_HEADER)?,
                ]
            }

            (SchemeHandler::SafIdt { application_id }, Resolved::Identity(parsed)) => {
                let token = self
                    .broker
                    .issue_saf_id_token(parsed.user_id(), application_id)
                    .await?;
                vec![
                    Mutation::set_header(SAF_TOKEN_HEADER, token.expose_secret())?,
                    Mutation::RemoveCookie(self.broker.sources().auth_cookie_name().to_string()),
                ]
            }

            (SchemeHandler::Zosmf, Resolved::Identity(parsed)) => {
                let token = self
                    .broker
                    .issue_zosmf_token(service_id, source, &parsed)
                    .await?;
                vec![
                    Mutation::RemoveCookie(self.broker.sources().auth_cookie_name().to_string()),
                    Mutation::SetCookie(token.cookie_name.to_string(), token.token),
                    Mutation::RemoveHeader(AUTHORIZATION),
                ]
            }

            (SchemeHandler::X509 { headers }, Resolved::Identity(parsed)) => {
                self.certificate_mutations(headers, &parsed)?
            }

            (SchemeHandler::Oidc, Resolved::Identity(_)) => match source {
                AuthSource::Oidc(token) => {
                    vec![Mutation::set_header(OIDC_TOKEN_HEADER, token.expose_secret())?]
                }
                _ => return Err(BrokerError::AuthenticationRequired),
            },
        };

        Ok(AuthenticationCommand::new(scheme, mutations))
    }

    fn certificate_mutations(
        &self,
        headers: &[CertificateHeader],
        parsed: &Parsed,
    ) -> Result<Vec<Mutation>, BrokerError> {
        let certificate = parsed
            .certificate()
            .ok_or(BrokerError::AuthenticationRequired)?;

        let mut mutations = Vec::with_capacity(headers.len() + 1);
        for header in headers {
            let value = match header {
                CertificateHeader::Public => Some(certificate.encoded.as_str()),
                CertificateHeader::DistinguishedName => {
                    Some(certificate.distinguished_name.as_str())
                }
                CertificateHeader::CommonName => certificate.common_name.as_deref(),
            };
            if let Some(value) = value {
                mutations.push(Mutation::set_header(header.header_name(), value)?);
            }
        }
        mutations.push(Mutation::remove_header(
            self.broker.sources().client_cert_header(),
        )?);
        Ok(mutations)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::claims::Claims;
    use crate::auth::identity::mock::MockIdentityMapper;
    use crate::auth::issuer::{test_issuer, JwtIssuer};
    use crate::auth::jwks::JwksClient;
    use crate::auth::jwt::JwtValidator;
    use crate::auth::oidc::mock::MockOidcProvider;
    use crate::auth::source::{AuthSourceService, JwtOrigin};
    use crate::auth::x509::TerminatorVerified;
    use crate::errors::SafReason;
    use crate::services::access_token::AccessTokenProvider;
    use crate::services::cache::mock::InMemoryCacheStore;
    use crate::services::passticket::mock::{MockPassTicketGenerator, MockSafIdtProvider};
    use crate::services::zosmf::mock::MockZosmfAuthenticator;
    use axum::http::header::COOKIE;
    use axum::http::{HeaderMap, HeaderValue, Request};
    use common::secret::SecretString;

    struct Fixture {
        issuer: Arc<JwtIssuer>,
        dispatcher: SchemeDispatcher,
    }

    fn sources(issuer: &Arc<JwtIssuer>) -> AuthSourceService {
        let jwks = JwksClient::new("http://127.0.0.1:9/jwks".to_string(), reqwest::Client::new())
            .with_pinned_key(issuer.public_jwk());
        AuthSourceService::new(
            Arc::new(JwtValidator::new(Arc::new(jwks), 300, "APIML")),
            issuer.clone(),
            Arc::new(AccessTokenProvider::new(
                Arc::new(InMemoryCacheStore::new()),
                issuer.clone(),
                90,
            )),
            "apimlAuthenticationToken".to_string(),
            "Client-Cert".to_string(),
        )
    }

    fn full() -> Fixture {
        let issuer = Arc::new(test_issuer("APIML"));
        let sources = sources(&issuer)
            .with_x509(Arc::new(TerminatorVerified))
            .with_oidc(Arc::new(MockOidcProvider::active("bob")), String::new())
            .with_identity_mapper(Arc::new(
                MockIdentityMapper::new().with_certificate("client-one", "USER1"),
            ));
        let broker = CredentialBroker::new(Arc::new(sources), "IZUDFLT".to_string())
            .with_pass_tickets(Arc::new(MockPassTicketGenerator::accepting()))
            .with_saf_idt(Arc::new(MockSafIdtProvider::accepting()))
            .with_zosmf(Arc::new(MockZosmfAuthenticator::jwt("ibmzosmf")));
        Fixture {
            issuer,
            dispatcher: SchemeDispatcher::new(Arc::new(broker)),
        }
    }

    fn bare() -> SchemeDispatcher {
        let issuer = Arc::new(test_issuer("APIML"));
        let broker = CredentialBroker::new(Arc::new(sources(&issuer)), "IZUDFLT".to_string());
        SchemeDispatcher::new(Arc::new(broker))
    }

    impl Fixture {
        fn cookie_source(&self, user: &str) -> (AuthSource, String) {
            let now = chrono::Utc::now().timestamp();
            let token = self
                .issuer
                .sign(&Claims {
                    sub: user.to_string(),
                    exp: now + 600,
                    iat: now,
                    iss: "APIML".to_string(),
                    jti: None,
                    token_type: None,
                    scopes: vec![],
                })
                .unwrap();
            (
                AuthSource::Jwt {
                    token: SecretString::from(token.clone()),
                    origin: JwtOrigin::Cookie,
                },
                token,
            )
        }
    }

    fn passticket(appl: &str) -> SchemeHandler {
        SchemeHandler::HttpBasicPassTicket {
            application_id: appl.to_string(),
        }
    }

    fn outbound(cookie_token: &str) -> Request<()> {
        Request::builder()
            .uri("/api/v1/data")
            .header(COOKIE, format!("apimlAuthenticationToken={}", cookie_token))
            .body(())
            .unwrap()
    }

    #[test]
    fn test_bare_deployment_rejects_credential_schemes() {
        let dispatcher = bare();

        for handler in [
            passticket("APPL1"),
            SchemeHandler::SafIdt {
                application_id: "APPL1".to_string(),
            },
            SchemeHandler::Zosmf,
            SchemeHandler::X509 { headers: vec![] },
            SchemeHandler::Oidc,
        ] {
            assert!(matches!(
                dispatcher.supports("svc", &handler),
                Err(SchemeConfigError::Unsupported { .. })
            ));
        }
        assert_eq!(dispatcher.supports("svc", &SchemeHandler::Bypass), Ok(()));
        assert_eq!(dispatcher.supports("svc", &SchemeHandler::ZoweJwt), Ok(()));
    }

    #[test]
    fn test_zosmf_supported_only_for_configured_instance() {
        let fixture = full();

        assert_eq!(
            fixture.dispatcher.supports("ibmzosmf", &SchemeHandler::Zosmf),
            Ok(())
        );
        assert!(fixture
            .dispatcher
            .supports("other", &SchemeHandler::Zosmf)
            .is_err());
    }

    #[tokio::test]
    async fn test_passticket_command_sets_basic_auth_with_fresh_ticket() {
        let fixture = full();
        let (source, token) = fixture.cookie_source("USER1");

        let first = fixture
            .dispatcher
            .create_command("svc", &passticket("APPL1"), Some(&source))
            .await
            .unwrap();
        let second = fixture
            .dispatcher
            .create_command("svc", &passticket("APPL1"), Some(&source))
            .await
            .unwrap();
        let mut req = outbound(&token);
        first.apply(&mut req);

        assert_eq!(
            req.headers().get(AUTHORIZATION).unwrap(),
            &format!("Basic {}", STANDARD.encode("USER1:TICKET-1"))
        );
        assert!(req.headers().get(COOKIE).is_none());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_passticket_failure_propagates() {
        let issuer = Arc::new(test_issuer("APIML"));
        let broker = CredentialBroker::new(Arc::new(sources(&issuer)), "IZUDFLT".to_string())
            .with_pass_tickets(Arc::new(MockPassTicketGenerator::failing(
                SafReason::UnknownApplicationId,
            )));
        let fixture = Fixture {
            issuer,
            dispatcher: SchemeDispatcher::new(Arc::new(broker)),
        };
        let (source, _) = fixture.cookie_source("USER1");

        let err = fixture
            .dispatcher
            .create_command("svc", &passticket("NOAPP"), Some(&source))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_absent_credential_gives_empty_command() {
        let fixture = full();

        let command = fixture
            .dispatcher
            .create_command("svc", &passticket("APPL1"), None)
            .await
            .unwrap();

        assert!(command.is_empty());
    }

    #[tokio::test]
    async fn test_zowe_jwt_command_keeps_jwt_source_token() {
        let fixture = full();
        let (source, token) = fixture.cookie_source("USER1");
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic xyz"));

        fixture
            .dispatcher
            .create_command("svc", &SchemeHandler::ZoweJwt, Some(&source))
            .await
            .unwrap()
            .apply_headers(&mut headers);

        assert_eq!(
            headers.get(COOKIE).unwrap().to_str().unwrap(),
            format!("apimlAuthenticationToken={}", token)
        );
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_saf_idt_command() {
        let fixture = full();
        let (source, token) = fixture.cookie_source("USER1");
        let mut req = outbound(&token);

        fixture
            .dispatcher
            .create_command(
                "svc",
                &SchemeHandler::SafIdt {
                    application_id: "APPL1".to_string(),
                },
                Some(&source),
            )
            .await
            .unwrap()
            .apply(&mut req);

        assert_eq!(
            req.headers().get(SAF_TOKEN_HEADER).unwrap(),
            "IDT.USER1.TICKET-1"
        );
        assert!(req.headers().get(COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_zosmf_command_sets_native_cookie() {
        let fixture = full();
        let (source, token) = fixture.cookie_source("USER1");
        let mut req = outbound(&token);

        fixture
            .dispatcher
            .create_command("ibmzosmf", &SchemeHandler::Zosmf, Some(&source))
            .await
            .unwrap()
            .apply(&mut req);

        assert_eq!(
            req.headers().get(COOKIE).unwrap(),
            "jwtToken=ZOSMF.ibmzosmf.USER1.1"
        );
    }

    #[tokio::test]
    async fn test_oidc_passthrough_for_unmapped_token() {
        let fixture = full();
        let source = AuthSource::Oidc(SecretString::from("opaque-token"));
        let mut headers = HeaderMap::new();

        fixture
            .dispatcher
            .create_command("svc", &SchemeHandler::Oidc, Some(&source))
            .await
            .unwrap()
            .apply_headers(&mut headers);

        assert_eq!(headers.get(OIDC_TOKEN_HEADER).unwrap(), "opaque-token");
    }

    #[tokio::test]
    async fn test_unmapped_oidc_cannot_get_pass_ticket() {
        let fixture = full();
        let source = AuthSource::Oidc(SecretString::from("opaque-token"));

        let result = fixture
            .dispatcher
            .create_command("svc", &passticket("APPL1"), Some(&source))
            .await;

        assert!(matches!(
            result,
            Err(BrokerError::NoMainframeIdentity {
                valid_token_otherwise: true
            })
        ));
    }

    #[tokio::test]
    async fn test_x509_requires_certificate_source() {
        let fixture = full();
        let (source, _) = fixture.cookie_source("USER1");

        let result = fixture
            .dispatcher
            .create_command(
                "svc",
                &SchemeHandler::X509 {
                    headers: CertificateHeader::ALL.to_vec(),
                },
                Some(&source),
            )
            .await;

        assert!(matches!(result, Err(BrokerError::AuthenticationRequired)));
    }

    #[tokio::test]
    async fn test_x509_command_forwards_certificate_fields() {
        let fixture = full();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "client-one");
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let encoded = STANDARD.encode(params.self_signed(&key_pair).unwrap().der());
        let source = AuthSource::X509(encoded.clone());
        let mut headers = HeaderMap::new();
        headers.insert("client-cert", HeaderValue::from_str(&encoded).unwrap());

        fixture
            .dispatcher
            .create_command(
                "svc",
                &SchemeHandler::X509 {
                    headers: vec![CertificateHeader::CommonName, CertificateHeader::Public],
                },
                Some(&source),
            )
            .await
            .unwrap()
            .apply_headers(&mut headers);

        assert_eq!(headers.get("X-Certificate-CommonName").unwrap(), "client-one");
        assert_eq!(
            headers.get("X-Certificate-Public").unwrap().to_str().unwrap(),
            encoded
        );
        assert!(headers.get("X-Certificate-DistinguishedName").is_none());
        assert!(headers.get("client-cert").is_none());
    }
}
