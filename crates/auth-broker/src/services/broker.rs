//! Credential broker.
//!
//! Turns a validated caller identity into the credential a downstream
//! service expects: a PassTicket, a SAF Identity Token, a z/OSMF token or a
//! Zowe JWT. `resolve` is the single place where an active but unmapped
//! OIDC token is accepted instead of failing.

use crate::auth::source::{AuthSource, AuthSourceService, Parsed};
use crate::errors::{BrokerError, SafReason};
use crate::observability::record_credential_issued;
use crate::services::passticket::{PassTicketGenerator, SafIdtProvider};
use crate::services::zosmf::{ZosmfAuthenticator, ZosmfToken, JWT_COOKIE_NAME};
use common::secret::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::instrument;

/// Outcome of resolving a request's credential.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The credential maps to a mainframe user.
    Identity(Parsed),
    /// An active OIDC token with no mainframe user, forwarded as-is.
    OidcPassthrough(SecretString),
}

pub struct CredentialBroker {
    sources: Arc<AuthSourceService>,
    pass_tickets: Option<Arc<dyn PassTicketGenerator>>,
    saf_idt: Option<Arc<dyn SafIdtProvider>>,
    zosmf: Option<Arc<dyn ZosmfAuthenticator>>,
    zosmf_applid: String,
}

impl CredentialBroker {
    pub fn new(sources: Arc<AuthSourceService>, zosmf_applid: String) -> Self {
        Self {
            sources,
            pass_tickets: None,
            saf_idt: None,
            zosmf: None,
            zosmf_applid,
        }
    }

    pub fn with_pass_tickets(mut self, generator: Arc<dyn PassTicketGenerator>) -> Self {
        self.pass_tickets = Some(generator);
        self
    }

    pub fn with_saf_idt(mut self, provider: Arc<dyn SafIdtProvider>) -> Self {
        self.saf_idt = Some(provider);
        self
    }

    pub fn with_zosmf(mut self, authenticator: Arc<dyn ZosmfAuthenticator>) -> Self {
        self.zosmf = Some(authenticator);
        self
    }

    pub fn sources(&self) -> &AuthSourceService {
        &self.sources
    }

    pub fn issues_pass_tickets(&self) -> bool {
        self.pass_tickets.is_some()
    }

    pub fn issues_saf_idt(&self) -> bool {
        self.pass_tickets.is_some() && self.saf_idt.is_some()
    }

    pub fn serves_zosmf(&self, service_id: &str) -> bool {
        self.pass_tickets.is_some()
            && self
                .zosmf
                .as_ref()
                .is_some_and(|zosmf| zosmf.serves(service_id))
    }

    /// Validate a source, letting active unmapped OIDC tokens through.
    #[instrument(skip_all)]
    pub async fn resolve(&self, source: &AuthSource) -> Result<Resolved, BrokerError> {
        match (self.sources.validate(source).await, source) {
            (Ok(parsed), _) => Ok(Resolved::Identity(parsed)),
            (
                Err(BrokerError::NoMainframeIdentity {
                    valid_token_otherwise: true,
                }),
                AuthSource::Oidc(token),
            ) => {
                tracing::debug!(target: "broker.services.broker", "Unmapped OIDC token passed through");
                record_credential_issued("oidc", "success");
                Ok(Resolved::OidcPassthrough(token.clone()))
            }
            (Err(e), _) => Err(e),
        }
    }

    /// Generate a PassTicket for `user_id` at `application_id`.
    #[instrument(skip(self, user_id))]
    pub async fn issue_pass_ticket(
        &self,
        user_id: &str,
        application_id: &str,
    ) -> Result<SecretString, BrokerError> {
        let result = self.pass_ticket(user_id, application_id).await;
        record_credential_issued("passticket", outcome(&result));
        result
    }

    async fn pass_ticket(
        &self,
        user_id: &str,
        application_id: &str,
    ) -> Result<SecretString, BrokerError> {
        if application_id.trim().is_empty() {
            return Err(BrokerError::ApplicationNameNotFound);
        }
        let generator = self
            .pass_tickets
            .as_ref()
            .ok_or(BrokerError::PassTicket(SafReason::ServiceUnavailable))?;

        let ticket = generator.generate(user_id, application_id.trim()).await?;
        Ok(SecretString::from(ticket))
    }

    /// Obtain a SAF Identity Token, spending one PassTicket.
    #[instrument(skip(self, user_id))]
    pub async fn issue_saf_id_token(
        &self,
        user_id: &str,
        application_id: &str,
    ) -> Result<SecretString, BrokerError> {
        let result = self.saf_id_token(user_id, application_id).await;
        record_credential_issued("safidt", outcome(&result));
        result
    }

    async fn saf_id_token(
        &self,
        user_id: &str,
        application_id: &str,
    ) -> Result<SecretString, BrokerError> {
        let ticket = self.pass_ticket(user_id, application_id).await?;
        let provider = self
            .saf_idt
            .as_ref()
            .ok_or_else(|| BrokerError::SafIdtUnavailable("not configured".to_string()))?;

        let token = provider
            .generate(user_id, ticket.expose_secret(), application_id.trim())
            .await?;
        Ok(SecretString::from(token))
    }

    /// Exchange the caller's identity for a token of the z/OSMF instance
    /// registered as `service_id`.
    ///
    /// A JWT source that z/OSMF issued itself is returned unchanged.
    #[instrument(skip(self, source, parsed))]
    pub async fn issue_zosmf_token(
        &self,
        service_id: &str,
        source: &AuthSource,
        parsed: &Parsed,
    ) -> Result<ZosmfToken, BrokerError> {
        let result = self.zosmf_token(service_id, source, parsed).await;
        record_credential_issued("zosmf", outcome(&result));
        result
    }

    async fn zosmf_token(
        &self,
        service_id: &str,
        source: &AuthSource,
        parsed: &Parsed,
    ) -> Result<ZosmfToken, BrokerError> {
        if let AuthSource::Jwt { token, .. } = source {
            if parsed.is_zosmf_issued() {
                return Ok(ZosmfToken {
                    token: token.expose_secret().to_string(),
                    cookie_name: JWT_COOKIE_NAME,
                });
            }
        }

        let zosmf = self
            .zosmf
            .as_ref()
            .ok_or_else(|| BrokerError::ZosmfToken("no z/OSMF instance configured".to_string()))?;
        let ticket = self
            .pass_ticket(parsed.user_id(), &self.zosmf_applid)
            .await?;

        Ok(zosmf
            .authenticate(service_id, parsed.user_id(), ticket.expose_secret())
            .await?)
    }

    /// A Zowe JWT for the caller.
    pub fn issue_zowe_jwt(
        &self,
        source: &AuthSource,
        parsed: &Parsed,
    ) -> Result<SecretString, BrokerError> {
        let result = self.sources.jwt_for(source, parsed);
        record_credential_issued("zowejwt", outcome(&result));
        result
    }
}

fn outcome<T>(result: &Result<T, BrokerError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) if e.status_code() < 500 => "rejected",
        Err(_) => "error",
    }
}
