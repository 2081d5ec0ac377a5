//! Authentication sources.
//!
//! An `AuthSource` is the one credential taken from an inbound request.
//! Sources are looked for in a fixed order and the first one found wins:
//!
//! 1. the authentication cookie
//! 2. a bearer gateway/z/OSMF JWT, or a personal access token in
//!    `PRIVATE-TOKEN` or the `personalAccessToken` cookie
//! 3. the forwarded client certificate (X.509 enabled only)
//! 4. any other bearer token (OIDC enabled only)
//!
//! With OIDC disabled, a bearer token that is not a recognised JWT is still
//! taken as a JWT source, so it fails validation instead of the request
//! going through anonymously.
//!
//! `validate` turns a source into a `Parsed` identity carrying a mainframe
//! user id. Nothing else constructs `Parsed` outside this crate.

use crate::auth::claims::ZOSMF_ISSUER;
use crate::auth::identity::IdentityMapper;
use crate::auth::issuer::JwtIssuer;
use crate::auth::jwt::JwtValidator;
use crate::auth::oidc::OidcProvider;
use crate::auth::x509::{CertificateValidator, ClientCertificate};
use crate::cookies;
use crate::errors::BrokerError;
use crate::observability::record_auth_source;
use crate::services::access_token::AccessTokenProvider;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use common::jwt::peek_claims;
use common::secret::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Header carrying a personal access token.
pub const PRIVATE_TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Cookie carrying a personal access token.
pub const PAT_COOKIE_NAME: &str = "personalAccessToken";

/// Where a JWT source was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtOrigin {
    Cookie,
    Bearer,
    PrivateToken,
    PatCookie,
}

impl JwtOrigin {
    fn requires_access_token(self) -> bool {
        matches!(self, JwtOrigin::PrivateToken | JwtOrigin::PatCookie)
    }
}

/// The credential carried by an inbound request.
#[derive(Debug, Clone)]
pub enum AuthSource {
    Jwt {
        token: SecretString,
        origin: JwtOrigin,
    },
    /// Raw value of the client certificate header.
    X509(String),
    Oidc(SecretString),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSourceType {
    Jwt,
    X509,
    Oidc,
    None,
}

impl AuthSourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthSourceType::Jwt => "jwt",
            AuthSourceType::X509 => "x509",
            AuthSourceType::Oidc => "oidc",
            AuthSourceType::None => "none",
        }
    }

    /// Type of an optional source; `None` when nothing was extracted.
    pub fn of(source: Option<&AuthSource>) -> Self {
        source.map_or(AuthSourceType::None, AuthSource::source_type)
    }
}

impl AuthSource {
    pub fn source_type(&self) -> AuthSourceType {
        match self {
            AuthSource::Jwt { .. } => AuthSourceType::Jwt,
            AuthSource::X509(_) => AuthSourceType::X509,
            AuthSource::Oidc(_) => AuthSourceType::Oidc,
        }
    }
}

/// Certificate fields forwarded to X.509 services.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateDetail {
    pub common_name: Option<String>,
    pub distinguished_name: String,
    /// Base64 DER.
    pub encoded: String,
}

impl fmt::Debug for CertificateDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateDetail")
            .field("common_name", &self.common_name)
            .field("distinguished_name", &self.distinguished_name)
            .finish_non_exhaustive()
    }
}

/// A validated identity. Always carries a non-empty user id.
#[derive(Clone, PartialEq, Eq)]
pub struct Parsed {
    user_id: String,
    /// Unix seconds; `None` for certificates.
    expires_at: Option<i64>,
    origin: AuthSourceType,
    issuer: Option<String>,
    certificate: Option<CertificateDetail>,
}

impl fmt::Debug for Parsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parsed")
            .field("user_id", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("origin", &self.origin)
            .field("issuer", &self.issuer)
            .field("certificate", &self.certificate)
            .finish()
    }
}

impl Parsed {
    pub(crate) fn new(
        user_id: String,
        expires_at: Option<i64>,
        origin: AuthSourceType,
    ) -> Result<Self, BrokerError> {
        if user_id.trim().is_empty() {
            return Err(BrokerError::NoMainframeIdentity {
                valid_token_otherwise: true,
            });
        }
        Ok(Self {
            user_id,
            expires_at,
            origin,
            issuer: None,
            certificate: None,
        })
    }

    pub(crate) fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub(crate) fn with_certificate(mut self, certificate: CertificateDetail) -> Self {
        self.certificate = Some(certificate);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    pub fn origin(&self) -> AuthSourceType {
        self.origin
    }

    pub fn certificate(&self) -> Option<&CertificateDetail> {
        self.certificate.as_ref()
    }

    /// Whether the source was a JWT produced by z/OSMF itself.
    pub fn is_zosmf_issued(&self) -> bool {
        self.issuer.as_deref() == Some(ZOSMF_ISSUER)
    }
}

struct OidcSettings {
    provider: Arc<dyn OidcProvider>,
    registry: String,
}

/// Extracts and validates authentication sources.
pub struct AuthSourceService {
    jwt_validator: Arc<JwtValidator>,
    issuer: Arc<JwtIssuer>,
    access_tokens: Arc<AccessTokenProvider>,
    certificate_validator: Option<Arc<dyn CertificateValidator>>,
    oidc: Option<OidcSettings>,
    identity_mapper: Option<Arc<dyn IdentityMapper>>,
    auth_cookie_name: String,
    client_cert_header: String,
}

impl AuthSourceService {
    pub fn new(
        jwt_validator: Arc<JwtValidator>,
        issuer: Arc<JwtIssuer>,
        access_tokens: Arc<AccessTokenProvider>,
        auth_cookie_name: String,
        client_cert_header: String,
    ) -> Self {
        Self {
            jwt_validator,
            issuer,
            access_tokens,
            certificate_validator: None,
            oidc: None,
            identity_mapper: None,
            auth_cookie_name,
            client_cert_header,
        }
    }

    /// Accept forwarded client certificates.
    pub fn with_x509(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.certificate_validator = Some(validator);
        self
    }

    /// Accept OIDC bearer tokens, mapped within `registry`.
    pub fn with_oidc(mut self, provider: Arc<dyn OidcProvider>, registry: String) -> Self {
        self.oidc = Some(OidcSettings { provider, registry });
        self
    }

    pub fn with_identity_mapper(mut self, mapper: Arc<dyn IdentityMapper>) -> Self {
        self.identity_mapper = Some(mapper);
        self
    }

    pub fn x509_enabled(&self) -> bool {
        self.certificate_validator.is_some()
    }

    pub fn oidc_enabled(&self) -> bool {
        self.oidc.is_some()
    }

    pub fn auth_cookie_name(&self) -> &str {
        &self.auth_cookie_name
    }

    pub fn client_cert_header(&self) -> &str {
        &self.client_cert_header
    }

    /// Find the request's credential. `None` is not an error.
    pub fn extract(&self, headers: &HeaderMap) -> Option<AuthSource> {
        if let Some(token) = cookies::find(headers, &self.auth_cookie_name) {
            return Some(jwt_source(token, JwtOrigin::Cookie));
        }

        let bearer = bearer_token(headers);
        if let Some(token) = &bearer {
            if self.is_recognised_jwt(token) {
                return Some(jwt_source(token.clone(), JwtOrigin::Bearer));
            }
        }
        if let Some(token) = header_value(headers, PRIVATE_TOKEN_HEADER) {
            return Some(jwt_source(token, JwtOrigin::PrivateToken));
        }
        if let Some(token) = cookies::find(headers, PAT_COOKIE_NAME) {
            return Some(jwt_source(token, JwtOrigin::PatCookie));
        }

        if self.x509_enabled() {
            if let Some(certificate) = header_value(headers, &self.client_cert_header) {
                return Some(AuthSource::X509(certificate));
            }
        }

        bearer.map(|token| {
            if self.oidc_enabled() {
                AuthSource::Oidc(SecretString::from(token))
            } else {
                jwt_source(token, JwtOrigin::Bearer)
            }
        })
    }

    fn is_recognised_jwt(&self, token: &str) -> bool {
        peek_claims(token)
            .ok()
            .and_then(|claims| claims.issuer)
            .is_some_and(|issuer| self.jwt_validator.accepts_issuer(&issuer))
    }

    /// Validate a source into a mainframe identity.
    ///
    /// # Errors
    ///
    /// - `TokenNotValid` / `TokenExpired` for a bad credential
    /// - `NoMainframeIdentity` when a valid credential maps to no user
    /// - `UpstreamUnavailable` when a required collaborator is unreachable
    #[instrument(skip_all, fields(source = source.source_type().as_str()))]
    pub async fn validate(&self, source: &AuthSource) -> Result<Parsed, BrokerError> {
        let result = match source {
            AuthSource::Jwt { token, origin } => self.validate_jwt(token, *origin).await,
            AuthSource::X509(raw) => self.validate_certificate(raw).await,
            AuthSource::Oidc(token) => self.validate_oidc(token).await,
        };

        let outcome = match &result {
            Ok(_) => "valid",
            Err(BrokerError::TokenExpired) => "expired",
            Err(BrokerError::NoMainframeIdentity { .. }) => "unmapped",
            Err(BrokerError::UpstreamUnavailable(_)) => "unavailable",
            Err(_) => "invalid",
        };
        record_auth_source(source.source_type().as_str(), outcome);
        result
    }

    /// A JWT for the source's identity.
    ///
    /// JWT sources yield their own token. Certificate and OIDC sources are
    /// mapped and a fresh Zowe JWT is issued.
    pub async fn get_jwt(&self, source: &AuthSource) -> Result<SecretString, BrokerError> {
        let parsed = self.validate(source).await?;
        self.jwt_for(source, &parsed)
    }

    /// Like `get_jwt`, for a source that has already been validated.
    pub fn jwt_for(&self, source: &AuthSource, parsed: &Parsed) -> Result<SecretString, BrokerError> {
        match source {
            AuthSource::Jwt { token, .. } => Ok(token.clone()),
            AuthSource::X509(_) | AuthSource::Oidc(_) => self
                .issuer
                .issue_zowe_jwt(parsed.user_id())
                .map(SecretString::from),
        }
    }

    async fn validate_jwt(
        &self,
        token: &SecretString,
        origin: JwtOrigin,
    ) -> Result<Parsed, BrokerError> {
        let token = token.expose_secret();
        let claims = self.jwt_validator.validate(token).await?;

        if claims.is_access_token() {
            if !self.access_tokens.is_valid(token, &claims).await {
                tracing::debug!(target: "broker.auth.source", "Access token is revoked");
                return Err(BrokerError::TokenNotValid);
            }
        } else if origin.requires_access_token() {
            tracing::debug!(target: "broker.auth.source", origin = ?origin, "Non-PAT JWT in access token slot");
            return Err(BrokerError::TokenNotValid);
        }

        Ok(Parsed::new(claims.sub, Some(claims.exp), AuthSourceType::Jwt)
            .map_err(|_| BrokerError::TokenNotValid)?
            .with_issuer(claims.iss))
    }

    async fn validate_certificate(&self, raw: &str) -> Result<Parsed, BrokerError> {
        let validator = self
            .certificate_validator
            .as_ref()
            .ok_or(BrokerError::TokenNotValid)?;

        let certificate = ClientCertificate::from_header_value(raw).map_err(|e| {
            tracing::debug!(target: "broker.auth.source", error = %e, "Unreadable client certificate");
            BrokerError::TokenNotValid
        })?;
        validator.validate(&certificate).map_err(|e| {
            tracing::info!(target: "broker.auth.source", error = %e, "Client certificate rejected");
            BrokerError::TokenNotValid
        })?;

        let user_id = self
            .mapper()?
            .map_certificate(&certificate)
            .await?
            .ok_or(BrokerError::NoMainframeIdentity {
                valid_token_otherwise: true,
            })?;

        let detail = CertificateDetail {
            common_name: certificate.common_name().map(str::to_string),
            distinguished_name: certificate.distinguished_name().to_string(),
            encoded: certificate.to_base64(),
        };
        Ok(Parsed::new(user_id, None, AuthSourceType::X509)?.with_certificate(detail))
    }

    async fn validate_oidc(&self, token: &SecretString) -> Result<Parsed, BrokerError> {
        let oidc = self.oidc.as_ref().ok_or(BrokerError::TokenNotValid)?;

        let introspection = oidc.provider.introspect(token).await?;
        if !introspection.active {
            return Err(BrokerError::TokenNotValid);
        }
        if introspection
            .exp
            .is_some_and(|exp| exp <= chrono::Utc::now().timestamp())
        {
            return Err(BrokerError::TokenExpired);
        }

        let unmapped = BrokerError::NoMainframeIdentity {
            valid_token_otherwise: true,
        };
        let distributed_id = match introspection.sub.as_deref() {
            Some(sub) if !sub.is_empty() => sub,
            _ => return Err(unmapped),
        };

        let user_id = self
            .mapper()?
            .map_distributed_id(distributed_id, &oidc.registry)
            .await?
            .ok_or(unmapped)?;

        Parsed::new(user_id, introspection.exp, AuthSourceType::Oidc)
    }

    fn mapper(&self) -> Result<&Arc<dyn IdentityMapper>, BrokerError> {
        self.identity_mapper.as_ref().ok_or_else(|| {
            tracing::error!(target: "broker.auth.source", "No identity mapper configured");
            BrokerError::Internal
        })
    }
}

fn jwt_source(token: String, origin: JwtOrigin) -> AuthSource {
    AuthSource::Jwt {
        token: SecretString::from(token),
        origin,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = header_value(headers, AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
