//! Caller resolution for protected routes.
//!
//! Extracts the request's credential (cookie, bearer JWT, client
//! certificate or OIDC token), validates it through the credential broker
//! and stores the result in request extensions for handlers.

use crate::auth::{AuthSource, Parsed};
use crate::config::Config;
use crate::errors::BrokerError;
use crate::services::broker::{CredentialBroker, Resolved};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct AuthState {
    pub broker: Arc<CredentialBroker>,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub source: AuthSource,
    pub resolved: Resolved,
}

impl Caller {
    /// The caller's mainframe identity.
    ///
    /// # Errors
    ///
    /// `NoMainframeIdentity` for an OIDC token that is active but not
    /// mapped to a mainframe user.
    pub fn identity(&self) -> Result<&Parsed, BrokerError> {
        match &self.resolved {
            Resolved::Identity(parsed) => Ok(parsed),
            Resolved::OidcPassthrough(_) => Err(BrokerError::NoMainframeIdentity {
                valid_token_otherwise: true,
            }),
        }
    }

    /// The caller's identity, provided it is a configured administrator.
    pub fn require_admin(&self, config: &Config) -> Result<&Parsed, BrokerError> {
        let parsed = self.identity()?;
        if !config.is_admin(parsed.user_id()) {
            tracing::warn!(
                target: "broker.middleware.admin",
                user_id = %parsed.user_id(),
                "Administrative request refused"
            );
            return Err(BrokerError::Forbidden(format!(
                "{} is not an administrator",
                parsed.user_id()
            )));
        }
        Ok(parsed)
    }
}

/// Rejects requests without a valid credential.
///
/// - 401 `AuthenticationRequired` when no credential is present
/// - the validation error (401/503) when the credential is rejected
#[instrument(skip_all, name = "broker.middleware.auth")]
pub async fn require_caller(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, BrokerError> {
    let source = state.broker.sources().extract(req.headers()).ok_or_else(|| {
        tracing::debug!(target: "broker.middleware.auth", "No credential in request");
        BrokerError::AuthenticationRequired
    })?;

    let resolved = state.broker.resolve(&source).await.map_err(|e| {
        tracing::debug!(
            target: "broker.middleware.auth",
            source = source.source_type().as_str(),
            error = %e,
            "Credential rejected"
        );
        e
    })?;

    req.extensions_mut().insert(Caller { source, resolved });

    Ok(next.run(req).await)
}

/// Rejects callers that are not configured administrators with 403.
///
/// Runs inside `require_caller`, which provides the `Caller`.
#[instrument(skip_all, name = "broker.middleware.admin")]
pub async fn require_admin(
    State(config): State<Arc<Config>>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, BrokerError> {
    let caller = req
        .extensions()
        .get::<Caller>()
        .ok_or(BrokerError::AuthenticationRequired)?;
    caller.require_admin(&config)?;

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::issuer::test_issuer;
    use crate::auth::jwks::JwksClient;
    use crate::auth::jwt::JwtValidator;
    use crate::auth::AuthSourceService;
    use crate::errors::AUTH_FAILURE_HEADER;
    use crate::services::access_token::AccessTokenProvider;
    use crate::services::cache::mock::InMemoryCacheStore;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    async fn whoami(Extension(caller): Extension<Caller>) -> Result<String, BrokerError> {
        Ok(caller.identity()?.user_id().to_string())
    }

    fn auth_state() -> (Arc<AuthState>, Arc<crate::auth::issuer::JwtIssuer>) {
        let issuer = Arc::new(test_issuer("APIML"));
        let jwks = JwksClient::new("http://127.0.0.1:9/jwks".to_string(), reqwest::Client::new())
            .with_pinned_key(issuer.public_jwk());
        let sources = AuthSourceService::new(
            Arc::new(JwtValidator::new(Arc::new(jwks), 300, "APIML")),
            issuer.clone(),
            Arc::new(AccessTokenProvider::new(
                Arc::new(InMemoryCacheStore::new()),
                issuer.clone(),
                90,
            )),
            "apimlAuthenticationToken".to_string(),
            "Client-Cert".to_string(),
        );
        let state = Arc::new(AuthState {
            broker: Arc::new(CredentialBroker::new(
                Arc::new(sources),
                "IZUDFLT".to_string(),
            )),
        });
        (state, issuer)
    }

    fn app() -> (Router, Arc<crate::auth::issuer::JwtIssuer>) {
        let (state, issuer) = auth_state();
        let app = Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state, require_caller));
        (app, issuer)
    }

    fn admin_app() -> (Router, Arc<crate::auth::issuer::JwtIssuer>) {
        let (state, issuer) = auth_state();
        let config = Config::from_vars(&std::collections::HashMap::from([
            (
                "GATEWAY_EXTERNAL_URL".to_string(),
                "https://gateway.example.com".to_string(),
            ),
            ("JWKS_URL".to_string(), "http://127.0.0.1:9/jwks".to_string()),
            ("BROKER_SIGNING_KEY".to_string(), "a2V5".to_string()),
            ("ADMIN_USERS".to_string(), "admin1".to_string()),
        ]))
        .unwrap();

        let app = Router::new()
            .route("/admin", get(whoami))
            .route_layer(middleware::from_fn_with_state(
                Arc::new(config),
                require_admin,
            ))
            .route_layer(middleware::from_fn_with_state(state, require_caller));
        (app, issuer)
    }

    fn admin_request(token: &str) -> Request {
        Request::builder()
            .uri("/admin")
            .header("Cookie", format!("apimlAuthenticationToken={}", token))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_credential_is_rejected() {
        let (app, _) = app();

        let response = app
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
        assert!(response.headers().contains_key(AUTH_FAILURE_HEADER));
    }

    #[tokio::test]
    async fn test_valid_cookie_reaches_handler() {
        let (app, issuer) = app();
        let token = issuer.issue_zowe_jwt("USER1").unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("Cookie", format!("apimlAuthenticationToken={}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected() {
        let (app, _) = app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("Authorization", "Bearer not.a.jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_route_refuses_other_users() {
        let (app, issuer) = admin_app();
        let token = issuer.issue_zowe_jwt("USER1").unwrap();

        let response = app.oneshot(admin_request(&token)).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!response.headers().contains_key(AUTH_FAILURE_HEADER));
    }

    #[tokio::test]
    async fn test_admin_route_admits_configured_admin() {
        let (app, issuer) = admin_app();
        let token = issuer.issue_zowe_jwt("ADMIN1").unwrap();

        let response = app.oneshot(admin_request(&token)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_route_still_requires_a_credential() {
        let (app, _) = admin_app();

        let response = app
            .oneshot(Request::builder().uri("/admin").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_oidc_passthrough_has_no_identity() {
        let caller = Caller {
            source: AuthSource::Oidc("opaque".into()),
            resolved: Resolved::OidcPassthrough("opaque".into()),
        };

        assert!(matches!(
            caller.identity(),
            Err(BrokerError::NoMainframeIdentity {
                valid_token_otherwise: true
            })
        ));
    }
}
