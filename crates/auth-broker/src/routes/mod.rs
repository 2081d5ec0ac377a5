//! HTTP routes for the authentication broker.
//!
//! Defines the Axum router and application state.

use crate::auth::jwt::JwtValidator;
use crate::config::Config;
use crate::gateway_location::GatewayLocation;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_admin, require_caller, AuthState};
use crate::pipeline::OutboundPipeline;
use crate::services::{AccessTokenProvider, CredentialBroker, ServiceRegistry};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// External gateway address, published once discovery succeeds.
    pub gateway: Arc<GatewayLocation>,

    pub broker: Arc<CredentialBroker>,

    pub access_tokens: Arc<AccessTokenProvider>,

    /// Validator used for tokens passed in request bodies.
    pub jwt_validator: Arc<JwtValidator>,

    pub registry: Arc<ServiceRegistry>,

    /// Outbound request preparation for the proxy.
    pub pipeline: Arc<OutboundPipeline>,
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - operational, public
/// - `/gateway/zaas/{ticket,zosmf,zoweJwt,safIdt}` - credential issuance,
///   requires a caller credential
/// - `/gateway/auth/access-token/*` - personal access tokens; `validate`
///   and `revoke` carry the token in the body and are public,
///   `revoke/tokens/scope` and `evict` are limited to `ADMIN_USERS`
/// - TraceLayer, 30 second timeout, HTTP metrics (outermost)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        broker: state.broker.clone(),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route(
            "/gateway/auth/access-token/validate",
            post(handlers::validate_access_token),
        )
        .route(
            "/gateway/auth/access-token/revoke",
            delete(handlers::revoke_access_token),
        )
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/gateway/zaas/ticket", post(handlers::issue_ticket))
        .route("/gateway/zaas/zosmf", post(handlers::issue_zosmf_token))
        .route("/gateway/zaas/zoweJwt", post(handlers::issue_zowe_jwt))
        .route("/gateway/zaas/safIdt", post(handlers::issue_saf_idt))
        .route(
            "/gateway/auth/access-token/generate",
            post(handlers::generate_access_token),
        )
        .route(
            "/gateway/auth/access-token/revoke/tokens",
            delete(handlers::revoke_user_tokens),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_caller,
        ))
        .with_state(state.clone());

    // require_caller runs first and provides the Caller to require_admin
    let admin_routes = Router::new()
        .route(
            "/gateway/auth/access-token/revoke/tokens/scope",
            delete(handlers::revoke_scope_tokens),
        )
        .route(
            "/gateway/auth/access-token/evict",
            delete(handlers::evict_revocation_rules),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::new(state.config.clone()),
            require_admin,
        ))
        .route_layer(middleware::from_fn_with_state(auth_state, require_caller))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware - records every response (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
