//! Personal access token endpoints.

use crate::errors::BrokerError;
use crate::handlers::ApiJson;
use crate::middleware::Caller;
use crate::models::{
    GenerateTokenRequest, RevokeScopeTokensRequest, RevokeTokenRequest, RevokeUserTokensRequest,
    ValidateTokenRequest,
};
use crate::routes::AppState;
use crate::services::access_token::SECONDS_PER_DAY;
use crate::services::InvalidateStatus;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Extension,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /gateway/auth/access-token/generate
///
/// Returns the token as `text/plain`. A missing or non-positive validity
/// means the maximum lifetime.
#[instrument(skip_all, name = "broker.handlers.access_token.generate")]
pub async fn generate_access_token(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(request): ApiJson<GenerateTokenRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let parsed = caller.identity()?;
    if request.scopes.iter().all(|scope| scope.trim().is_empty()) {
        return Err(BrokerError::BadRequest(
            "At least one scope is required".to_string(),
        ));
    }
    let scopes: Vec<String> = request
        .scopes
        .iter()
        .map(|scope| scope.trim().to_string())
        .filter(|scope| !scope.is_empty())
        .collect();

    let ttl_seconds = request.validity.saturating_mul(SECONDS_PER_DAY);
    let (token, _) = state
        .access_tokens
        .issue(parsed.user_id(), ttl_seconds, &scopes)
        .await?;

    Ok(([(header::CONTENT_TYPE, "text/plain")], token))
}

/// Handler for DELETE /gateway/auth/access-token/revoke
///
/// - 204 removed
/// - 404 no such token
/// - 503 the caching service failed
#[instrument(skip_all, name = "broker.handlers.access_token.revoke")]
pub async fn revoke_access_token(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RevokeTokenRequest>,
) -> StatusCode {
    match state.access_tokens.invalidate(request.token.trim()).await {
        InvalidateStatus::Removed => StatusCode::NO_CONTENT,
        InvalidateStatus::NotFound => StatusCode::NOT_FOUND,
        InvalidateStatus::Status(_) | InvalidateStatus::Failed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Handler for DELETE /gateway/auth/access-token/revoke/tokens
///
/// Revokes every token of the calling user.
#[instrument(skip_all, name = "broker.handlers.access_token.revoke_user")]
pub async fn revoke_user_tokens(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    request: Option<ApiJson<RevokeUserTokensRequest>>,
) -> Result<StatusCode, BrokerError> {
    let parsed = caller.identity()?;
    let timestamp = request.map_or(0, |ApiJson(r)| r.timestamp);

    state
        .access_tokens
        .invalidate_all_for_user(parsed.user_id(), timestamp)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Handler for DELETE /gateway/auth/access-token/revoke/tokens/scope
///
/// Administrators only, see `require_admin`.
#[instrument(skip_all, name = "broker.handlers.access_token.revoke_scope")]
pub async fn revoke_scope_tokens(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(request): ApiJson<RevokeScopeTokensRequest>,
) -> Result<StatusCode, BrokerError> {
    let admin = caller.require_admin(&state.config)?;
    let service_id = request.service_id.trim();
    if service_id.is_empty() {
        return Err(BrokerError::BadRequest("serviceId is required".to_string()));
    }

    state
        .access_tokens
        .invalidate_all_for_service(service_id, request.timestamp)
        .await?;

    tracing::info!(
        target: "broker.handlers.access_token",
        admin = %admin.user_id(),
        service_id = %service_id,
        "Access tokens revoked for service"
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /gateway/auth/access-token/validate
///
/// 200 when the token is a live access token scoped to `serviceId`,
/// otherwise 401.
#[instrument(skip_all, name = "broker.handlers.access_token.validate")]
pub async fn validate_access_token(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<ValidateTokenRequest>,
) -> Result<StatusCode, BrokerError> {
    let token = request.token.trim();

    let claims = match state.jwt_validator.validate(token).await {
        Ok(claims) => claims,
        Err(e @ BrokerError::UpstreamUnavailable(_)) => return Err(e),
        Err(_) => return Err(BrokerError::TokenNotValid),
    };

    if !claims.is_access_token()
        || !state.access_tokens.is_valid(token, &claims).await
        || !state
            .access_tokens
            .is_valid_for_scopes(&claims, &request.service_id)
    {
        tracing::debug!(target: "broker.handlers.access_token", service_id = %request.service_id, "Access token rejected");
        return Err(BrokerError::TokenNotValid);
    }

    Ok(StatusCode::OK)
}

/// Handler for DELETE /gateway/auth/access-token/evict
///
/// Administrators only.
#[instrument(skip_all, name = "broker.handlers.access_token.evict")]
pub async fn evict_revocation_rules(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<StatusCode, BrokerError> {
    let admin = caller.require_admin(&state.config)?;
    state.access_tokens.evict_non_relevant().await?;

    tracing::info!(target: "broker.handlers.access_token", admin = %admin.user_id(), "Revocation rules evicted");
    Ok(StatusCode::NO_CONTENT)
}
