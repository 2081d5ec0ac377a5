//! Credential issuance endpoints.
//!
//! Each handler takes the caller resolved by `require_caller` and returns
//! the credential a mainframe service expects for that caller.

use crate::errors::BrokerError;
use crate::handlers::ApiJson;
use crate::middleware::Caller;
use crate::models::{ApplicationRequest, SafIdtResponse, TicketResponse, TokenResponse};
use crate::routes::AppState;
use crate::schemes::OIDC_TOKEN_HEADER;
use crate::services::Resolved;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use common::secret::ExposeSecret;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /gateway/zaas/ticket
///
/// # Response
///
/// - 200 `{ticket, userId, applicationName}`
/// - 400 missing body or `applicationName`, or unknown application id
/// - 401/403/500/503 by security service reason
#[instrument(skip_all, name = "broker.handlers.ticket")]
pub async fn issue_ticket(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    request: Option<ApiJson<ApplicationRequest>>,
) -> Result<Json<TicketResponse>, BrokerError> {
    let parsed = caller.identity()?;
    let application_name = application_name(request);

    let ticket = state
        .broker
        .issue_pass_ticket(parsed.user_id(), &application_name)
        .await?;

    tracing::debug!(target: "broker.handlers.zaas", application_name = %application_name, "PassTicket issued");

    Ok(Json(TicketResponse {
        ticket: ticket.expose_secret().to_string(),
        user_id: parsed.user_id().to_string(),
        application_name,
    }))
}

/// Handler for POST /gateway/zaas/zosmf
///
/// Returns a token of the configured z/OSMF instance, either `jwtToken` or
/// `LtpaToken2` depending on what the instance supports.
#[instrument(skip_all, name = "broker.handlers.zosmf")]
pub async fn issue_zosmf_token(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<TokenResponse>, BrokerError> {
    let parsed = caller.identity()?;

    let token = state
        .broker
        .issue_zosmf_token(&state.config.zosmf_service_id, &caller.source, parsed)
        .await?;

    Ok(Json(TokenResponse::cookie(token.token, token.cookie_name)))
}

/// Handler for POST /gateway/zaas/zoweJwt
///
/// An active OIDC token with no mainframe user is answered with 200, no
/// body and the token itself in the `OIDC-token` header.
#[instrument(skip_all, name = "broker.handlers.zowe_jwt")]
pub async fn issue_zowe_jwt(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<Response, BrokerError> {
    match &caller.resolved {
        Resolved::Identity(parsed) => {
            let token = state.broker.issue_zowe_jwt(&caller.source, parsed)?;
            Ok(Json(TokenResponse::cookie(
                token.expose_secret().to_string(),
                state.broker.sources().auth_cookie_name(),
            ))
            .into_response())
        }
        Resolved::OidcPassthrough(token) => {
            let mut value =
                HeaderValue::from_str(token.expose_secret()).map_err(|_| BrokerError::TokenNotValid)?;
            value.set_sensitive(true);

            let mut response = StatusCode::OK.into_response();
            response.headers_mut().insert(OIDC_TOKEN_HEADER, value);
            Ok(response)
        }
    }
}

/// Handler for POST /gateway/zaas/safIdt
#[instrument(skip_all, name = "broker.handlers.saf_idt")]
pub async fn issue_saf_idt(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    request: Option<ApiJson<ApplicationRequest>>,
) -> Result<Json<SafIdtResponse>, BrokerError> {
    let parsed = caller.identity()?;

    let token = state
        .broker
        .issue_saf_id_token(parsed.user_id(), &application_name(request))
        .await?;

    Ok(Json(SafIdtResponse {
        token: token.expose_secret().to_string(),
    }))
}

/// Trimmed `applicationName`; empty when the body is missing or unreadable,
/// which the broker reports as `ApplicationNameNotFound`.
fn application_name(request: Option<ApiJson<ApplicationRequest>>) -> String {
    request
        .map(|ApiJson(request)| request.application_name.trim().to_string())
        .unwrap_or_default()
}
