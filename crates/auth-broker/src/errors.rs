//! Broker error types.
//!
//! Every failure that can reach a client is a `BrokerError` variant. The
//! `IntoResponse` impl is the only place where errors are turned into HTTP:
//! each variant maps to one status code and one message-catalog entry, and
//! internal detail is logged server-side instead of being returned.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Response header naming the reason a proxied call carries no credential.
pub const AUTH_FAILURE_HEADER: &str = "X-Zowe-Auth-Failure";

/// Reason reported by the security service for a failed PassTicket call.
///
/// Classified from the `(safRc, racfRc, racfRsn)` triple returned by the
/// ticket service. Each reason maps to a distinct outward error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafReason {
    /// The application id has no PassTicket profile.
    UnknownApplicationId,
    /// The user is revoked or not defined to the security manager.
    UserRevoked,
    /// The broker's own identity may not generate tickets.
    NotAuthorized,
    /// The security service is not active or not reachable.
    ServiceUnavailable,
    /// Any other return/reason code combination.
    Other {
        saf_rc: i32,
        racf_rc: i32,
        racf_rsn: i32,
    },
}

impl SafReason {
    /// Classify a SAF/RACF return and reason code triple.
    pub fn classify(saf_rc: i32, racf_rc: i32, racf_rsn: i32) -> Self {
        match (saf_rc, racf_rc, racf_rsn) {
            (8, 16, 28) => SafReason::UnknownApplicationId,
            (8, 16, 32) => SafReason::UserRevoked,
            (8, 8, 16) => SafReason::NotAuthorized,
            (4, _, _) => SafReason::ServiceUnavailable,
            _ => SafReason::Other {
                saf_rc,
                racf_rc,
                racf_rsn,
            },
        }
    }
}

/// Broker error type.
///
/// Maps to HTTP status codes:
/// - AuthenticationRequired, TokenNotValid, TokenExpired, NoMainframeIdentity,
///   InvalidCredentials: 401
/// - Forbidden: 403
/// - ApplicationNameNotFound, SchemeConfiguration, BadRequest: 400
/// - PassTicket: 400/401/403/503/500 by SAF reason
/// - SafIdt, ZoweJwt, Internal: 500
/// - ZosmfToken, UpstreamUnavailable: 503
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Authentication is required")]
    AuthenticationRequired,

    #[error("Token is not valid")]
    TokenNotValid,

    #[error("Token is expired")]
    TokenExpired,

    /// The credential did not map to a mainframe user. `valid_token_otherwise`
    /// is `true` when the credential itself passed validation.
    #[error("No mainframe identity for the credential (credential valid: {valid_token_otherwise})")]
    NoMainframeIdentity { valid_token_otherwise: bool },

    /// A downstream system refused the credential the broker presented
    /// for the caller.
    #[error("Credentials were rejected")]
    InvalidCredentials,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Application name is missing")]
    ApplicationNameNotFound,

    #[error("PassTicket generation failed: {0:?}")]
    PassTicket(SafReason),

    #[error("SAF IDT generation failed: {0}")]
    SafIdt(String),

    #[error("SAF IDT service unavailable: {0}")]
    SafIdtUnavailable(String),

    #[error("No z/OSMF token received: {0}")]
    ZosmfToken(String),

    #[error("Zowe JWT could not be produced: {0}")]
    ZoweJwt(String),

    #[error("Unsupported authentication scheme configuration: {0}")]
    SchemeConfiguration(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal,
}

/// One entry of the message catalog.
struct CatalogEntry {
    status: StatusCode,
    number: &'static str,
    key: &'static str,
    content: String,
}

impl BrokerError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        self.catalog_entry().status.as_u16()
    }

    /// Returns the message-catalog key for this error.
    pub fn message_key(&self) -> &'static str {
        self.catalog_entry().key
    }

    /// Whether this failure is about the caller's credential.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            BrokerError::AuthenticationRequired
                | BrokerError::TokenNotValid
                | BrokerError::TokenExpired
                | BrokerError::NoMainframeIdentity { .. }
                | BrokerError::InvalidCredentials
        )
    }

    /// `X-Zowe-Auth-Failure` value: message number and text.
    pub fn auth_failure_summary(&self) -> String {
        let entry = self.catalog_entry();
        format!("{} {}", entry.number, entry.content)
    }

    fn catalog_entry(&self) -> CatalogEntry {
        let entry = |status, number, key, content: &str| CatalogEntry {
            status,
            number,
            key,
            content: content.to_string(),
        };

        match self {
            BrokerError::AuthenticationRequired => entry(
                StatusCode::UNAUTHORIZED,
                "ZWEAG105E",
                "org.zowe.apiml.security.authRequired",
                "Authentication is required for this request",
            ),
            BrokerError::TokenNotValid => entry(
                StatusCode::UNAUTHORIZED,
                "ZWEAG102E",
                "org.zowe.apiml.security.invalidToken",
                "Token is not valid",
            ),
            BrokerError::TokenExpired => entry(
                StatusCode::UNAUTHORIZED,
                "ZWEAG103E",
                "org.zowe.apiml.security.expiredToken",
                "The token has expired",
            ),
            BrokerError::NoMainframeIdentity { .. } => entry(
                StatusCode::UNAUTHORIZED,
                "ZWEAG161E",
                "org.zowe.apiml.gateway.security.schema.x509.mappingFailed",
                "No mainframe user id is mapped to the provided credential",
            ),
            BrokerError::InvalidCredentials => entry(
                StatusCode::UNAUTHORIZED,
                "ZWEAG120E",
                "org.zowe.apiml.security.login.invalidCredentials",
                "Invalid username or password",
            ),
            BrokerError::Forbidden(_) => entry(
                StatusCode::FORBIDDEN,
                "ZWEAT403E",
                "org.zowe.apiml.security.forbidden",
                "The user is not authorized to the target resource",
            ),
            BrokerError::ApplicationNameNotFound => entry(
                StatusCode::BAD_REQUEST,
                "ZWEAG140E",
                "org.zowe.apiml.security.ticket.invalidApplicationName",
                "The 'applicationName' parameter name is missing",
            ),
            BrokerError::PassTicket(reason) => passticket_entry(*reason),
            BrokerError::SafIdt(_) => entry(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ZWEAG150E",
                "org.zowe.apiml.security.idt.failed",
                "SAF IDT generation failed",
            ),
            BrokerError::SafIdtUnavailable(_) => entry(
                StatusCode::SERVICE_UNAVAILABLE,
                "ZWEAG150E",
                "org.zowe.apiml.security.idt.failed",
                "SAF IDT generation failed, the security service is not available",
            ),
            BrokerError::ZosmfToken(_) => entry(
                StatusCode::SERVICE_UNAVAILABLE,
                "ZWEAG170E",
                "org.zowe.apiml.zaas.zosmf.noZosmfTokenReceived",
                "No z/OSMF token was received from the target instance",
            ),
            BrokerError::ZoweJwt(_) => entry(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ZWEAG171E",
                "org.zowe.apiml.zaas.zoweJwt.noToken",
                "No Zowe JWT could be produced for the credential",
            ),
            BrokerError::SchemeConfiguration(reason) => CatalogEntry {
                status: StatusCode::BAD_REQUEST,
                number: "ZWEAG165E",
                key: "org.zowe.apiml.gateway.security.schema.unsupported",
                content: format!("Authentication scheme configuration rejected: {reason}"),
            },
            BrokerError::UpstreamUnavailable(_) => entry(
                StatusCode::SERVICE_UNAVAILABLE,
                "ZWEAG162E",
                "org.zowe.apiml.security.serviceUnavailable",
                "A service required for authentication is not available",
            ),
            BrokerError::BadRequest(reason) => CatalogEntry {
                status: StatusCode::BAD_REQUEST,
                number: "ZWEAO400E",
                key: "org.zowe.apiml.common.badRequest",
                content: reason.clone(),
            },
            BrokerError::Internal => entry(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ZWEAO500E",
                "org.zowe.apiml.common.internalServerError",
                "An internal error occurred",
            ),
        }
    }
}

fn passticket_entry(reason: SafReason) -> CatalogEntry {
    let (status, number, key, content) = match reason {
        SafReason::UnknownApplicationId => (
            StatusCode::BAD_REQUEST,
            "ZWEAG142E",
            "org.zowe.apiml.security.ticket.unknownApplication",
            "The application id is not defined to the security manager".to_string(),
        ),
        SafReason::UserRevoked => (
            StatusCode::UNAUTHORIZED,
            "ZWEAG143E",
            "org.zowe.apiml.security.ticket.userRevoked",
            "The user is revoked or not defined to the security manager".to_string(),
        ),
        SafReason::NotAuthorized => (
            StatusCode::FORBIDDEN,
            "ZWEAG144E",
            "org.zowe.apiml.security.ticket.notAuthorized",
            "The gateway is not authorized to generate PassTickets for this application"
                .to_string(),
        ),
        SafReason::ServiceUnavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "ZWEAG145E",
            "org.zowe.apiml.security.ticket.serviceUnavailable",
            "The PassTicket service is not available".to_string(),
        ),
        SafReason::Other {
            saf_rc,
            racf_rc,
            racf_rsn,
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "ZWEAG141E",
            "org.zowe.apiml.security.ticket.generateFailed",
            format!(
                "The generation of the PassTicket failed. Reason: SAF RC {saf_rc}, RACF RC {racf_rc}, RSN {racf_rsn}"
            ),
        ),
    };

    CatalogEntry {
        status,
        number,
        key,
        content,
    }
}

/// Message-catalog response body.
#[derive(Serialize)]
struct ApiMessageView {
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiMessage {
    message_type: &'static str,
    message_number: &'static str,
    message_content: String,
    message_key: &'static str,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        match &self {
            BrokerError::SafIdt(detail) | BrokerError::ZoweJwt(detail) => {
                tracing::error!(target: "broker.errors", error = %detail, "Credential issuance failed");
            }
            BrokerError::SafIdtUnavailable(detail)
            | BrokerError::ZosmfToken(detail)
            | BrokerError::UpstreamUnavailable(detail) => {
                tracing::warn!(target: "broker.errors", reason = %detail, "Upstream unavailable");
            }
            BrokerError::PassTicket(reason) => {
                tracing::warn!(target: "broker.errors", reason = ?reason, "PassTicket generation failed");
            }
            BrokerError::Forbidden(reason) => {
                tracing::warn!(target: "broker.errors", reason = %reason, "Request forbidden");
            }
            BrokerError::Internal => {
                tracing::error!(target: "broker.errors", "Internal error");
            }
            _ => {}
        }

        let entry = self.catalog_entry();
        let body = ApiMessageView {
            messages: vec![ApiMessage {
                message_type: "ERROR",
                message_number: entry.number,
                message_content: entry.content.clone(),
                message_key: entry.key,
            }],
        };

        let mut response = (entry.status, Json(body)).into_response();

        if entry.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Bearer realm=\"apiml\", error=\"invalid_token\""),
            );
        }

        if self.is_credential_error() {
            if let Ok(value) = HeaderValue::from_str(&self.auth_failure_summary()) {
                response.headers_mut().insert(AUTH_FAILURE_HEADER, value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_saf_reason_classification() {
        assert_eq!(
            SafReason::classify(8, 16, 28),
            SafReason::UnknownApplicationId
        );
        assert_eq!(SafReason::classify(8, 16, 32), SafReason::UserRevoked);
        assert_eq!(SafReason::classify(8, 8, 16), SafReason::NotAuthorized);
        assert_eq!(SafReason::classify(4, 0, 0), SafReason::ServiceUnavailable);
        assert_eq!(
            SafReason::classify(8, 8, 8),
            SafReason::Other {
                saf_rc: 8,
                racf_rc: 8,
                racf_rsn: 8
            }
        );
    }

    #[test]
    fn test_passticket_reasons_map_to_distinct_statuses() {
        let statuses: Vec<u16> = [
            SafReason::UnknownApplicationId,
            SafReason::UserRevoked,
            SafReason::NotAuthorized,
            SafReason::ServiceUnavailable,
            SafReason::Other {
                saf_rc: 8,
                racf_rc: 8,
                racf_rsn: 8,
            },
        ]
        .into_iter()
        .map(|reason| BrokerError::PassTicket(reason).status_code())
        .collect();

        assert_eq!(statuses, vec![400, 401, 403, 503, 500]);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(BrokerError::AuthenticationRequired.status_code(), 401);
        assert_eq!(BrokerError::TokenNotValid.status_code(), 401);
        assert_eq!(BrokerError::TokenExpired.status_code(), 401);
        assert_eq!(
            BrokerError::NoMainframeIdentity {
                valid_token_otherwise: true
            }
            .status_code(),
            401
        );
        assert_eq!(BrokerError::InvalidCredentials.status_code(), 401);
        assert_eq!(BrokerError::Forbidden("x".to_string()).status_code(), 403);
        assert_eq!(BrokerError::ApplicationNameNotFound.status_code(), 400);
        assert_eq!(BrokerError::SafIdt("x".to_string()).status_code(), 500);
        assert_eq!(
            BrokerError::SafIdtUnavailable("x".to_string()).status_code(),
            503
        );
        assert_eq!(BrokerError::ZosmfToken("x".to_string()).status_code(), 503);
        assert_eq!(BrokerError::ZoweJwt("x".to_string()).status_code(), 500);
        assert_eq!(
            BrokerError::SchemeConfiguration("x".to_string()).status_code(),
            400
        );
        assert_eq!(
            BrokerError::UpstreamUnavailable("x".to_string()).status_code(),
            503
        );
        assert_eq!(BrokerError::BadRequest("x".to_string()).status_code(), 400);
        assert_eq!(BrokerError::Internal.status_code(), 500);
    }

    #[tokio::test]
    async fn test_into_response_uses_message_catalog_shape() {
        let response = BrokerError::ApplicationNameNotFound.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(AUTH_FAILURE_HEADER).is_none());

        let body = read_body_json(response.into_body()).await;
        let message = &body["messages"][0];
        assert_eq!(message["messageType"], "ERROR");
        assert_eq!(message["messageNumber"], "ZWEAG140E");
        assert_eq!(
            message["messageKey"],
            "org.zowe.apiml.security.ticket.invalidApplicationName"
        );
        assert!(message["messageContent"]
            .as_str()
            .unwrap()
            .contains("applicationName"));
    }

    #[tokio::test]
    async fn test_into_response_unauthorized_sets_headers() {
        let response = BrokerError::TokenExpired.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www_auth.contains("Bearer realm=\"apiml\""));
        let failure = response
            .headers()
            .get(AUTH_FAILURE_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(failure.starts_with("ZWEAG103E"));
    }

    #[tokio::test]
    async fn test_forbidden_hides_reason_and_has_no_auth_headers() {
        let response = BrokerError::Forbidden("USER1 is not an administrator".to_string())
            .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("WWW-Authenticate").is_none());
        assert!(response.headers().get(AUTH_FAILURE_HEADER).is_none());
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["messages"][0]["messageNumber"], "ZWEAT403E");
        assert!(!body["messages"][0]["messageContent"]
            .as_str()
            .unwrap()
            .contains("USER1"));
    }

    #[tokio::test]
    async fn test_into_response_hides_internal_detail() {
        let response =
            BrokerError::UpstreamUnavailable("cache at 10.0.0.7 refused".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = read_body_json(response.into_body()).await;
        let content = body["messages"][0]["messageContent"].as_str().unwrap();
        assert!(!content.contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_into_response_passticket_other_reports_codes() {
        let response = BrokerError::PassTicket(SafReason::Other {
            saf_rc: 8,
            racf_rc: 8,
            racf_rsn: 8,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(
            body["messages"][0]["messageKey"],
            "org.zowe.apiml.security.ticket.generateFailed"
        );
        assert!(body["messages"][0]["messageContent"]
            .as_str()
            .unwrap()
            .contains("SAF RC 8"));
    }
}
