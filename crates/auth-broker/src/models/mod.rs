//! Request and response bodies of the broker's HTTP surface.

use serde::{Deserialize, Serialize};

// ============================================================================
// Credential issuance (/gateway/zaas)
// ============================================================================

/// Body of `POST /gateway/zaas/ticket` and `POST /gateway/zaas/safIdt`.
///
/// A missing name is reported as `ApplicationNameNotFound`, not as a
/// deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRequest {
    #[serde(default)]
    pub application_name: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub ticket: String,
    pub user_id: String,
    pub application_name: String,
}

impl std::fmt::Debug for TicketResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketResponse")
            .field("ticket", &"[REDACTED]")
            .field("user_id", &"[REDACTED]")
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// A token and where the target service expects it.
///
/// Exactly one of `cookie_name` and `header_name` is set.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

impl TokenResponse {
    pub fn cookie(token: String, cookie_name: &str) -> Self {
        Self {
            token,
            cookie_name: Some(cookie_name.to_string()),
            header_name: None,
        }
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token", &"[REDACTED]")
            .field("cookie_name", &self.cookie_name)
            .field("header_name", &self.header_name)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SafIdtResponse {
    pub token: String,
}

impl std::fmt::Debug for SafIdtResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafIdtResponse")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Access tokens (/gateway/auth/access-token)
// ============================================================================

/// Body of `POST /generate`. `validity` is in days.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateTokenRequest {
    #[serde(default)]
    pub validity: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Clone, Deserialize)]
pub struct RevokeTokenRequest {
    pub token: String,
}

impl std::fmt::Debug for RevokeTokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevokeTokenRequest")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Body of `DELETE /revoke/tokens`. `timestamp` is in milliseconds,
/// `0` or absent meaning now.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevokeUserTokensRequest {
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeScopeTokensRequest {
    pub service_id: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenRequest {
    pub token: String,
    pub service_id: String,
}

impl std::fmt::Debug for ValidateTokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidateTokenRequest")
            .field("token", &"[REDACTED]")
            .field("service_id", &self.service_id)
            .finish()
    }
}

// ============================================================================
// Operational
// ============================================================================

/// Readiness probe body.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_application_request_defaults_missing_name() {
        let request: ApplicationRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.application_name, "");

        let request: ApplicationRequest =
            serde_json::from_str(r#"{"applicationName":"APPL1"}"#).unwrap();
        assert_eq!(request.application_name, "APPL1");
    }

    #[test]
    fn test_token_response_omits_unused_location() {
        let json = serde_json::to_string(&TokenResponse::cookie(
            "t".to_string(),
            "jwtToken",
        ))
        .unwrap();

        assert_eq!(json, r#"{"token":"t","cookieName":"jwtToken"}"#);
    }

    #[test]
    fn test_ticket_response_wire_names() {
        let json = serde_json::to_value(TicketResponse {
            ticket: "TICKET".to_string(),
            user_id: "USER1".to_string(),
            application_name: "APPL1".to_string(),
        })
        .unwrap();

        assert_eq!(json["userId"], "USER1");
        assert_eq!(json["applicationName"], "APPL1");
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let response = TokenResponse::cookie("secret-token".to_string(), "jwtToken");
        let request = ValidateTokenRequest {
            token: "secret-token".to_string(),
            service_id: "svc".to_string(),
        };

        assert!(!format!("{:?}", response).contains("secret-token"));
        assert!(!format!("{:?}", request).contains("secret-token"));
    }

    #[test]
    fn test_readiness_response_serialization() {
        let ready = ReadinessResponse {
            status: "ready",
            gateway: Some("resolved"),
            error: None,
        };

        let json = serde_json::to_string(&ready).unwrap();
        assert!(json.contains("\"status\":\"ready\""));
        assert!(!json.contains("\"error\""));
    }
}
