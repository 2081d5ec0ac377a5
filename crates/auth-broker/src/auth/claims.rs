//! JWT claims structure.
//!
//! Claims of gateway JWTs, broker re-issued Zowe JWTs and personal access
//! tokens. The `sub` field is redacted in Debug output to prevent exposure
//! in logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `token_type` value carried by personal access tokens.
pub const ACCESS_TOKEN_TYPE: &str = "PAT";

/// Issuer used by z/OSMF for the JWTs it produces.
pub const ZOSMF_ISSUER: &str = "zOSMF";

/// JWT claims for validated tokens.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Mainframe user id - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    pub iss: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// `"PAT"` for personal access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Service ids a personal access token is valid for (lower-case).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

/// Custom Debug implementation that redacts the `sub` field.
impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("iss", &self.iss)
            .field("jti", &self.jti)
            .field("token_type", &self.token_type)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Claims {
    pub fn is_access_token(&self) -> bool {
        self.token_type.as_deref() == Some(ACCESS_TOKEN_TYPE)
    }

    pub fn is_zosmf_issued(&self) -> bool {
        self.iss == ZOSMF_ISSUER
    }

    /// Whether `service_id` is among the token scopes (case-insensitive).
    pub fn has_scope(&self, service_id: &str) -> bool {
        let wanted = service_id.to_lowercase();
        self.scopes.iter().any(|s| *s == wanted)
    }
}
