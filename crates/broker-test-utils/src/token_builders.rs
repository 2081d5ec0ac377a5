//! Builders for test tokens.

use crate::crypto_fixtures::{FixtureError, TestKeypair, TestRsaKeypair};
use chrono::{Duration, Utc};
use serde_json::json;

/// Builder for JWT claims in the gateway's format.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user("USER1")
///     .expires_in(600)
///     .sign(&gateway_key)?;
/// ```
pub struct TestTokenBuilder {
    sub: String,
    iss: String,
    exp: i64,
    iat: i64,
    token_type: Option<String>,
    scopes: Vec<String>,
}

impl TestTokenBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: "USER1".to_string(),
            iss: "APIML".to_string(),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            token_type: None,
            scopes: Vec::new(),
        }
    }

    pub fn for_user(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    pub fn issued_by(mut self, issuer: &str) -> Self {
        self.iss = issuer.to_string();
        self
    }

    /// Expiration in seconds from now. Negative values build expired tokens.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Mark the token as a personal access token for `scopes`.
    pub fn access_token(mut self, scopes: &[&str]) -> Self {
        self.token_type = Some("PAT".to_string());
        self.scopes = scopes.iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn build(self) -> serde_json::Value {
        let mut claims = json!({
            "sub": self.sub,
            "iss": self.iss,
            "exp": self.exp,
            "iat": self.iat,
        });
        if let Some(token_type) = self.token_type {
            claims["token_type"] = json!(token_type);
            claims["scopes"] = json!(self.scopes);
        }
        claims
    }

    pub fn sign(self, keypair: &TestKeypair) -> Result<String, FixtureError> {
        keypair.sign(&self.build())
    }

    /// Sign with the RSA fixture key, as z/OSMF does.
    pub fn sign_rs256(self, keypair: &TestRsaKeypair) -> Result<String, FixtureError> {
        keypair.sign(&self.build())
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
