//! Broker token issuer.
//!
//! Signs the tokens the broker produces itself: Zowe JWTs for callers that
//! authenticated with a certificate or an OIDC token, and personal access
//! tokens. Tokens are EdDSA-signed with the key from `BROKER_SIGNING_KEY`;
//! the matching public key is pinned into the JWKS client so they validate
//! like any gateway JWT.

use crate::auth::claims::{Claims, ACCESS_TOKEN_TYPE};
use crate::auth::jwks::Jwk;
use crate::config::ConfigError;
use crate::errors::BrokerError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};

pub struct JwtIssuer {
    encoding_key: EncodingKey,
    key_id: String,
    issuer: String,
    ttl_seconds: i64,
    public_jwk: Jwk,
}

impl JwtIssuer {
    /// Build an issuer from a PKCS#8 Ed25519 private key.
    pub fn from_pkcs8(
        pkcs8_der: &[u8],
        key_id: &str,
        issuer: &str,
        ttl_seconds: i64,
    ) -> Result<Self, ConfigError> {
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8_der).map_err(|e| {
            ConfigError::InvalidSigningKey(format!("not a PKCS#8 Ed25519 key: {}", e))
        })?;

        let public_jwk = Jwk {
            kty: "OKP".to_string(),
            kid: key_id.to_string(),
            crv: Some("Ed25519".to_string()),
            x: Some(URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref())),
            alg: Some("EdDSA".to_string()),
            key_use: Some("sig".to_string()),
            ..Jwk::default()
        };

        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(pkcs8_der),
            key_id: key_id.to_string(),
            issuer: issuer.to_string(),
            ttl_seconds,
            public_jwk,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Public half of the signing key, as published in a JWKS.
    pub fn public_jwk(&self) -> Jwk {
        self.public_jwk.clone()
    }

    /// Sign arbitrary claims with the broker key.
    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.key_id.clone());

        encode(&header, claims, &self.encoding_key)
    }

    /// Issue a Zowe JWT for a mapped mainframe user.
    pub fn issue_zowe_jwt(&self, user_id: &str) -> Result<String, BrokerError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + self.ttl_seconds,
            iat: now,
            iss: self.issuer.clone(),
            jti: Some(uuid::Uuid::new_v4().to_string()),
            token_type: None,
            scopes: Vec::new(),
        };

        self.sign(&claims).map_err(|e| {
            tracing::error!(target: "broker.auth.issuer", error = %e, "Failed to sign Zowe JWT");
            BrokerError::ZoweJwt(format!("signing failed: {}", e))
        })
    }

    /// Issue a personal access token. Scopes are stored lower-cased.
    pub fn issue_access_token(
        &self,
        user_id: &str,
        ttl_seconds: i64,
        scopes: &[String],
    ) -> Result<(String, Claims), BrokerError> {
        let now = chrono::Utc::now().timestamp();
        let mut scopes: Vec<String> = scopes.iter().map(|s| s.to_lowercase()).collect();
        scopes.sort();
        scopes.dedup();

        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl_seconds,
            iat: now,
            iss: self.issuer.clone(),
            jti: Some(uuid::Uuid::new_v4().to_string()),
            token_type: Some(ACCESS_TOKEN_TYPE.to_string()),
            scopes,
        };

        let token = self.sign(&claims).map_err(|e| {
            tracing::error!(target: "broker.auth.issuer", error = %e, "Failed to sign access token");
            BrokerError::Internal
        })?;

        Ok((token, claims))
    }
}

/// Freshly generated issuer for unit tests.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn test_issuer(issuer: &str) -> JwtIssuer {
    let rng = ring::rand::SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).expect("key generation");
    JwtIssuer::from_pkcs8(pkcs8.as_ref(), "broker-test-key", issuer, 3600).expect("valid key")
}
