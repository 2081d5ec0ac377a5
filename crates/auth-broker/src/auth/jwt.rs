//! JWT validation.
//!
//! Validates gateway JWTs, z/OSMF JWTs and broker-issued tokens using public
//! keys from the JWKS endpoint.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Each JWK verifies exactly one algorithm, fixed by its `kty`, `crv` and
//!   `alg` (EdDSA, RS256/384/512, PS256/384/512, ES256/384); the token
//!   header cannot choose another
//! - Expiration and issued-at claims are validated with clock skew tolerance
//! - Only the gateway issuer and z/OSMF are accepted as `iss`

use crate::auth::claims::{Claims, ZOSMF_ISSUER};
use crate::auth::jwks::{Jwk, JwksClient};
use crate::errors::BrokerError;
use common::jwt::{decode_ed25519_public_key_jwk, extract_kid, validate_iat};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// JWT validator backed by the JWKS client.
pub struct JwtValidator {
    jwks_client: Arc<JwksClient>,

    /// Clock skew tolerance for iat validation.
    clock_skew: Duration,

    /// Accepted `iss` values.
    issuers: [String; 2],
}

impl JwtValidator {
    pub fn new(jwks_client: Arc<JwksClient>, clock_skew_seconds: i64, gateway_issuer: &str) -> Self {
        Self {
            jwks_client,
            clock_skew: Duration::from_secs(clock_skew_seconds.unsigned_abs()),
            issuers: [gateway_issuer.to_string(), ZOSMF_ISSUER.to_string()],
        }
    }

    /// Issuer of gateway tokens.
    pub fn gateway_issuer(&self) -> &str {
        self.issuers.first().map(String::as_str).unwrap_or_default()
    }

    /// Whether `issuer` is one this validator accepts.
    pub fn accepts_issuer(&self, issuer: &str) -> bool {
        self.issuers.iter().any(|i| i == issuer)
    }

    /// Validate a JWT and return the claims.
    ///
    /// # Security Checks
    ///
    /// 1. Size check - reject tokens > 8KB before parsing
    /// 2. Extract kid from header to find the correct key
    /// 3. Fetch public key from JWKS
    /// 4. Verify the signature with the key's algorithm, `exp` and `iss`
    /// 5. Validate iat claim with clock skew tolerance
    ///
    /// # Errors
    ///
    /// `TokenExpired` for an expired token, `TokenNotValid` for every other
    /// validation failure, `UpstreamUnavailable` when the JWKS is unreachable.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<Claims, BrokerError> {
        let kid = extract_kid(token).map_err(|e| {
            tracing::debug!(target: "broker.auth.jwt", error = ?e, "Token kid extraction failed");
            BrokerError::TokenNotValid
        })?;

        let jwk = self.jwks_client.get_key(&kid).await?;

        let claims = verify_token(token, &jwk, &self.issuers)?;

        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "broker.auth.jwt", error = ?e, "Token iat validation failed");
            return Err(BrokerError::TokenNotValid);
        }

        if claims.sub.is_empty() {
            tracing::debug!(target: "broker.auth.jwt", "Token has an empty subject");
            return Err(BrokerError::TokenNotValid);
        }

        tracing::debug!(target: "broker.auth.jwt", "Token validated successfully");
        Ok(claims)
    }
}

/// Verify JWT signature and extract claims.
fn verify_token(token: &str, jwk: &Jwk, issuers: &[String]) -> Result<Claims, BrokerError> {
    let algorithm = key_algorithm(jwk)?;
    let decoding_key = decoding_key(jwk, algorithm)?;

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    validation.leeway = 0;
    validation.set_issuer(issuers);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let token_data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(target: "broker.auth.jwt", error = %e, "Token verification failed");
        match e.kind() {
            ErrorKind::ExpiredSignature => BrokerError::TokenExpired,
            _ => BrokerError::TokenNotValid,
        }
    })?;

    Ok(token_data.claims)
}

/// The single algorithm a JWK may verify. A missing `alg` takes the
/// default for the key type.
fn key_algorithm(jwk: &Jwk) -> Result<Algorithm, BrokerError> {
    let algorithm = match (jwk.kty.as_str(), jwk.crv.as_deref(), jwk.alg.as_deref()) {
        ("OKP", None | Some("Ed25519"), None | Some("EdDSA")) => Algorithm::EdDSA,
        ("RSA", _, None | Some("RS256")) => Algorithm::RS256,
        ("RSA", _, Some("RS384")) => Algorithm::RS384,
        ("RSA", _, Some("RS512")) => Algorithm::RS512,
        ("RSA", _, Some("PS256")) => Algorithm::PS256,
        ("RSA", _, Some("PS384")) => Algorithm::PS384,
        ("RSA", _, Some("PS512")) => Algorithm::PS512,
        ("EC", Some("P-256"), None | Some("ES256")) => Algorithm::ES256,
        ("EC", Some("P-384"), None | Some("ES384")) => Algorithm::ES384,
        _ => {
            tracing::warn!(
                target: "broker.auth.jwt",
                kid = %jwk.kid,
                kty = %jwk.kty,
                crv = ?jwk.crv,
                alg = ?jwk.alg,
                "Unsupported JWK"
            );
            return Err(BrokerError::TokenNotValid);
        }
    };
    Ok(algorithm)
}

fn decoding_key(jwk: &Jwk, algorithm: Algorithm) -> Result<DecodingKey, BrokerError> {
    match algorithm {
        Algorithm::EdDSA => {
            let public_key_bytes = decode_ed25519_public_key_jwk(key_component(jwk, &jwk.x, "x")?)
                .map_err(|e| invalid_key(jwk, e))?;
            Ok(DecodingKey::from_ed_der(&public_key_bytes))
        }
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_components(
            key_component(jwk, &jwk.x, "x")?,
            key_component(jwk, &jwk.y, "y")?,
        )
        .map_err(|e| invalid_key(jwk, e)),
        _ => DecodingKey::from_rsa_components(
            key_component(jwk, &jwk.n, "n")?,
            key_component(jwk, &jwk.e, "e")?,
        )
        .map_err(|e| invalid_key(jwk, e)),
    }
}

fn key_component<'a>(
    jwk: &Jwk,
    value: &'a Option<String>,
    field: &str,
) -> Result<&'a str, BrokerError> {
    value.as_deref().ok_or_else(|| {
        tracing::error!(target: "broker.auth.jwt", kid = %jwk.kid, field, "JWK missing key material");
        BrokerError::TokenNotValid
    })
}

fn invalid_key(jwk: &Jwk, error: impl std::fmt::Display) -> BrokerError {
    tracing::error!(target: "broker.auth.jwt", kid = %jwk.kid, error = %error, "Invalid public key encoding");
    BrokerError::TokenNotValid
}
