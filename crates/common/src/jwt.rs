//! JWT utilities shared by the broker and its test tooling.
//!
//! This module provides the parts of JWT handling that do not need a key:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - Key ID extraction from JWT headers
//! - Unverified issuer/token-type peeking, used only to route a bearer token
//!   to the right validator (gateway JWT vs. OIDC access token)
//! - iat validation logic
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing returned by [`peek_claims`] may be trusted for authorization;
//!   it only selects which validator verifies the token
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{extract_kid, peek_claims, validate_iat, DEFAULT_CLOCK_SKEW};
//!
//! let routing = peek_claims(token)?;
//! if routing.issuer.as_deref() == Some("APIML") {
//!     let kid = extract_kid(token)?;
//!     // ... verify signature with the key for `kid` ...
//!     validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! }
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations. Gateway tokens are typically 300-600 bytes; OIDC access tokens
/// from common providers stay below 2KB.
///
/// Per OWASP API Security Top 10 - API4:2023 (Unrestricted Resource Consumption)
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes per NIST SP 800-63B).
///
/// Tokens with `iat` (issued-at) timestamps more than this amount in the
/// future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT pre-validation.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token is missing required `kid` header.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Routing claims
// =============================================================================

/// Claims read from a JWT payload WITHOUT signature verification.
///
/// Only the fields needed to pick a validator are decoded. Never use these
/// values to make an authorization decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoutingClaims {
    /// `iss` claim, if present.
    #[serde(default, rename = "iss")]
    pub issuer: Option<String>,

    /// `token_type` claim, if present (`"PAT"` for personal access tokens).
    #[serde(default)]
    pub token_type: Option<String>,
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact JWT into its three segments after the size check.
fn segments(token: &str) -> Result<(&str, &str, &str), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) if !header.is_empty() => {
            Ok((header, payload, signature))
        }
        _ => {
            tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
            Err(JwtValidationError::MalformedToken)
        }
    }
}

fn decode_segment(segment: &str) -> Result<serde_json::Value, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT segment JSON");
        JwtValidationError::MalformedToken
    })
}

/// Returns `true` when `token` has the compact `header.payload.signature` shape.
///
/// Opaque OIDC access tokens fail this check and are routed to introspection.
#[must_use]
pub fn looks_like_jwt(token: &str) -> bool {
    segments(token)
        .and_then(|(header, _, _)| decode_segment(header))
        .is_ok()
}

/// Extract the `kid` (key ID) from a JWT header without verifying the signature.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds size limit
/// - `MalformedToken` - Token format invalid (wrong structure, bad base64, invalid JSON)
/// - `MissingKid` - Token header missing `kid` field, `kid` empty or not a string
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    let (header_part, _, _) = segments(token)?;
    let header = decode_segment(header_part)?;

    header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)
}

/// Read the routing claims of a JWT without verifying it.
///
/// # Errors
///
/// Returns `TokenTooLarge` or `MalformedToken` when the token is not a
/// decodable compact JWT.
pub fn peek_claims(token: &str) -> Result<RoutingClaims, JwtValidationError> {
    let (_, payload_part, _) = segments(token)?;
    let payload = decode_segment(payload_part)?;

    serde_json::from_value(payload).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "JWT payload has unexpected claim types");
        JwtValidationError::MalformedToken
    })
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // clock_skew is bounded by MAX_CLOCK_SKEW in every caller's config
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Decode an Ed25519 public key from a JWK `x` field (base64url, no padding).
///
/// # Errors
///
/// Returns `base64::DecodeError` if the base64url content cannot be decoded.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url)
}

// =============================================================================
// Tests
// =============================================================================
