//! JWKS client for fetching and caching the gateway's public keys.
//!
//! Keys are fetched from the configured JWKS endpoint and cached with a TTL
//! so that key rotations are picked up. The broker's own signing key is
//! pinned into the client so tokens the broker re-issues verify without a
//! round trip.

use crate::errors::BrokerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

/// Default cache TTL in seconds (5 minutes).
const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// JSON Web Key from the JWKS endpoint.
///
/// Ed25519 (`OKP`), RSA and EC keys are understood; which fields are set
/// depends on `kty`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type: "OKP", "RSA" or "EC".
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Curve name ("Ed25519", "P-256", "P-384").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// OKP public key, or EC x coordinate (base64url encoded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// RSA modulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// Cached JWKS data with expiry time.
struct CachedJwks {
    keys: HashMap<String, Jwk>,
    expires_at: Instant,
}

/// JWKS client for fetching and caching public keys.
pub struct JwksClient {
    jwks_url: String,

    http_client: reqwest::Client,

    cache: Arc<RwLock<Option<CachedJwks>>>,

    /// Keys that never expire (the broker's own signing key).
    pinned: HashMap<String, Jwk>,

    cache_ttl: Duration,
}

impl JwksClient {
    pub fn new(jwks_url: String, http_client: reqwest::Client) -> Self {
        Self::with_ttl(
            jwks_url,
            http_client,
            Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
        )
    }

    pub fn with_ttl(jwks_url: String, http_client: reqwest::Client, cache_ttl: Duration) -> Self {
        Self {
            jwks_url,
            http_client,
            cache: Arc::new(RwLock::new(None)),
            pinned: HashMap::new(),
            cache_ttl,
        }
    }

    /// Pin a key so it is always resolvable by its `kid`.
    pub fn with_pinned_key(mut self, jwk: Jwk) -> Self {
        self.pinned.insert(jwk.kid.clone(), jwk);
        self
    }

    /// Get a JWK by key ID.
    ///
    /// Pinned keys are answered locally. Other keys come from the cache,
    /// which is refreshed when expired or when the kid is unknown.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::UpstreamUnavailable` if JWKS cannot be fetched.
    /// Returns `BrokerError::TokenNotValid` if the key ID is not found.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Jwk, BrokerError> {
        if let Some(key) = self.pinned.get(kid) {
            return Ok(key.clone());
        }

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    if let Some(key) = cached.keys.get(kid) {
                        tracing::debug!(target: "broker.auth.jwks", kid = %kid, "JWKS cache hit");
                        return Ok(key.clone());
                    }
                }
            }
        }

        // Cache miss, expiry or unknown kid (possible rotation)
        self.refresh_cache().await?;

        let cache = self.cache.read().await;
        if let Some(key) = cache.as_ref().and_then(|cached| cached.keys.get(kid)) {
            return Ok(key.clone());
        }

        tracing::warn!(target: "broker.auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
        Err(BrokerError::TokenNotValid)
    }

    #[instrument(skip(self))]
    async fn refresh_cache(&self) -> Result<(), BrokerError> {
        tracing::debug!(target: "broker.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "broker.auth.jwks", error = %e, "Failed to fetch JWKS");
                BrokerError::UpstreamUnavailable(format!("JWKS fetch failed: {}", e))
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "broker.auth.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(BrokerError::UpstreamUnavailable(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            tracing::error!(target: "broker.auth.jwks", error = %e, "Failed to parse JWKS response");
            BrokerError::UpstreamUnavailable("JWKS response could not be parsed".to_string())
        })?;

        let keys: HashMap<String, Jwk> = jwks
            .keys
            .into_iter()
            .map(|key| (key.kid.clone(), key))
            .collect();

        tracing::info!(
            target: "broker.auth.jwks",
            key_count = keys.len(),
            "JWKS cache refreshed"
        );

        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            keys,
            expires_at: Instant::now() + self.cache_ttl,
        });

        Ok(())
    }
}
