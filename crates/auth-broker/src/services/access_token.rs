//! Personal access tokens.
//!
//! Access tokens are broker-signed JWTs with `token_type = "PAT"`. Each
//! issued token has an `AccessTokenRecord` in the caching service, keyed by
//! the salted SHA-512 of the token; a token without a record is revoked.
//! Bulk revocation appends rules to the `invalidUsers` and `invalidScopes`
//! maps: a token issued at or before a matching rule's timestamp is invalid.
//!
//! Every validity check reads the cache. A cache failure makes the token
//! invalid.

use crate::auth::claims::Claims;
use crate::auth::issuer::JwtIssuer;
use crate::errors::BrokerError;
use crate::observability::record_access_token_revocation;
use crate::services::cache::{CacheError, CacheMaps, CacheStore, KeyValue};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::instrument;

pub const INVALID_USERS_MAP: &str = "invalidUsers";
pub const INVALID_SCOPES_MAP: &str = "invalidScopes";

const SALT_KEY: &str = "salt";
const SALT_LENGTH: usize = 16;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Bookkeeping stored for every issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenRecord {
    pub user_id: String,
    pub token_hash: String,
    /// Seconds since the epoch.
    pub issued_at: i64,
    /// Seconds since the epoch.
    pub expires_at: i64,
    pub scopes: Vec<String>,
    pub provider: String,
}

/// Outcome of a single-token revocation, as reported by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateStatus {
    Removed,
    NotFound,
    Status(u16),
    Failed,
}

impl InvalidateStatus {
    fn label(self) -> &'static str {
        match self {
            InvalidateStatus::Removed => "removed",
            InvalidateStatus::NotFound => "not_found",
            InvalidateStatus::Status(_) => "status",
            InvalidateStatus::Failed => "failed",
        }
    }
}

pub struct AccessTokenProvider {
    cache: Arc<dyn CacheStore>,
    issuer: Arc<JwtIssuer>,
    max_ttl_seconds: i64,
    salt: OnceCell<Vec<u8>>,
}

impl AccessTokenProvider {
    pub fn new(cache: Arc<dyn CacheStore>, issuer: Arc<JwtIssuer>, max_days: u32) -> Self {
        Self {
            cache,
            issuer,
            max_ttl_seconds: i64::from(max_days) * SECONDS_PER_DAY,
            salt: OnceCell::new(),
        }
    }

    /// Issue an access token for `user_id` and record it.
    ///
    /// A non-positive or too long `ttl_seconds` is clamped to the maximum.
    #[instrument(skip_all, fields(scopes = scopes.len()))]
    pub async fn issue(
        &self,
        user_id: &str,
        ttl_seconds: i64,
        scopes: &[String],
    ) -> Result<(String, Claims), BrokerError> {
        let ttl = if ttl_seconds <= 0 || ttl_seconds > self.max_ttl_seconds {
            self.max_ttl_seconds
        } else {
            ttl_seconds
        };

        let (token, claims) = self.issuer.issue_access_token(user_id, ttl, scopes)?;
        let token_hash = self.hash(&token).await?;

        let record = AccessTokenRecord {
            user_id: user_id.to_string(),
            token_hash: token_hash.clone(),
            issued_at: claims.iat,
            expires_at: claims.exp,
            scopes: claims.scopes.clone(),
            provider: self.issuer.issuer().to_string(),
        };
        let value = serde_json::to_string(&record).map_err(|e| {
            tracing::error!(target: "broker.services.access_token", error = %e, "Failed to serialize record");
            BrokerError::Internal
        })?;

        self.cache
            .create(KeyValue::new(token_hash, value))
            .await
            .map_err(|e| {
                tracing::error!(target: "broker.services.access_token", error = %e, "Failed to store access token record");
                BrokerError::UpstreamUnavailable("caching service".to_string())
            })?;

        tracing::info!(target: "broker.services.access_token", ttl_seconds = ttl, "Access token issued");
        Ok((token, claims))
    }

    /// Revoke one token by deleting its record.
    #[instrument(skip_all)]
    pub async fn invalidate(&self, token: &str) -> InvalidateStatus {
        let status = match self.hash(token).await {
            Err(_) => InvalidateStatus::Failed,
            Ok(key) => match self.cache.delete(&key).await {
                Ok(()) => InvalidateStatus::Removed,
                Err(CacheError::NotFound) => InvalidateStatus::NotFound,
                Err(CacheError::Status(code)) => InvalidateStatus::Status(code),
                Err(e) => {
                    tracing::warn!(target: "broker.services.access_token", error = %e, "Access token revocation failed");
                    InvalidateStatus::Failed
                }
            },
        };

        record_access_token_revocation(status.label());
        status
    }

    /// Whether a signature-checked access token is still live.
    #[instrument(skip_all)]
    pub async fn is_valid(&self, token: &str, claims: &Claims) -> bool {
        let Ok(key) = self.hash(token).await else {
            return false;
        };

        let record = match self.cache.read(&key).await {
            Ok(entry) => entry,
            Err(CacheError::NotFound) => {
                tracing::debug!(target: "broker.services.access_token", "Access token has no record");
                return false;
            }
            Err(e) => {
                tracing::warn!(target: "broker.services.access_token", error = %e, "Access token check failed, rejecting");
                return false;
            }
        };

        let record: AccessTokenRecord = match serde_json::from_str(&record.value) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(target: "broker.services.access_token", error = %e, "Unreadable access token record");
                return false;
            }
        };

        if record.expires_at <= chrono::Utc::now().timestamp() {
            if let Err(e) = self.cache.delete(&key).await {
                tracing::debug!(target: "broker.services.access_token", error = %e, "Expired record not removed");
            }
            return false;
        }

        let maps = match self.cache.read_all_maps().await {
            Ok(maps) => maps,
            Err(e) => {
                tracing::warn!(target: "broker.services.access_token", error = %e, "Revocation rules unreadable, rejecting");
                return false;
            }
        };

        !self.is_revoked_by_rule(&maps, claims).await
    }

    /// Whether the token's scopes include `service_id`.
    pub fn is_valid_for_scopes(&self, claims: &Claims, service_id: &str) -> bool {
        claims.has_scope(service_id)
    }

    /// Revoke every token of `user_id` issued at or before `timestamp_ms`
    /// (milliseconds, `0` meaning now).
    #[instrument(skip_all)]
    pub async fn invalidate_all_for_user(
        &self,
        user_id: &str,
        timestamp_ms: i64,
    ) -> Result<(), BrokerError> {
        self.append_rule(INVALID_USERS_MAP, user_id, timestamp_ms)
            .await
    }

    /// Revoke every token scoped to `service_id` issued at or before
    /// `timestamp_ms` (milliseconds, `0` meaning now).
    #[instrument(skip(self))]
    pub async fn invalidate_all_for_service(
        &self,
        service_id: &str,
        timestamp_ms: i64,
    ) -> Result<(), BrokerError> {
        self.append_rule(INVALID_SCOPES_MAP, &service_id.to_lowercase(), timestamp_ms)
            .await
    }

    /// Ask the cache to drop stale revocation rules.
    pub async fn evict_non_relevant(&self) -> Result<(), BrokerError> {
        for map in [INVALID_USERS_MAP, INVALID_SCOPES_MAP] {
            self.cache.evict_rules(map).await.map_err(|e| {
                tracing::warn!(target: "broker.services.access_token", map = map, error = %e, "Rule eviction failed");
                BrokerError::UpstreamUnavailable("caching service".to_string())
            })?;
        }
        Ok(())
    }

    async fn append_rule(
        &self,
        map: &'static str,
        subject: &str,
        timestamp_ms: i64,
    ) -> Result<(), BrokerError> {
        let timestamp_ms = if timestamp_ms == 0 {
            chrono::Utc::now().timestamp_millis()
        } else {
            timestamp_ms
        };
        let key = self.hash(subject).await?;

        self.cache
            .append_list(map, KeyValue::new(key, timestamp_ms.to_string()))
            .await
            .map_err(|e| {
                tracing::warn!(target: "broker.services.access_token", map = map, error = %e, "Failed to store revocation rule");
                BrokerError::UpstreamUnavailable("caching service".to_string())
            })?;

        tracing::info!(target: "broker.services.access_token", map = map, "Revocation rule stored");
        Ok(())
    }

    async fn is_revoked_by_rule(&self, maps: &CacheMaps, claims: &Claims) -> bool {
        let issued_at_ms = claims.iat.saturating_mul(1000);
        let revoked_by = |map: &str, key: &str| {
            maps.get(map)
                .and_then(|rules| rules.get(key))
                .and_then(|ts| ts.parse::<i64>().ok())
                .is_some_and(|ts| issued_at_ms <= ts)
        };

        match self.hash(&claims.sub).await {
            Ok(user_key) if revoked_by(INVALID_USERS_MAP, &user_key) => return true,
            Ok(_) => {}
            Err(_) => return true,
        }

        for scope in &claims.scopes {
            match self.hash(&scope.to_lowercase()).await {
                Ok(scope_key) if revoked_by(INVALID_SCOPES_MAP, &scope_key) => return true,
                Ok(_) => {}
                Err(_) => return true,
            }
        }
        false
    }

    /// Salted SHA-512 of `value`, hex encoded.
    async fn hash(&self, value: &str) -> Result<String, BrokerError> {
        let salt = self.salt().await?;
        let mut hasher = Sha512::new();
        hasher.update(salt);
        hasher.update(value.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// The shared salt, created in the cache on first use.
    async fn salt(&self) -> Result<&[u8], BrokerError> {
        let salt = self
            .salt
            .get_or_try_init(|| async {
                match self.read_salt().await {
                    Ok(salt) => return Ok(salt),
                    Err(CacheError::NotFound) => {}
                    Err(e) => return Err(e),
                }

                let mut salt = vec![0u8; SALT_LENGTH];
                SystemRandom::new()
                    .fill(&mut salt)
                    .map_err(|_| CacheError::InvalidResponse("random source failed".to_string()))?;

                match self
                    .cache
                    .create(KeyValue::new(SALT_KEY, hex::encode(&salt)))
                    .await
                {
                    Ok(()) => Ok(salt),
                    // Another instance stored one first
                    Err(CacheError::Status(_)) => self.read_salt().await,
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| {
                tracing::warn!(target: "broker.services.access_token", error = %e, "Hash salt unavailable");
                BrokerError::UpstreamUnavailable("caching service".to_string())
            })?;
        Ok(salt.as_slice())
    }

    async fn read_salt(&self) -> Result<Vec<u8>, CacheError> {
        let entry = self.cache.read(SALT_KEY).await?;
        hex::decode(entry.value.trim())
            .map_err(|e| CacheError::InvalidResponse(format!("salt is not hex: {}", e)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::issuer::test_issuer;
    use crate::services::cache::mock::InMemoryCacheStore;

    fn provider() -> (AccessTokenProvider, Arc<InMemoryCacheStore>) {
        let cache = Arc::new(InMemoryCacheStore::new());
        let provider =
            AccessTokenProvider::new(cache.clone(), Arc::new(test_issuer("APIML")), 90);
        (provider, cache)
    }

    fn scopes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_issued_token_is_valid_and_record_is_hashed() {
        let (provider, cache) = provider();

        let (token, claims) = provider
            .issue("USER1", 3600, &scopes(&["gateway"]))
            .await
            .unwrap();

        assert!(provider.is_valid(&token, &claims).await);
        // salt + one record, neither keyed by the raw token
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains_key(&token));
    }

    #[tokio::test]
    async fn test_ttl_is_clamped() {
        let (provider, _) = provider();

        let (_, long) = provider.issue("USER1", 365 * 86_400, &scopes(&["a"])).await.unwrap();
        let (_, zero) = provider.issue("USER1", 0, &scopes(&["a"])).await.unwrap();

        assert_eq!(long.exp - long.iat, 90 * 86_400);
        assert_eq!(zero.exp - zero.iat, 90 * 86_400);
    }

    #[tokio::test]
    async fn test_invalidate_then_invalid() {
        let (provider, _) = provider();
        let (token, claims) = provider.issue("USER1", 3600, &scopes(&["a"])).await.unwrap();

        assert_eq!(provider.invalidate(&token).await, InvalidateStatus::Removed);
        assert!(!provider.is_valid(&token, &claims).await);
        assert_eq!(provider.invalidate(&token).await, InvalidateStatus::NotFound);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_token_is_not_found() {
        let (provider, _) = provider();

        assert_eq!(
            provider.invalidate("never-issued").await,
            InvalidateStatus::NotFound
        );
    }

    #[tokio::test]
    async fn test_expired_record_is_invalid_and_removed() {
        let (provider, cache) = provider();
        let (token, claims) = provider.issue("USER1", 3600, &scopes(&["a"])).await.unwrap();
        let key = provider.hash(&token).await.unwrap();
        let mut record: AccessTokenRecord =
            serde_json::from_str(&cache.read(&key).await.unwrap().value).unwrap();
        record.expires_at = chrono::Utc::now().timestamp() - 1;
        cache
            .update(KeyValue::new(key.clone(), serde_json::to_string(&record).unwrap()))
            .await
            .unwrap();

        assert!(!provider.is_valid(&token, &claims).await);
        assert!(!cache.contains_key(&key));
    }

    #[tokio::test]
    async fn test_cache_failure_fails_closed() {
        let (provider, cache) = provider();
        let (token, claims) = provider.issue("USER1", 3600, &scopes(&["a"])).await.unwrap();

        cache.set_unavailable(true);

        assert!(!provider.is_valid(&token, &claims).await);
        assert_eq!(provider.invalidate(&token).await, InvalidateStatus::Failed);
    }

    #[tokio::test]
    async fn test_issue_fails_when_cache_unavailable() {
        let cache = Arc::new(InMemoryCacheStore::unavailable());
        let provider = AccessTokenProvider::new(cache, Arc::new(test_issuer("APIML")), 90);

        let result = provider.issue("USER1", 3600, &scopes(&["a"])).await;

        assert!(matches!(result, Err(BrokerError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_user_rule_revokes_earlier_tokens_only() {
        let (provider, _) = provider();
        let (token, claims) = provider.issue("USER1", 3600, &scopes(&["a"])).await.unwrap();
        let (other, other_claims) =
            provider.issue("USER2", 3600, &scopes(&["a"])).await.unwrap();

        provider.invalidate_all_for_user("USER1", 0).await.unwrap();

        assert!(!provider.is_valid(&token, &claims).await);
        assert!(provider.is_valid(&other, &other_claims).await);

        // A token issued after the rule is unaffected
        let rule_ts = (claims.iat - 1) * 1000;
        let (fresh, fresh_claims) =
            provider.issue("USER3", 3600, &scopes(&["a"])).await.unwrap();
        provider.invalidate_all_for_user("USER3", rule_ts).await.unwrap();
        assert!(provider.is_valid(&fresh, &fresh_claims).await);
    }

    #[tokio::test]
    async fn test_scope_rule_revokes_tokens_for_service() {
        let (provider, _) = provider();
        let (scoped, scoped_claims) = provider
            .issue("USER1", 3600, &scopes(&["ZOSMF", "gateway"]))
            .await
            .unwrap();
        let (unscoped, unscoped_claims) =
            provider.issue("USER1", 3600, &scopes(&["gateway"])).await.unwrap();

        provider.invalidate_all_for_service("zOSMF", 0).await.unwrap();

        assert!(!provider.is_valid(&scoped, &scoped_claims).await);
        assert!(provider.is_valid(&unscoped, &unscoped_claims).await);
    }

    #[tokio::test]
    async fn test_is_valid_for_scopes_is_case_insensitive() {
        let (provider, _) = provider();
        let (_, claims) = provider
            .issue("USER1", 3600, &scopes(&["Gateway"]))
            .await
            .unwrap();

        assert!(provider.is_valid_for_scopes(&claims, "GATEWAY"));
        assert!(!provider.is_valid_for_scopes(&claims, "zosmf"));
    }

    #[tokio::test]
    async fn test_evict_targets_both_rule_maps() {
        let (provider, cache) = provider();

        provider.evict_non_relevant().await.unwrap();

        assert_eq!(
            cache.evicted(),
            vec![INVALID_USERS_MAP.to_string(), INVALID_SCOPES_MAP.to_string()]
        );
    }

    #[tokio::test]
    async fn test_salt_is_shared_between_instances() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let issuer = Arc::new(test_issuer("APIML"));
        let first = AccessTokenProvider::new(cache.clone(), issuer.clone(), 90);
        let second = AccessTokenProvider::new(cache.clone(), issuer, 90);

        let (token, claims) = first.issue("USER1", 3600, &scopes(&["a"])).await.unwrap();

        assert!(second.is_valid(&token, &claims).await);
        assert_eq!(second.invalidate(&token).await, InvalidateStatus::Removed);
    }
}
