//! Caching service client.
//!
//! The caching service is a key-value store reached through the gateway at
//! `{gateway}/cachingservice/api/v1`. It holds the access-token records, the
//! revocation rule maps and the hash salt. Every request names the broker's
//! namespace in `X-CS-Service-ID`.

use crate::gateway_location::{GatewayLocation, GatewayLocationError};
use crate::services::http::send_with_retry;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Header naming the caller's namespace in the caching service.
pub const SERVICE_ID_HEADER: &str = "X-CS-Service-ID";

const CACHE_API_PATH: &str = "/cachingservice/api/v1";

/// Stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// All rule maps, keyed by map name.
pub type CacheMaps = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Gateway location is not resolved")]
    GatewayNotResolved,

    #[error("Key not found")]
    NotFound,

    #[error("Caching service returned status {0}")]
    Status(u16),

    #[error("Caching service request failed: {0}")]
    Transport(String),

    #[error("Caching service response could not be parsed: {0}")]
    InvalidResponse(String),
}

impl From<GatewayLocationError> for CacheError {
    fn from(_: GatewayLocationError) -> Self {
        CacheError::GatewayNotResolved
    }
}

/// Key-value operations the broker needs from the caching service.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn create(&self, entry: KeyValue) -> Result<(), CacheError>;

    async fn read(&self, key: &str) -> Result<KeyValue, CacheError>;

    async fn update(&self, entry: KeyValue) -> Result<(), CacheError>;

    /// `NotFound` when the key does not exist.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Add `entry` to the map stored under `map_key`.
    async fn append_list(&self, map_key: &str, entry: KeyValue) -> Result<(), CacheError>;

    async fn read_all_maps(&self) -> Result<CacheMaps, CacheError>;

    /// Drop stale rules from the map stored under `map_key`.
    async fn evict_rules(&self, map_key: &str) -> Result<(), CacheError>;
}

/// HTTP implementation of `CacheStore`.
pub struct CachingServiceClient {
    http_client: Client,
    gateway: Arc<GatewayLocation>,
    namespace: String,
}

impl CachingServiceClient {
    pub fn new(http_client: Client, gateway: Arc<GatewayLocation>, namespace: String) -> Self {
        Self {
            http_client,
            gateway,
            namespace,
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, CacheError> {
        let base = self.gateway.get()?.url();
        Ok(self
            .http_client
            .request(method, format!("{}{}{}", base, CACHE_API_PATH, path))
            .header(SERVICE_ID_HEADER, &self.namespace))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, CacheError> {
        let response = send_with_retry("cache", request).await.map_err(|e| {
            tracing::warn!(target: "broker.services.cache", error = %e, "Caching service unreachable");
            CacheError::Transport(e.to_string())
        })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(CacheError::NotFound),
            status => {
                tracing::warn!(
                    target: "broker.services.cache",
                    status = %status,
                    "Caching service returned error"
                );
                Err(CacheError::Status(status.as_u16()))
            }
        }
    }
}

#[async_trait]
impl CacheStore for CachingServiceClient {
    #[instrument(skip_all)]
    async fn create(&self, entry: KeyValue) -> Result<(), CacheError> {
        let request = self.request(Method::POST, "/cache")?.json(&entry);
        self.execute(request).await.map(|_| ())
    }

    #[instrument(skip_all)]
    async fn read(&self, key: &str) -> Result<KeyValue, CacheError> {
        let request = self.request(Method::GET, &format!("/cache/{}", key))?;
        let response = self.execute(request).await?;
        response
            .json()
            .await
            .map_err(|e| CacheError::InvalidResponse(e.to_string()))
    }

    #[instrument(skip_all)]
    async fn update(&self, entry: KeyValue) -> Result<(), CacheError> {
        let request = self.request(Method::PUT, "/cache")?.json(&entry);
        self.execute(request).await.map(|_| ())
    }

    #[instrument(skip_all)]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let request = self.request(Method::DELETE, &format!("/cache/{}", key))?;
        self.execute(request).await.map(|_| ())
    }

    #[instrument(skip(self, entry))]
    async fn append_list(&self, map_key: &str, entry: KeyValue) -> Result<(), CacheError> {
        let request = self
            .request(Method::POST, &format!("/cache-list/{}", map_key))?
            .json(&entry);
        self.execute(request).await.map(|_| ())
    }

    #[instrument(skip_all)]
    async fn read_all_maps(&self) -> Result<CacheMaps, CacheError> {
        let request = self.request(Method::GET, "/cache-list")?;
        let response = self.execute(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| CacheError::InvalidResponse(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(CacheMaps::new());
        }
        serde_json::from_str(&body).map_err(|e| CacheError::InvalidResponse(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn evict_rules(&self, map_key: &str) -> Result<(), CacheError> {
        let request =
            self.request(Method::DELETE, &format!("/cache-list/evict/rules/{}", map_key))?;
        self.execute(request).await.map(|_| ())
    }
}

/// In-memory `CacheStore` for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryCacheStore {
        entries: Mutex<HashMap<String, String>>,
        maps: Mutex<CacheMaps>,
        unavailable: AtomicBool,
        call_count: AtomicUsize,
        evicted: Mutex<Vec<String>>,
    }

    impl InMemoryCacheStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// A store whose every call fails with a transport error.
        pub fn unavailable() -> Self {
            let store = Self::default();
            store.set_unavailable(true);
            store
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn contains_key(&self, key: &str) -> bool {
            self.entries
                .lock()
                .map(|entries| entries.contains_key(key))
                .unwrap_or(false)
        }

        pub fn len(&self) -> usize {
            self.entries.lock().map(|e| e.len()).unwrap_or(0)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Map keys passed to `evict_rules`, in call order.
        pub fn evicted(&self) -> Vec<String> {
            self.evicted.lock().map(|e| e.clone()).unwrap_or_default()
        }

        fn enter(&self) -> Result<(), CacheError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(CacheError::Transport("connection refused".to_string()));
            }
            Ok(())
        }

        fn poisoned() -> CacheError {
            CacheError::Transport("store lock poisoned".to_string())
        }
    }

    #[async_trait]
    impl CacheStore for InMemoryCacheStore {
        async fn create(&self, entry: KeyValue) -> Result<(), CacheError> {
            self.enter()?;
            let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;
            if entries.contains_key(&entry.key) {
                return Err(CacheError::Status(409));
            }
            entries.insert(entry.key, entry.value);
            Ok(())
        }

        async fn read(&self, key: &str) -> Result<KeyValue, CacheError> {
            self.enter()?;
            let entries = self.entries.lock().map_err(|_| Self::poisoned())?;
            entries
                .get(key)
                .map(|value| KeyValue::new(key, value.clone()))
                .ok_or(CacheError::NotFound)
        }

        async fn update(&self, entry: KeyValue) -> Result<(), CacheError> {
            self.enter()?;
            let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;
            match entries.get_mut(&entry.key) {
                Some(value) => {
                    *value = entry.value;
                    Ok(())
                }
                None => Err(CacheError::NotFound),
            }
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.enter()?;
            let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;
            entries.remove(key).map(|_| ()).ok_or(CacheError::NotFound)
        }

        async fn append_list(&self, map_key: &str, entry: KeyValue) -> Result<(), CacheError> {
            self.enter()?;
            let mut maps = self.maps.lock().map_err(|_| Self::poisoned())?;
            maps.entry(map_key.to_string())
                .or_default()
                .insert(entry.key, entry.value);
            Ok(())
        }

        async fn read_all_maps(&self) -> Result<CacheMaps, CacheError> {
            self.enter()?;
            let maps = self.maps.lock().map_err(|_| Self::poisoned())?;
            Ok(maps.clone())
        }

        async fn evict_rules(&self, map_key: &str) -> Result<(), CacheError> {
            self.enter()?;
            let mut evicted = self.evicted.lock().map_err(|_| Self::poisoned())?;
            evicted.push(map_key.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::gateway_location::GatewayAddress;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CachingServiceClient {
        let location = GatewayLocation::resolved(GatewayAddress::parse(&server.uri()).unwrap());
        CachingServiceClient::new(
            reqwest::Client::new(),
            Arc::new(location),
            "zaas".to_string(),
        )
    }

    #[tokio::test]
    async fn test_create_posts_key_value_with_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cachingservice/api/v1/cache"))
            .and(header(SERVICE_ID_HEADER, "zaas"))
            .and(body_json(serde_json::json!({"key": "salt", "value": "abc"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .create(KeyValue::new("salt", "abc"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_returns_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cachingservice/api/v1/cache/salt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"key": "salt", "value": "abc"})),
            )
            .mount(&server)
            .await;

        let entry = client_for(&server).read("salt").await.unwrap();

        assert_eq!(entry, KeyValue::new("salt", "abc"));
    }

    #[tokio::test]
    async fn test_delete_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/cachingservice/api/v1/cache/present"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/cachingservice/api/v1/cache/absent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/cachingservice/api/v1/cache/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = client_for(&server);

        assert_eq!(client.delete("present").await, Ok(()));
        assert_eq!(client.delete("absent").await, Err(CacheError::NotFound));
        assert_eq!(client.delete("broken").await, Err(CacheError::Status(500)));
    }

    #[tokio::test]
    async fn test_append_list_and_read_all_maps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cachingservice/api/v1/cache-list/invalidUsers"))
            .and(body_json(serde_json::json!({"key": "h", "value": "1700000000000"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cachingservice/api/v1/cache-list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "invalidUsers": {"h": "1700000000000"}
            })))
            .mount(&server)
            .await;
        let client = client_for(&server);

        client
            .append_list("invalidUsers", KeyValue::new("h", "1700000000000"))
            .await
            .unwrap();
        let maps = client.read_all_maps().await.unwrap();

        assert_eq!(
            maps.get("invalidUsers").and_then(|m| m.get("h")).map(String::as_str),
            Some("1700000000000")
        );
    }

    #[tokio::test]
    async fn test_read_all_maps_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cachingservice/api/v1/cache-list"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(client_for(&server).read_all_maps().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evict_rules_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/cachingservice/api/v1/cache-list/evict/rules/invalidScopes"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).evict_rules("invalidScopes").await.unwrap();
    }

    #[tokio::test]
    async fn test_unresolved_gateway() {
        let client = CachingServiceClient::new(
            reqwest::Client::new(),
            Arc::new(GatewayLocation::pending()),
            "zaas".to_string(),
        );

        assert_eq!(
            client.read("salt").await,
            Err(CacheError::GatewayNotResolved)
        );
    }

    #[tokio::test]
    async fn test_in_memory_store_semantics() {
        let store = mock::InMemoryCacheStore::new();

        store.create(KeyValue::new("a", "1")).await.unwrap();
        assert_eq!(
            store.create(KeyValue::new("a", "2")).await,
            Err(CacheError::Status(409))
        );
        store.update(KeyValue::new("a", "3")).await.unwrap();
        assert_eq!(store.read("a").await.unwrap().value, "3");
        store.delete("a").await.unwrap();
        assert_eq!(store.delete("a").await, Err(CacheError::NotFound));

        store.set_unavailable(true);
        assert!(matches!(
            store.read("a").await,
            Err(CacheError::Transport(_))
        ));
    }
}
