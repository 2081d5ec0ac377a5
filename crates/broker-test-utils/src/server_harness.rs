//! Test server harness for E2E testing
//!
//! Provides `TestBrokerServer`, a real broker router bound to a random port.
//! The JWKS (an Ed25519 gateway key and an RS256 z/OSMF key) is served by
//! wiremock; the security service, z/OSMF,
//! the caching service and the identity collaborators are in-process mocks
//! the test can inspect.

use crate::crypto_fixtures::{TestKeypair, TestRsaKeypair};
use auth_broker::auth::identity::mock::MockIdentityMapper;
use auth_broker::auth::issuer::JwtIssuer;
use auth_broker::auth::jwks::JwksClient;
use auth_broker::auth::jwt::JwtValidator;
use auth_broker::auth::oidc::mock::MockOidcProvider;
use auth_broker::auth::x509::TerminatorVerified;
use auth_broker::auth::AuthSourceService;
use auth_broker::config::Config;
use auth_broker::gateway_location::{GatewayAddress, GatewayLocation};
use auth_broker::pipeline::OutboundPipeline;
use auth_broker::routes::{self, AppState};
use auth_broker::schemes::SchemeDispatcher;
use auth_broker::services::cache::mock::InMemoryCacheStore;
use auth_broker::services::passticket::mock::{MockPassTicketGenerator, MockSafIdtProvider};
use auth_broker::services::zosmf::mock::MockZosmfAuthenticator;
use auth_broker::services::{AccessTokenProvider, CredentialBroker, ServiceRegistry};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Key id of the gateway key served from the mocked JWKS endpoint.
pub const GATEWAY_KEY_ID: &str = "gateway-key-01";

/// Key id of the RSA key z/OSMF signs its JWTs with.
pub const ZOSMF_KEY_ID: &str = "zosmf-rsa-key";

/// Key id of the broker's own signing key.
pub const BROKER_KEY_ID: &str = "broker-test-key";

/// Service id of the mocked z/OSMF instance.
pub const ZOSMF_SERVICE_ID: &str = "ibmzosmf";

/// The only user configured in `ADMIN_USERS`.
pub const ADMIN_USER: &str = "ADMIN1";

/// Collaborators of a `TestBrokerServer`.
pub struct TestBrokerBuilder {
    pass_tickets: Arc<MockPassTicketGenerator>,
    saf_idt: Arc<MockSafIdtProvider>,
    zosmf: Arc<MockZosmfAuthenticator>,
    cache: Arc<InMemoryCacheStore>,
    identity_mapper: Option<MockIdentityMapper>,
    oidc: Option<MockOidcProvider>,
    x509: bool,
    registry_json: Option<String>,
}

impl TestBrokerBuilder {
    pub fn with_pass_tickets(mut self, generator: MockPassTicketGenerator) -> Self {
        self.pass_tickets = Arc::new(generator);
        self
    }

    pub fn with_saf_idt(mut self, provider: MockSafIdtProvider) -> Self {
        self.saf_idt = Arc::new(provider);
        self
    }

    pub fn with_zosmf(mut self, authenticator: MockZosmfAuthenticator) -> Self {
        self.zosmf = Arc::new(authenticator);
        self
    }

    pub fn with_cache(mut self, cache: InMemoryCacheStore) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    /// Accept client certificates, mapped by `mapper`.
    pub fn with_x509(mut self, mapper: MockIdentityMapper) -> Self {
        self.x509 = true;
        self.identity_mapper = Some(mapper);
        self
    }

    /// Accept OIDC tokens. Distributed ids are mapped by `mapper`.
    pub fn with_oidc(mut self, provider: MockOidcProvider, mapper: MockIdentityMapper) -> Self {
        self.oidc = Some(provider);
        self.identity_mapper = Some(mapper);
        self
    }

    /// Register the services of a registry JSON document at startup.
    pub fn with_registry(mut self, json: &str) -> Self {
        self.registry_json = Some(json.to_string());
        self
    }

    pub async fn spawn(self) -> Result<TestBrokerServer, anyhow::Error> {
        TestBrokerServer::start(self).await
    }
}

/// Test harness for spawning the broker in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_ticket() -> Result<()> {
///     let server = TestBrokerServer::spawn().await?;
///     let token = TestTokenBuilder::new().sign(server.gateway_key())?;
///
///     let response = reqwest::Client::new()
///         .post(format!("{}/gateway/zaas/ticket", server.url()))
///         .header("Cookie", format!("apimlAuthenticationToken={}", token))
///         .json(&serde_json::json!({"applicationName": "APPL1"}))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestBrokerServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    gateway_key: TestKeypair,
    zosmf_key: TestRsaKeypair,
    broker_key: TestKeypair,
    pass_tickets: Arc<MockPassTicketGenerator>,
    saf_idt: Arc<MockSafIdtProvider>,
    zosmf: Arc<MockZosmfAuthenticator>,
    cache: Arc<InMemoryCacheStore>,
    _jwks_server: MockServer,
    _handle: JoinHandle<()>,
}

impl TestBrokerServer {
    /// Broker with accepting mocks and only JWT sources enabled.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::builder().spawn().await
    }

    pub fn builder() -> TestBrokerBuilder {
        TestBrokerBuilder {
            pass_tickets: Arc::new(MockPassTicketGenerator::accepting()),
            saf_idt: Arc::new(MockSafIdtProvider::accepting()),
            zosmf: Arc::new(MockZosmfAuthenticator::jwt(ZOSMF_SERVICE_ID)),
            cache: Arc::new(InMemoryCacheStore::new()),
            identity_mapper: None,
            oidc: None,
            x509: false,
            registry_json: None,
        }
    }

    async fn start(options: TestBrokerBuilder) -> Result<Self, anyhow::Error> {
        let gateway_key = TestKeypair::from_seed(1, GATEWAY_KEY_ID)?;
        let broker_key = TestKeypair::from_seed(2, BROKER_KEY_ID)?;
        let zosmf_key = TestRsaKeypair::new(ZOSMF_KEY_ID);

        let jwks_server = MockServer::start().await;
        let jwks = serde_json::json!({ "keys": [gateway_key.jwk(), zosmf_key.jwk()] });
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .mount(&jwks_server)
            .await;

        let vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "GATEWAY_EXTERNAL_URL".to_string(),
                "https://gateway.test:10010".to_string(),
            ),
            (
                "JWKS_URL".to_string(),
                format!("{}/jwks", jwks_server.uri()),
            ),
            ("BROKER_SIGNING_KEY".to_string(), broker_key.pkcs8_base64()),
            ("BROKER_SIGNING_KEY_ID".to_string(), BROKER_KEY_ID.to_string()),
            ("ZOSMF_SERVICE_ID".to_string(), ZOSMF_SERVICE_ID.to_string()),
            ("ADMIN_USERS".to_string(), ADMIN_USER.to_string()),
        ]);
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let issuer = Arc::new(
            JwtIssuer::from_pkcs8(
                broker_key.pkcs8(),
                BROKER_KEY_ID,
                &config.token_issuer,
                config.jwt_ttl_seconds,
            )
            .map_err(|e| anyhow::anyhow!("Failed to create issuer: {}", e))?,
        );
        let jwks_client = JwksClient::new(config.jwks_url.clone(), reqwest::Client::new())
            .with_pinned_key(issuer.public_jwk());
        let jwt_validator = Arc::new(JwtValidator::new(
            Arc::new(jwks_client),
            config.jwt_clock_skew_seconds,
            &config.token_issuer,
        ));

        let gateway = Arc::new(GatewayLocation::resolved(
            GatewayAddress::parse("https://gateway.test:10010")
                .map_err(|e| anyhow::anyhow!("Invalid gateway address: {}", e))?,
        ));
        let access_tokens = Arc::new(AccessTokenProvider::new(
            options.cache.clone(),
            issuer.clone(),
            config.access_token_max_days,
        ));

        let mut sources = AuthSourceService::new(
            jwt_validator.clone(),
            issuer,
            access_tokens.clone(),
            config.auth_cookie_name.clone(),
            config.client_cert_header.clone(),
        );
        if options.x509 {
            sources = sources.with_x509(Arc::new(TerminatorVerified));
        }
        if let Some(provider) = options.oidc {
            sources = sources.with_oidc(Arc::new(provider), "ldap://test-registry".to_string());
        }
        if let Some(mapper) = options.identity_mapper {
            sources = sources.with_identity_mapper(Arc::new(mapper));
        }
        let sources = Arc::new(sources);

        let broker = Arc::new(
            CredentialBroker::new(sources.clone(), config.zosmf_applid.clone())
                .with_pass_tickets(options.pass_tickets.clone())
                .with_saf_idt(options.saf_idt.clone())
                .with_zosmf(options.zosmf.clone()),
        );
        let registry = Arc::new(ServiceRegistry::new(Arc::new(SchemeDispatcher::new(
            broker.clone(),
        ))));
        if let Some(json) = &options.registry_json {
            registry
                .load_json(json)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to load registry: {}", e))?;
        }
        let pipeline = Arc::new(OutboundPipeline::new(sources, registry.clone()));

        let state = Arc::new(AppState {
            config,
            gateway,
            broker,
            access_tokens,
            jwt_validator,
            registry,
            pipeline,
        });

        // A standalone recorder, so each test server has its own metrics
        // without touching the global recorder.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state.clone(), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            gateway_key,
            zosmf_key,
            broker_key,
            pass_tickets: options.pass_tickets,
            saf_idt: options.saf_idt,
            zosmf: options.zosmf,
            cache: options.cache,
            _jwks_server: jwks_server,
            _handle: handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Application state, for driving the outbound pipeline directly.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Key whose tokens the broker accepts as gateway JWTs.
    pub fn gateway_key(&self) -> &TestKeypair {
        &self.gateway_key
    }

    /// RS256 key whose tokens the broker accepts as z/OSMF JWTs.
    pub fn zosmf_key(&self) -> &TestRsaKeypair {
        &self.zosmf_key
    }

    /// The broker's own signing key.
    pub fn broker_key(&self) -> &TestKeypair {
        &self.broker_key
    }

    pub fn pass_tickets(&self) -> &MockPassTicketGenerator {
        &self.pass_tickets
    }

    pub fn saf_idt(&self) -> &MockSafIdtProvider {
        &self.saf_idt
    }

    pub fn zosmf(&self) -> &MockZosmfAuthenticator {
        &self.zosmf
    }

    pub fn cache(&self) -> &InMemoryCacheStore {
        &self.cache
    }

    /// `Cookie` header value carrying `token` as the gateway auth cookie.
    pub fn auth_cookie(&self, token: &str) -> String {
        format!("{}={}", self.state.config.auth_cookie_name, token)
    }
}

impl Drop for TestBrokerServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
