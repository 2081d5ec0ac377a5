//! Authentication broker
//!
//! Entry point of the broker service.
//!
//! # Startup
//!
//! 1. Tracing (`LOG_FORMAT=json` for JSON output) and configuration
//! 2. Prometheus recorder
//! 3. Signing key, JWT validator and caller-credential sources
//! 4. Upstream clients for the configured collaborators
//! 5. Gateway location: static, or discovered by a background task
//! 6. Service registry file
//! 7. HTTP server with graceful shutdown

use auth_broker::auth::identity::ZssIdentityMapper;
use auth_broker::auth::issuer::JwtIssuer;
use auth_broker::auth::jwks::JwksClient;
use auth_broker::auth::jwt::JwtValidator;
use auth_broker::auth::oidc::IntrospectionClient;
use auth_broker::auth::x509::TerminatorVerified;
use auth_broker::auth::AuthSourceService;
use auth_broker::config::Config;
use auth_broker::gateway_location::{DiscoveryGatewayResolver, GatewayAddress, GatewayLocation};
use auth_broker::observability::init_metrics_recorder;
use auth_broker::pipeline::OutboundPipeline;
use auth_broker::routes::{self, AppState};
use auth_broker::schemes::SchemeDispatcher;
use auth_broker::services::cache::CachingServiceClient;
use auth_broker::services::http::build_client;
use auth_broker::services::passticket::SafRestClient;
use auth_broker::services::zosmf::ZosmfClient;
use auth_broker::services::{AccessTokenProvider, CredentialBroker, ServiceRegistry};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between gateway discovery attempts.
const GATEWAY_LOOKUP_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_broker=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting authentication broker");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        token_issuer = %config.token_issuer,
        x509_enabled = config.x509_enabled,
        oidc_enabled = config.oidc_enabled(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let http_client = build_client(Duration::from_secs(config.upstream_timeout_seconds))?;

    // Broker-issued tokens (Zowe JWTs, access tokens) verify against the
    // pinned signing key without a JWKS round trip.
    let issuer = Arc::new(JwtIssuer::from_pkcs8(
        &config.signing_key_der()?,
        &config.signing_key_id,
        &config.token_issuer,
        config.jwt_ttl_seconds,
    )?);
    let jwks_client = JwksClient::new(config.jwks_url.clone(), http_client.clone())
        .with_pinned_key(issuer.public_jwk());
    let jwt_validator = Arc::new(JwtValidator::new(
        Arc::new(jwks_client),
        config.jwt_clock_skew_seconds,
        &config.token_issuer,
    ));

    let shutdown_token = CancellationToken::new();
    let gateway = gateway_location(&config, &http_client, &shutdown_token)?;

    let cache = CachingServiceClient::new(
        http_client.clone(),
        gateway.clone(),
        config.cache_namespace.clone(),
    );
    let access_tokens = Arc::new(AccessTokenProvider::new(
        Arc::new(cache),
        issuer.clone(),
        config.access_token_max_days,
    ));

    let mut sources = AuthSourceService::new(
        jwt_validator.clone(),
        issuer.clone(),
        access_tokens.clone(),
        config.auth_cookie_name.clone(),
        config.client_cert_header.clone(),
    );
    if config.x509_enabled {
        sources = sources.with_x509(Arc::new(TerminatorVerified));
    }
    if let Some(oidc) = &config.oidc {
        let provider = IntrospectionClient::new(
            http_client.clone(),
            oidc.introspection_url.clone(),
            oidc.client_id.clone(),
            oidc.client_secret.clone(),
        );
        sources = sources.with_oidc(Arc::new(provider), oidc.registry.clone());
    }
    if let Some(url) = &config.identity_mapper_url {
        sources = sources.with_identity_mapper(Arc::new(ZssIdentityMapper::new(
            http_client.clone(),
            url.clone(),
        )));
    }
    let sources = Arc::new(sources);

    let mut broker = CredentialBroker::new(sources.clone(), config.zosmf_applid.clone());
    if let Some(url) = &config.security_service_url {
        let security = Arc::new(SafRestClient::new(
            http_client.clone(),
            url.clone(),
            config.saf_idt_expiration_minutes,
        ));
        broker = broker
            .with_pass_tickets(security.clone())
            .with_saf_idt(security);
    } else {
        warn!("SECURITY_SERVICE_URL not set, PassTicket based schemes are unavailable");
    }
    if let Some(url) = &config.zosmf_url {
        let zosmf = ZosmfClient::new(http_client.clone()).with_instance(&config.zosmf_service_id, url);
        broker = broker.with_zosmf(Arc::new(zosmf));
    }
    let broker = Arc::new(broker);
    if config.admin_users.is_empty() {
        warn!("ADMIN_USERS not set, scope revocation and rule eviction are refused for everyone");
    }

    let registry = Arc::new(ServiceRegistry::new(Arc::new(SchemeDispatcher::new(
        broker.clone(),
    ))));
    if let Some(path) = &config.service_registry_file {
        let count = registry.load_file(Path::new(path)).await.map_err(|e| {
            error!(error = %e, "Failed to load service registry");
            e
        })?;
        info!(services = count, "Service registry loaded");
    }
    let pipeline = Arc::new(OutboundPipeline::new(sources, registry.clone()));

    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        config,
        gateway,
        broker,
        access_tokens,
        jwt_validator,
        registry,
        pipeline,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Authentication broker listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown_token.cancel();
    info!("Authentication broker shutdown complete");

    Ok(())
}

/// Static gateway location, or a pending one filled in by a discovery task.
fn gateway_location(
    config: &Config,
    http_client: &reqwest::Client,
    shutdown_token: &CancellationToken,
) -> Result<Arc<GatewayLocation>, Box<dyn std::error::Error>> {
    if let Some(url) = &config.gateway_external_url {
        let address = GatewayAddress::parse(url)?;
        info!(gateway = %address, "Using configured gateway location");
        return Ok(Arc::new(GatewayLocation::resolved(address)));
    }

    let location = Arc::new(GatewayLocation::pending());
    if let Some(discovery_url) = &config.discovery_url {
        let resolver = DiscoveryGatewayResolver::new(
            discovery_url.clone(),
            config.gateway_service_id.clone(),
            http_client.clone(),
        );
        tokio::spawn(location.clone().resolve_until_found(
            Arc::new(resolver),
            GATEWAY_LOOKUP_INTERVAL,
            shutdown_token.child_token(),
        ));
        info!(discovery_url = %discovery_url, "Gateway location discovery started");
    }
    Ok(location)
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is over.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let drain_secs: u64 = std::env::var("BROKER_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (BROKER_DRAIN_SECONDS=0)");
    }
}
