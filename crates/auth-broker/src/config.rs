//! Authentication broker configuration.
//!
//! Configuration is loaded from environment variables. Secret material
//! (signing key, OIDC client secret) is held in `SecretString` and
//! redacted in Debug output.

use base64::{engine::general_purpose::STANDARD, Engine};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:10023";

/// Default service id of the gateway in the discovery service.
pub const DEFAULT_GATEWAY_SERVICE_ID: &str = "GATEWAY";

/// Default issuer placed in, and expected from, gateway JWTs.
pub const DEFAULT_TOKEN_ISSUER: &str = "APIML";

/// Default key id of the broker signing key.
pub const DEFAULT_SIGNING_KEY_ID: &str = "broker-key-01";

/// Default lifetime of a re-issued Zowe JWT (8 hours).
pub const DEFAULT_JWT_TTL_SECONDS: i64 = 28_800;

/// Default name of the gateway authentication cookie.
pub const DEFAULT_AUTH_COOKIE_NAME: &str = "apimlAuthenticationToken";

/// Default header carrying the forwarded client certificate.
pub const DEFAULT_CLIENT_CERT_HEADER: &str = "Client-Cert";

/// Default SAF IDT lifetime in minutes.
pub const DEFAULT_SAF_IDT_EXPIRATION_MINUTES: u32 = 10;

/// Default service id of the z/OSMF instance.
pub const DEFAULT_ZOSMF_SERVICE_ID: &str = "ibmzosmf";

/// Default z/OSMF application id used for PassTickets.
pub const DEFAULT_ZOSMF_APPLID: &str = "IZUDFLT";

/// Default caching-service namespace.
pub const DEFAULT_CACHE_NAMESPACE: &str = "zaas";

/// Default maximum access-token lifetime in days.
pub const DEFAULT_ACCESS_TOKEN_MAX_DAYS: u32 = 90;

/// Default timeout for calls to upstream services.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 10;

/// Upper bound for `UPSTREAM_TIMEOUT_SECONDS`.
pub const MAX_UPSTREAM_TIMEOUT_SECONDS: u64 = 60;

/// OIDC provider settings. Present only when OIDC is enabled.
#[derive(Clone)]
pub struct OidcConfig {
    /// Token introspection endpoint of the provider.
    pub introspection_url: String,

    pub client_id: String,

    pub client_secret: SecretString,

    /// Registry name passed to the identity mapper with the distributed id.
    pub registry: String,
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("introspection_url", &self.introspection_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Broker configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:10023").
    pub bind_address: String,

    /// Statically configured external gateway URL.
    pub gateway_external_url: Option<String>,

    /// Discovery service base URL, used when the gateway URL is not static.
    pub discovery_url: Option<String>,

    pub gateway_service_id: String,

    /// JWKS endpoint used to verify gateway JWTs.
    pub jwks_url: String,

    /// Issuer of gateway JWTs (default: "APIML").
    pub token_issuer: String,

    /// JWT clock skew tolerance in seconds for token validation.
    pub jwt_clock_skew_seconds: i64,

    /// Base64 PKCS#8 Ed25519 key used to sign broker-issued tokens.
    pub signing_key: SecretString,

    pub signing_key_id: String,

    /// Lifetime of re-issued Zowe JWTs.
    pub jwt_ttl_seconds: i64,

    pub auth_cookie_name: String,

    pub client_cert_header: String,

    pub x509_enabled: bool,

    /// OIDC settings, `None` when OIDC is disabled.
    pub oidc: Option<OidcConfig>,

    /// Identity mapper base URL. Required when X.509 or OIDC is enabled.
    pub identity_mapper_url: Option<String>,

    /// Security service (PassTicket / SAF IDT) base URL.
    pub security_service_url: Option<String>,

    pub saf_idt_expiration_minutes: u32,

    /// z/OSMF base URL. z/OSMF schemes are unsupported when unset.
    pub zosmf_url: Option<String>,

    pub zosmf_service_id: String,

    pub zosmf_applid: String,

    /// Namespace sent to the caching service as `X-CS-Service-ID`.
    pub cache_namespace: String,

    pub access_token_max_days: u32,

    pub upstream_timeout_seconds: u64,

    /// JSON file with service registration metadata.
    pub service_registry_file: Option<String>,

    /// Mainframe user ids allowed to revoke access tokens by scope and to
    /// evict revocation rules. Upper-cased; empty means nobody.
    pub admin_users: Vec<String>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("gateway_external_url", &self.gateway_external_url)
            .field("discovery_url", &self.discovery_url)
            .field("gateway_service_id", &self.gateway_service_id)
            .field("jwks_url", &self.jwks_url)
            .field("token_issuer", &self.token_issuer)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("signing_key", &"[REDACTED]")
            .field("signing_key_id", &self.signing_key_id)
            .field("jwt_ttl_seconds", &self.jwt_ttl_seconds)
            .field("auth_cookie_name", &self.auth_cookie_name)
            .field("client_cert_header", &self.client_cert_header)
            .field("x509_enabled", &self.x509_enabled)
            .field("oidc", &self.oidc)
            .field("identity_mapper_url", &self.identity_mapper_url)
            .field("security_service_url", &self.security_service_url)
            .field(
                "saf_idt_expiration_minutes",
                &self.saf_idt_expiration_minutes,
            )
            .field("zosmf_url", &self.zosmf_url)
            .field("zosmf_service_id", &self.zosmf_service_id)
            .field("zosmf_applid", &self.zosmf_applid)
            .field("cache_namespace", &self.cache_namespace)
            .field("access_token_max_days", &self.access_token_max_days)
            .field("upstream_timeout_seconds", &self.upstream_timeout_seconds)
            .field("service_registry_file", &self.service_registry_file)
            .field("admin_users", &self.admin_users)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Either GATEWAY_EXTERNAL_URL or DISCOVERY_URL must be set")]
    MissingGatewayLocation,

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid signing key configuration: {0}")]
    InvalidSigningKey(String),

    #[error("Invalid upstream timeout configuration: {0}")]
    InvalidUpstreamTimeout(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = string_or(vars, "BIND_ADDRESS", DEFAULT_BIND_ADDRESS);

        let gateway_external_url = optional(vars, "GATEWAY_EXTERNAL_URL");
        let discovery_url = optional(vars, "DISCOVERY_URL");
        if gateway_external_url.is_none() && discovery_url.is_none() {
            return Err(ConfigError::MissingGatewayLocation);
        }

        let gateway_service_id =
            string_or(vars, "GATEWAY_SERVICE_ID", DEFAULT_GATEWAY_SERVICE_ID);

        let jwks_url = required(vars, "JWKS_URL")?;
        let token_issuer = string_or(vars, "TOKEN_ISSUER", DEFAULT_TOKEN_ISSUER);

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        let signing_key = required(vars, "BROKER_SIGNING_KEY")?;
        STANDARD.decode(signing_key.trim()).map_err(|e| {
            ConfigError::InvalidSigningKey(format!(
                "BROKER_SIGNING_KEY must be base64-encoded PKCS#8: {}",
                e
            ))
        })?;
        let signing_key = SecretString::from(signing_key);

        let signing_key_id = string_or(vars, "BROKER_SIGNING_KEY_ID", DEFAULT_SIGNING_KEY_ID);

        let jwt_ttl_seconds = parse_positive(vars, "JWT_TTL_SECONDS", DEFAULT_JWT_TTL_SECONDS)?;

        let auth_cookie_name = string_or(vars, "AUTH_COOKIE_NAME", DEFAULT_AUTH_COOKIE_NAME);
        let client_cert_header =
            string_or(vars, "CLIENT_CERT_HEADER", DEFAULT_CLIENT_CERT_HEADER);

        let x509_enabled = parse_bool(vars, "X509_ENABLED")?;

        let oidc = if parse_bool(vars, "OIDC_ENABLED")? {
            Some(OidcConfig {
                introspection_url: required(vars, "OIDC_INTROSPECTION_URL")?,
                client_id: required(vars, "OIDC_CLIENT_ID")?,
                client_secret: SecretString::from(required(vars, "OIDC_CLIENT_SECRET")?),
                registry: vars.get("OIDC_REGISTRY").cloned().unwrap_or_default(),
            })
        } else {
            None
        };

        let identity_mapper_url = if x509_enabled || oidc.is_some() {
            Some(required(vars, "IDENTITY_MAPPER_URL")?)
        } else {
            optional(vars, "IDENTITY_MAPPER_URL")
        };

        let security_service_url = optional(vars, "SECURITY_SERVICE_URL");

        let saf_idt_expiration_minutes = parse_positive(
            vars,
            "SAF_IDT_EXPIRATION_MINUTES",
            DEFAULT_SAF_IDT_EXPIRATION_MINUTES,
        )?;

        let zosmf_url = optional(vars, "ZOSMF_URL");
        let zosmf_service_id = string_or(vars, "ZOSMF_SERVICE_ID", DEFAULT_ZOSMF_SERVICE_ID);
        let zosmf_applid = string_or(vars, "ZOSMF_APPLID", DEFAULT_ZOSMF_APPLID);

        let cache_namespace = string_or(vars, "CACHE_NAMESPACE", DEFAULT_CACHE_NAMESPACE);

        let access_token_max_days = parse_positive(
            vars,
            "ACCESS_TOKEN_MAX_DAYS",
            DEFAULT_ACCESS_TOKEN_MAX_DAYS,
        )?;

        let upstream_timeout_seconds =
            if let Some(value_str) = vars.get("UPSTREAM_TIMEOUT_SECONDS") {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidUpstreamTimeout(format!(
                        "UPSTREAM_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value == 0 {
                    return Err(ConfigError::InvalidUpstreamTimeout(
                        "UPSTREAM_TIMEOUT_SECONDS must be greater than 0".to_string(),
                    ));
                }

                if value > MAX_UPSTREAM_TIMEOUT_SECONDS {
                    return Err(ConfigError::InvalidUpstreamTimeout(format!(
                        "UPSTREAM_TIMEOUT_SECONDS must not exceed {} seconds, got {}",
                        MAX_UPSTREAM_TIMEOUT_SECONDS, value
                    )));
                }

                value
            } else {
                DEFAULT_UPSTREAM_TIMEOUT_SECONDS
            };

        let service_registry_file = optional(vars, "SERVICE_REGISTRY_FILE");

        let admin_users = list(vars, "ADMIN_USERS")
            .into_iter()
            .map(|user| user.to_uppercase())
            .collect();

        Ok(Config {
            bind_address,
            gateway_external_url,
            discovery_url,
            gateway_service_id,
            jwks_url,
            token_issuer,
            jwt_clock_skew_seconds,
            signing_key,
            signing_key_id,
            jwt_ttl_seconds,
            auth_cookie_name,
            client_cert_header,
            x509_enabled,
            oidc,
            identity_mapper_url,
            security_service_url,
            saf_idt_expiration_minutes,
            zosmf_url,
            zosmf_service_id,
            zosmf_applid,
            cache_namespace,
            access_token_max_days,
            upstream_timeout_seconds,
            service_registry_file,
            admin_users,
        })
    }

    /// Decoded PKCS#8 bytes of the signing key.
    ///
    /// The encoding is checked in `from_vars`, so this only fails for a
    /// `Config` built by hand.
    pub fn signing_key_der(&self) -> Result<Vec<u8>, ConfigError> {
        STANDARD
            .decode(self.signing_key.expose_secret().trim())
            .map_err(|e| ConfigError::InvalidSigningKey(e.to_string()))
    }

    pub fn oidc_enabled(&self) -> bool {
        self.oidc.is_some()
    }

    /// Whether `user_id` is a configured administrator. Mainframe user ids
    /// are case-insensitive.
    pub fn is_admin(&self, user_id: &str) -> bool {
        let user_id = user_id.trim().to_uppercase();
        !user_id.is_empty() && self.admin_users.iter().any(|admin| *admin == user_id)
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    optional(vars, name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Present and non-blank.
fn optional(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn string_or(vars: &HashMap<String, String>, name: &str, default: &str) -> String {
    optional(vars, name).unwrap_or_else(|| default.to_string())
}

/// Comma-separated values, blanks dropped.
fn list(vars: &HashMap<String, String>, name: &str) -> Vec<String> {
    vars.get(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v.is_empty() || v == "false" || v == "0" => Ok(false),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("expected true or false, got '{}'", v),
        }),
    }
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("must be a valid positive integer, got '{}': {}", value_str, e),
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    Ok(value)
}
