//! Metrics definitions for the authentication broker.
//!
//! All metrics follow Prometheus naming conventions:
//! - `broker_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: the fixed route set plus "/other"
//! - `kind`: credential kinds (passticket, safidt, zosmf, zowejwt, oidc)
//! - `source`: jwt, x509, oidc, none
//! - `upstream`: jwks, cache, security, zosmf, oidc, mapper, discovery
//! - `outcome` / `status`: small fixed sets

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return its render handle.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("broker_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Upstream calls are bounded by UPSTREAM_TIMEOUT_SECONDS (max 60s)
        .set_buckets_for_metric(
            Matcher::Prefix("broker_upstream_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
                30.000,
            ],
        )
        .map_err(|e| format!("Failed to set upstream request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `broker_http_requests_total`, `broker_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
///
/// This captures ALL HTTP responses including framework-level errors like
/// 404, 405 and 415.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("broker_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("broker_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path onto the fixed route set.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/gateway/zaas/ticket" => "/gateway/zaas/ticket",
        "/gateway/zaas/zosmf" => "/gateway/zaas/zosmf",
        "/gateway/zaas/zoweJwt" => "/gateway/zaas/zoweJwt",
        "/gateway/zaas/safIdt" => "/gateway/zaas/safIdt",
        "/gateway/auth/access-token/generate" => "/gateway/auth/access-token/generate",
        "/gateway/auth/access-token/revoke" => "/gateway/auth/access-token/revoke",
        "/gateway/auth/access-token/revoke/tokens" => "/gateway/auth/access-token/revoke/tokens",
        "/gateway/auth/access-token/revoke/tokens/scope" => {
            "/gateway/auth/access-token/revoke/tokens/scope"
        }
        "/gateway/auth/access-token/validate" => "/gateway/auth/access-token/validate",
        "/gateway/auth/access-token/evict" => "/gateway/auth/access-token/evict",
        // Unknown paths normalized to "/other" to bound cardinality
        _ => "/other",
    }
}

// ============================================================================
// Broker Metrics
// ============================================================================

/// Record a credential issuance attempt
///
/// Metric: `broker_credentials_issued_total`
/// Labels: `kind`, `outcome` (success or the error's catalog status class)
pub fn record_credential_issued(kind: &'static str, outcome: &'static str) {
    counter!("broker_credentials_issued_total",
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record the auth source seen on a request and how validation went
///
/// Metric: `broker_auth_source_total`
/// Labels: `source`, `outcome` (valid, invalid, expired, unmapped, absent)
pub fn record_auth_source(source: &'static str, outcome: &'static str) {
    counter!("broker_auth_source_total",
        "source" => source,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a call to an upstream service
///
/// Metric: `broker_upstream_request_duration_seconds`
/// Labels: `upstream`, `outcome` (success, error, retried)
pub fn record_upstream_request(upstream: &'static str, outcome: &'static str, duration: Duration) {
    histogram!("broker_upstream_request_duration_seconds",
        "upstream" => upstream,
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());
}

/// Record an access-token revocation result
///
/// Metric: `broker_access_token_revocations_total`
/// Labels: `status` (removed, not_found, status, failed)
pub fn record_access_token_revocation(status: &'static str) {
    counter!("broker_access_token_revocations_total",
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Tests
// ============================================================================
