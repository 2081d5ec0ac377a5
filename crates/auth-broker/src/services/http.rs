//! Shared HTTP plumbing for upstream calls.
//!
//! Every upstream client is built with an explicit request timeout and a
//! 5 second connect timeout, and sends through `send_with_retry`, which
//! retries at most once and only for connect or timeout failures.

use crate::errors::BrokerError;
use crate::observability::record_upstream_request;
use reqwest::{Client, RequestBuilder, Response};
use std::time::{Duration, Instant};
use tracing::error;

/// Connect timeout for all upstream connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the HTTP client shared by upstream clients.
///
/// # Errors
///
/// Returns `BrokerError::Internal` if the HTTP client cannot be built.
pub fn build_client(timeout: Duration) -> Result<Client, BrokerError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| {
            error!(target: "broker.services.http", error = %e, "Failed to build HTTP client");
            BrokerError::Internal
        })
}

fn is_retryable(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout()
}

/// Send a request, retrying once on connect/timeout failures.
///
/// Requests with streaming bodies cannot be cloned and are sent once.
/// The call duration is recorded under `upstream`.
pub async fn send_with_retry(
    upstream: &'static str,
    request: RequestBuilder,
) -> Result<Response, reqwest::Error> {
    let start = Instant::now();
    let retry = request.try_clone();

    let result = match request.send().await {
        Err(e) if is_retryable(&e) => match retry {
            Some(retry) => {
                tracing::warn!(
                    target: "broker.services.http",
                    upstream = upstream,
                    error = %e,
                    "Upstream call failed, retrying once"
                );
                let retried = retry.send().await;
                let outcome = if retried.is_ok() { "retried" } else { "error" };
                record_upstream_request(upstream, outcome, start.elapsed());
                return retried;
            }
            None => Err(e),
        },
        other => other,
    };

    let outcome = if result.is_ok() { "success" } else { "error" };
    record_upstream_request(upstream, outcome, start.elapsed());
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_with_retry_passes_through_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        let client = build_client(Duration::from_secs(2)).unwrap();

        let response = send_with_retry("test", client.get(format!("{}/status", server.uri())))
            .await
            .unwrap();

        // HTTP-level failures are answers, not transport errors: no retry
        assert_eq!(response.status().as_u16(), 503);
    }

    #[tokio::test]
    async fn test_send_with_retry_retries_timeout_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(2)
            .mount(&server)
            .await;
        let client = build_client(Duration::from_millis(100)).unwrap();

        let result = send_with_retry("test", client.get(format!("{}/slow", server.uri()))).await;

        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_send_with_retry_connection_refused() {
        let client = build_client(Duration::from_secs(1)).unwrap();

        // Port 9 (discard) is not listening on loopback in test environments
        let result = send_with_retry("test", client.get("http://127.0.0.1:9/none")).await;

        assert!(result.is_err());
    }
}
