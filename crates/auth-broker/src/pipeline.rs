//! Outbound request pipeline.
//!
//! Runs a proxied request through a fixed list of stages before it is sent
//! to the target service:
//!
//! 1. `StripBrokerHeaders` drops headers only the broker may set, so a
//!    caller cannot smuggle its own `X-SAF-Token` or certificate headers.
//! 2. `Authenticate` builds the target service's command from the
//!    request's credential and applies it.
//!
//! A stage either hands the request on or answers in its place. A request
//! without any credential is passed on unchanged.

use crate::auth::source::{AuthSource, AuthSourceService};
use crate::errors::{BrokerError, AUTH_FAILURE_HEADER};
use crate::schemes::{
    CERT_CN_HEADER, CERT_DN_HEADER, CERT_PUBLIC_HEADER, OIDC_TOKEN_HEADER, SAF_TOKEN_HEADER,
};
use crate::services::registry::ServiceRegistry;
use axum::http::{HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::instrument;

/// Headers removed from every outbound request before authentication.
pub const BROKER_CONTROLLED_HEADERS: [&str; 6] = [
    SAF_TOKEN_HEADER,
    CERT_PUBLIC_HEADER,
    CERT_DN_HEADER,
    CERT_CN_HEADER,
    OIDC_TOKEN_HEADER,
    AUTH_FAILURE_HEADER,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StripBrokerHeaders,
    Authenticate,
}

pub struct OutboundPipeline {
    sources: Arc<AuthSourceService>,
    registry: Arc<ServiceRegistry>,
    stages: Vec<Stage>,
}

impl OutboundPipeline {
    pub fn new(sources: Arc<AuthSourceService>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            sources,
            registry,
            stages: vec![Stage::StripBrokerHeaders, Stage::Authenticate],
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Prepare `request` for `service_id`.
    ///
    /// # Errors
    ///
    /// The error response to return to the caller instead of proxying.
    #[instrument(skip(self, request))]
    pub async fn process<B>(
        &self,
        service_id: &str,
        request: Request<B>,
    ) -> Result<Request<B>, Response> {
        // Credential is read before any stage touches the headers
        let source = self.sources.extract(request.headers());

        let mut request = request;
        for stage in &self.stages {
            request = match stage {
                Stage::StripBrokerHeaders => strip_broker_headers(request),
                Stage::Authenticate => {
                    self.authenticate(service_id, source.as_ref(), request)
                        .await?
                }
            };
        }
        Ok(request)
    }

    async fn authenticate<B>(
        &self,
        service_id: &str,
        source: Option<&AuthSource>,
        mut request: Request<B>,
    ) -> Result<Request<B>, Response> {
        let service = self.registry.get(service_id).await.ok_or_else(|| {
            failure_response(BrokerError::SchemeConfiguration(format!(
                "service '{}' is not registered",
                service_id
            )))
        })?;

        let command = self
            .registry
            .dispatcher()
            .create_command(&service.service_id, &service.handler, source)
            .await
            .map_err(|e| {
                tracing::info!(
                    target: "broker.pipeline",
                    service_id = %service.service_id,
                    scheme = %service.handler.scheme(),
                    error = %e,
                    "Outbound authentication failed"
                );
                failure_response(e)
            })?;

        command.apply(&mut request);
        Ok(request)
    }
}

fn strip_broker_headers<B>(mut request: Request<B>) -> Request<B> {
    for name in BROKER_CONTROLLED_HEADERS {
        request.headers_mut().remove(name);
    }
    request
}

/// Error response carrying `X-Zowe-Auth-Failure`.
fn failure_response(error: BrokerError) -> Response {
    let summary = error.auth_failure_summary();
    let mut response = error.into_response();
    if !response.headers().contains_key(AUTH_FAILURE_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&summary) {
            response.headers_mut().insert(AUTH_FAILURE_HEADER, value);
        }
    }
    response
}
