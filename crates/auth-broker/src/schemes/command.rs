//! Outbound request mutations.

use crate::cookies;
use crate::errors::BrokerError;
use crate::schemes::AuthenticationScheme;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};

/// A single change to an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetHeader(HeaderName, HeaderValue),
    RemoveHeader(HeaderName),
    SetCookie(String, String),
    RemoveCookie(String),
}

impl Mutation {
    /// Build a header mutation, rejecting values that are not header-safe.
    pub fn set_header(name: &str, value: &str) -> Result<Self, BrokerError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| BrokerError::Internal)?;
        let mut value = HeaderValue::from_str(value).map_err(|_| {
            tracing::error!(target: "broker.schemes", header = %name, "Credential is not a valid header value");
            BrokerError::Internal
        })?;
        value.set_sensitive(true);
        Ok(Mutation::SetHeader(name, value))
    }

    pub fn remove_header(name: &str) -> Result<Self, BrokerError> {
        HeaderName::from_bytes(name.as_bytes())
            .map(Mutation::RemoveHeader)
            .map_err(|_| BrokerError::Internal)
    }

    fn apply(&self, headers: &mut HeaderMap) {
        match self {
            Mutation::SetHeader(name, value) => {
                headers.insert(name.clone(), value.clone());
            }
            Mutation::RemoveHeader(name) => {
                headers.remove(name);
            }
            Mutation::SetCookie(name, value) => cookies::set(headers, name, value),
            Mutation::RemoveCookie(name) => cookies::remove(headers, name),
        }
    }
}

/// The changes one scheme makes to one outbound request.
///
/// Built per call and never cached. Applying it twice leaves the request
/// as applying it once does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationCommand {
    scheme: AuthenticationScheme,
    mutations: Vec<Mutation>,
}

impl AuthenticationCommand {
    pub fn new(scheme: AuthenticationScheme, mutations: Vec<Mutation>) -> Self {
        Self { scheme, mutations }
    }

    /// A command that leaves the request alone.
    pub fn empty(scheme: AuthenticationScheme) -> Self {
        Self::new(scheme, Vec::new())
    }

    pub fn scheme(&self) -> AuthenticationScheme {
        self.scheme
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        for mutation in &self.mutations {
            mutation.apply(headers);
        }
    }

    pub fn apply<B>(&self, request: &mut Request<B>) {
        self.apply_headers(request.headers_mut());
    }
}
