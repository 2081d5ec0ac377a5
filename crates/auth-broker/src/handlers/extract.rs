//! Request body extraction.
//!
//! `ApiJson` wraps axum's `Json` extractor so that a missing, mistyped or
//! malformed body is answered with a message-catalog error like every other
//! failure, instead of axum's plain-text rejection.

use crate::errors::BrokerError;
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

/// JSON request body with catalog-shaped rejections.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = BrokerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl From<JsonRejection> for BrokerError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(target: "broker.handlers.extract", status = %rejection.status(), "Request body rejected");
        BrokerError::BadRequest(rejection.body_text())
    }
}
