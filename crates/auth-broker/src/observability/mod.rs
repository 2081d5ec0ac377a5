//! Observability for the authentication broker.
//!
//! Prometheus metrics via the `metrics` facade. Every label is bounded so
//! that caller input (paths, user ids, application ids) never becomes a
//! label value.

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_access_token_revocation, record_auth_source,
    record_credential_issued, record_http_request, record_upstream_request,
};
