//! HTTP middleware for the broker.
//!
//! # Components
//!
//! - `auth_source` - resolves the caller's credential for protected routes
//!   and restricts administrative routes to configured users
//! - `http_metrics` - request counters and latencies for every response

pub mod auth_source;
pub mod http_metrics;

pub use auth_source::{require_admin, require_caller, AuthState, Caller};
pub use http_metrics::http_metrics_middleware;
