//! HTTP request handlers for the authentication broker.

pub mod access_token;
pub mod extract;
pub mod health;
pub mod metrics;
pub mod zaas;

pub use access_token::{
    evict_revocation_rules, generate_access_token, revoke_access_token, revoke_scope_tokens,
    revoke_user_tokens, validate_access_token,
};
pub use extract::ApiJson;
pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use zaas::{issue_saf_idt, issue_ticket, issue_zosmf_token, issue_zowe_jwt};
