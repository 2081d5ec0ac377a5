//! Authentication broker library.
//!
//! Resolves the credential carried by a gateway request and translates it
//! into the credential a mainframe service expects:
//!
//! - caller credentials: gateway JWTs, personal access tokens, client
//!   certificates and OIDC access tokens
//! - downstream credentials: PassTickets, SAF Identity Tokens, z/OSMF
//!   tokens and Zowe JWTs
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/broker.rs -> auth/source.rs
//!                                                      -> services/{passticket,zosmf,cache}.rs
//! pipeline.rs -> schemes/dispatch.rs -> services/broker.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - credential extraction, validation and identity mapping
//! - `schemes` - per-service authentication schemes and request commands
//! - `pipeline` - outbound request preparation for proxied calls
//! - `services` - credential issuers, access tokens, service registry and
//!   upstream clients
//! - `gateway_location` - discovered external gateway address
//! - `config` - configuration from environment
//! - `errors` - error types and message-catalog responses

pub mod auth;
pub mod config;
pub mod cookies;
pub mod errors;
pub mod gateway_location;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod routes;
pub mod schemes;
pub mod services;
