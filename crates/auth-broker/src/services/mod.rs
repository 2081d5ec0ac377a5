//! Service layer for the authentication broker.
//!
//! # Components
//!
//! - `broker` - credential issuance (PassTicket, SAF IDT, z/OSMF, Zowe JWT)
//! - `access_token` - personal access tokens and their revocation
//! - `registry` - per-service authentication configuration
//! - `cache` - caching service client
//! - `passticket` - security service client
//! - `zosmf` - z/OSMF token exchange
//! - `http` - shared upstream HTTP plumbing

pub mod access_token;
pub mod broker;
pub mod cache;
pub mod http;
pub mod passticket;
pub mod registry;
pub mod zosmf;

pub use access_token::{AccessTokenProvider, InvalidateStatus};
pub use broker::{CredentialBroker, Resolved};
pub use registry::{RegisteredService, ServiceRegistry};
