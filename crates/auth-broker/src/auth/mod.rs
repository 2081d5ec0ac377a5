//! Caller authentication.
//!
//! - `source`: extraction and validation of the request credential
//! - `jwt` / `jwks`: EdDSA JWT validation against the gateway key set
//! - `issuer`: tokens signed by the broker itself
//! - `x509`, `oidc`, `identity`: certificate and OIDC sources and their
//!   mapping to mainframe users

pub mod claims;
pub mod identity;
pub mod issuer;
pub mod jwks;
pub mod jwt;
pub mod oidc;
pub mod source;
pub mod x509;

pub use claims::Claims;
pub use source::{AuthSource, AuthSourceService, AuthSourceType, JwtOrigin, Parsed};
