//! # Broker Test Utilities
//!
//! Shared test utilities for the authentication broker.
//!
//! This crate provides:
//! - Deterministic Ed25519 keys (`TestKeypair`)
//! - Token builders (`TestTokenBuilder`)
//! - Server test harness (`TestBrokerServer` for E2E tests)
//! - Assertions on catalog error bodies and tokens
//!
//! ## Usage
//!
//! ```rust,ignore
//! use broker_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestBrokerServer::spawn().await?;
//!     let token = TestTokenBuilder::new()
//!         .for_user("USER1")
//!         .sign(server.gateway_key())?;
//!
//!     let response = reqwest::Client::new()
//!         .post(format!("{}/gateway/zaas/zoweJwt", server.url()))
//!         .header("Cookie", server.auth_cookie(&token))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

pub use assertions::*;
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
