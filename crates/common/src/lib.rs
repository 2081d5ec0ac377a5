//! Utilities shared by the auth broker and its test tooling.

#![warn(clippy::pedantic)]

/// Secret types that keep tokens and tickets out of logs
pub mod secret;

/// Key-independent JWT helpers (size cap, kid/claims peeking, iat skew)
pub mod jwt;
