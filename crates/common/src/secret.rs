//! Secret types for protecting credential material from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for every value the broker must not
//! print: gateway JWTs, OIDC access tokens, PassTickets, SAF identity tokens,
//! z/OSMF session tokens and client secrets.
//!
//! `SecretString` implements `Debug` with redaction, so a struct that derives
//! `Debug` over a secret field is safe to pass to `tracing`. The value is
//! zeroized on drop, which is what keeps a one-time PassTicket from lingering
//! after it has been exchanged for an identity token.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct TicketGrant {
//!     user_id: String,
//!     ticket: SecretString,
//! }
//!
//! let grant = TicketGrant {
//!     user_id: "USER1".to_string(),
//!     ticket: SecretString::from("LZTKEEDQ"),
//! };
//!
//! assert!(!format!("{grant:?}").contains("LZTKEEDQ"));
//! assert_eq!(grant.ticket.expose_secret(), "LZTKEEDQ");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
