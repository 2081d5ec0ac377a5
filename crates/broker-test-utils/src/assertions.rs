//! Assertions on broker responses.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

/// Assertions on a message-catalog error body.
///
/// # Example
/// ```rust,ignore
/// body.assert_message_number("ZWEAG142E")
///     .assert_message_key("org.zowe.apiml.security.ticket.unknownApplication");
/// ```
pub trait MessageAssertions {
    fn assert_message_number(&self, number: &str) -> &Self;

    fn assert_message_key(&self, key: &str) -> &Self;
}

impl MessageAssertions for serde_json::Value {
    fn assert_message_number(&self, number: &str) -> &Self {
        let actual = self["messages"][0]["messageNumber"].as_str();
        assert_eq!(
            actual,
            Some(number),
            "Expected message number '{}', body was {}",
            number,
            self
        );
        assert_eq!(self["messages"][0]["messageType"], "ERROR");
        self
    }

    fn assert_message_key(&self, key: &str) -> &Self {
        let actual = self["messages"][0]["messageKey"].as_str();
        assert_eq!(actual, Some(key), "Expected message key '{}', body was {}", key, self);
        self
    }
}

/// Assertions on JWTs returned by the broker.
pub trait TokenAssertions {
    fn assert_for_subject(&self, subject: &str) -> &Self;

    fn assert_signed_by(&self, key_id: &str) -> &Self;

    fn assert_has_scope(&self, scope: &str) -> &Self;
}

fn segment(token: &str, index: usize) -> serde_json::Value {
    let parts: Vec<_> = token.split('.').collect();
    assert_eq!(parts.len(), 3, "JWT must have 3 parts, got {}", parts.len());
    let bytes = URL_SAFE_NO_PAD
        .decode(parts[index])
        .expect("JWT segment is not base64url");
    serde_json::from_slice(&bytes).expect("JWT segment is not JSON")
}

impl TokenAssertions for String {
    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = segment(self, 1);
        assert_eq!(claims["sub"], subject, "Unexpected subject in {}", claims);
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = segment(self, 0);
        assert_eq!(header["alg"], "EdDSA");
        assert_eq!(header["kid"], key_id, "Unexpected kid in {}", header);
        self
    }

    fn assert_has_scope(&self, scope: &str) -> &Self {
        let claims = segment(self, 1);
        let scopes: Vec<&str> = claims["scopes"]
            .as_array()
            .map(|s| s.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        assert!(
            scopes.contains(&scope),
            "Token does not contain scope '{}'. Available scopes: {:?}",
            scope,
            scopes
        );
        self
    }
}
