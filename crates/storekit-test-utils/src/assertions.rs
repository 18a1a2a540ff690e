//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for issued credentials.

use chrono::Utc;
use common::jws::decode_segment;
use serde::Deserialize;

/// Credential header structure
#[derive(Debug, Deserialize)]
struct CredentialHeader {
    pub alg: String,
    pub typ: String,
    #[serde(default)]
    pub kid: Option<String>,
}

/// Credential claims structure
#[derive(Debug, Deserialize)]
struct CredentialClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
    pub bid: String,
}

/// Custom assertions for issued credential tokens
///
/// # Example
/// ```rust,ignore
/// credential
///     .token()
///     .assert_valid_jws()
///     .assert_signed_by(TEST_KEY_ID)
///     .assert_for_bundle(TEST_BUNDLE_ID);
/// ```
pub trait TokenAssertions {
    /// Assert that the token is a compact JWS with an ES256 `JWT` header
    fn assert_valid_jws(&self) -> &Self;

    /// Assert that the header names the specified key
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert that the token was issued by the specified issuer
    fn assert_issued_by(&self, issuer_id: &str) -> &Self;

    /// Assert that the token carries the specified bundle ID
    fn assert_for_bundle(&self, bundle_id: &str) -> &Self;

    /// Assert that the token is for the specified audience
    fn assert_audience(&self, audience: &str) -> &Self;

    /// Assert that the token expires within the specified seconds from now
    fn assert_expires_in(&self, seconds: i64) -> &Self;
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("token has no segment {index}"));
    decode_segment(part).unwrap_or_else(|e| panic!("segment {index} is not base64url: {e}"))
}

fn header(token: &str) -> CredentialHeader {
    serde_json::from_slice(&segment(token, 0)).expect("header should be credential JSON")
}

fn claims(token: &str) -> CredentialClaims {
    serde_json::from_slice(&segment(token, 1)).expect("payload should be credential claims JSON")
}

impl TokenAssertions for str {
    fn assert_valid_jws(&self) -> &Self {
        let parts: Vec<_> = self.split('.').collect();
        assert_eq!(
            parts.len(),
            3,
            "JWS must have 3 parts (header.payload.signature), got {}",
            parts.len()
        );

        let header = header(self);
        assert_eq!(header.alg, "ES256", "credential must be ES256");
        assert_eq!(header.typ, "JWT", "credential typ must be JWT");
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        assert_eq!(
            header(self).kid.as_deref(),
            Some(key_id),
            "credential should name key {key_id}"
        );
        self
    }

    fn assert_issued_by(&self, issuer_id: &str) -> &Self {
        assert_eq!(claims(self).iss, issuer_id);
        self
    }

    fn assert_for_bundle(&self, bundle_id: &str) -> &Self {
        assert_eq!(claims(self).bid, bundle_id);
        self
    }

    fn assert_audience(&self, audience: &str) -> &Self {
        assert_eq!(claims(self).aud, audience);
        self
    }

    fn assert_expires_in(&self, seconds: i64) -> &Self {
        let claims = claims(self);
        let now = Utc::now().timestamp();
        assert!(
            claims.exp > now,
            "credential already expired (exp {}, now {now})",
            claims.exp
        );
        assert!(
            claims.exp - now <= seconds,
            "credential expires in {}s, expected at most {seconds}s",
            claims.exp - now
        );
        assert!(claims.iat <= now, "credential issued in the future");
        self
    }
}
