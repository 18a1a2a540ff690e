//! Builders for signed payloads and helpers for tampering with them
//!
//! # Example
//! ```rust,ignore
//! let pki = TestPki::generate()?;
//! let token = SignedPayloadBuilder::transaction()
//!     .expires_at(now + 3600)
//!     .sign(&pki);
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use common::jws::{decode_segment, encode_segment};
use serde_json::{json, Map, Value};

use crate::crypto_fixtures::TestPki;
use crate::test_ids::{
    TEST_BUNDLE_ID, TEST_ORIGINAL_TRANSACTION_ID, TEST_PRODUCT_ID, TEST_TRANSACTION_ID_1,
};

/// Builds a signed payload shaped like an App Store signed transaction.
#[derive(Debug, Clone)]
pub struct SignedPayloadBuilder {
    alg: String,
    x5c: Option<Vec<String>>,
    claims: Map<String, Value>,
}

impl Default for SignedPayloadBuilder {
    fn default() -> Self {
        Self::transaction()
    }
}

impl SignedPayloadBuilder {
    /// Empty claims, ES256 header.
    pub fn empty() -> Self {
        Self {
            alg: "ES256".to_string(),
            x5c: None,
            claims: Map::new(),
        }
    }

    /// A transaction payload with the fixed test identifiers.
    pub fn transaction() -> Self {
        Self::empty()
            .with_claim("transactionId", TEST_TRANSACTION_ID_1)
            .with_claim("originalTransactionId", TEST_ORIGINAL_TRANSACTION_ID)
            .with_claim("bundleId", TEST_BUNDLE_ID)
            .with_claim("productId", TEST_PRODUCT_ID)
            .with_claim("type", "Auto-Renewable Subscription")
            .with_claim("environment", "Sandbox")
    }

    /// Declare `alg` in the header. The signature is still made with the
    /// leaf key.
    pub fn with_alg(mut self, alg: &str) -> Self {
        self.alg = alg.to_string();
        self
    }

    /// Put `x5c` in the header instead of the signing chain.
    pub fn with_x5c(mut self, x5c: Vec<String>) -> Self {
        self.x5c = Some(x5c);
        self
    }

    pub fn with_claim(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.claims.insert(name.to_string(), value.into());
        self
    }

    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    pub fn issued_at(self, iat: i64) -> Self {
        self.with_claim("iat", iat)
    }

    pub fn expires_at(self, exp: i64) -> Self {
        self.with_claim("exp", exp)
    }

    pub fn not_before(self, nbf: i64) -> Self {
        self.with_claim("nbf", nbf)
    }

    pub fn claims(&self) -> Value {
        Value::Object(self.claims.clone())
    }

    /// Sign with the leaf key of `pki`.
    pub fn sign(&self, pki: &TestPki) -> String {
        let x5c = self.x5c.clone().unwrap_or_else(|| pki.x5c());
        pki.sign_compact(&json!({"alg": self.alg, "x5c": x5c}), &self.claims())
            .expect("signing test payload should succeed")
    }
}

// =============================================================================
// Tampering
// =============================================================================

fn segments(token: &str) -> (String, String, String) {
    let mut parts = token.splitn(3, '.');
    let header = parts.next().expect("header segment").to_string();
    let payload = parts.next().expect("payload segment").to_string();
    let signature = parts.next().expect("signature segment").to_string();
    (header, payload, signature)
}

/// Flip one byte of the decoded payload, keeping the original signature.
pub fn tamper_payload_byte(token: &str) -> String {
    let (header, payload, signature) = segments(token);
    let mut bytes = decode_segment(&payload).expect("payload is base64url");
    let last = bytes.len() - 2;
    bytes[last] ^= 0x01;
    format!("{header}.{}.{signature}", encode_segment(&bytes))
}

/// Replace the header, keeping payload and signature.
pub fn replace_header(token: &str, header: &Value) -> String {
    let (_, payload, signature) = segments(token);
    let header = serde_json::to_vec(header).expect("header serializes");
    format!("{}.{payload}.{signature}", encode_segment(&header))
}

/// Replace one `x5c` entry with DER bytes, keeping everything else.
///
/// The signature no longer covers the header, so use this only for checks
/// that run before signature verification.
pub fn replace_x5c_entry(token: &str, index: usize, der: &[u8]) -> String {
    let (header, _, _) = segments(token);
    let mut header: Value =
        serde_json::from_slice(&decode_segment(&header).expect("header is base64url"))
            .expect("header is JSON");
    header["x5c"][index] = Value::String(STANDARD.encode(der));
    replace_header(token, &header)
}
