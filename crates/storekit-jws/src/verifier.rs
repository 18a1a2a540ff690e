//! Signed-payload verification and claims binding.
//!
//! Order of checks for every token:
//!
//! 1. Parse the compact serialization and header
//! 2. Reject any `alg` other than ES256, before touching certificates
//! 3. Validate the `x5c` chain against the trust anchor
//! 4. Verify the signature over the original `header.payload` bytes
//! 5. Decode registered and domain claims
//! 6. Enforce `exp` and `nbf`
//!
//! Verification holds no mutable state, so one verifier can be shared across
//! threads and verifying the same token twice yields the same claims.

use crate::chain::validate_chain;
use crate::claims::{RegisteredClaims, VerifiedClaims};
use crate::clock::{Clock, SystemClock};
use crate::errors::JwsError;
use crate::observability::record_verification;
use crate::token::SignedToken;
use crate::trust_anchor::TrustAnchor;
use common::jws::{clamp_clock_skew, decode_segment, validate_exp_at, validate_nbf_at, ES256};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Longest `alg` value echoed back in an error.
const MAX_REPORTED_ALG_LEN: usize = 32;

/// Verifies App Store signed payloads against a trust anchor.
#[derive(Clone)]
pub struct JwsVerifier {
    anchor: TrustAnchor,
    clock: Arc<dyn Clock>,
    leeway: Duration,
}

impl std::fmt::Debug for JwsVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwsVerifier")
            .field("anchor", &self.anchor.fingerprint())
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl JwsVerifier {
    /// Verifier pinned to Apple Root CA - G3.
    ///
    /// # Errors
    ///
    /// Returns `JwsError::Configuration` if the compiled-in anchor is unusable.
    pub fn new() -> Result<Self, JwsError> {
        Ok(Self::with_trust_anchor(
            TrustAnchor::apple_root_ca_g3()?.clone(),
        ))
    }

    /// Verifier pinned to a caller-supplied anchor.
    #[must_use]
    pub fn with_trust_anchor(anchor: TrustAnchor) -> Self {
        Self {
            anchor,
            clock: Arc::new(SystemClock),
            leeway: Duration::ZERO,
        }
    }

    /// Use `clock` for expiry and certificate validity checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Allow `exp`/`nbf` to be off by up to `leeway` (clamped to 10 minutes).
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = clamp_clock_skew(leeway);
        self
    }

    #[must_use]
    pub fn trust_anchor(&self) -> &TrustAnchor {
        &self.anchor
    }

    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Verify one signed payload and decode its claims into `T`.
    ///
    /// # Errors
    ///
    /// Any failed check aborts with the matching `JwsError`; there is no
    /// partially verified result.
    #[instrument(skip_all)]
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<VerifiedClaims<T>, JwsError> {
        let result = self.verify_token(token);

        match &result {
            Ok(_) => {
                record_verification("success", None);
                tracing::debug!(target: "storekit.jws.verifier", "Signed payload verified");
            }
            Err(e) => {
                record_verification("error", Some(e.category()));
                tracing::debug!(
                    target: "storekit.jws.verifier",
                    error_category = e.category(),
                    error = %e,
                    "Signed payload rejected"
                );
            }
        }

        result
    }

    /// Verify a batch of signed payloads, failing on the first rejection.
    ///
    /// # Errors
    ///
    /// Returns the first token's error; no claims are returned unless every
    /// token verifies.
    #[instrument(skip_all, fields(count = tokens.len()))]
    pub fn verify_all<T, S>(&self, tokens: &[S]) -> Result<Vec<VerifiedClaims<T>>, JwsError>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        tokens.iter().map(|t| self.verify(t.as_ref())).collect()
    }

    fn verify_token<T: DeserializeOwned>(&self, token: &str) -> Result<VerifiedClaims<T>, JwsError> {
        let token = SignedToken::parse(token)?;

        let alg = token.header().alg.as_str();
        if alg != ES256 {
            return Err(JwsError::UnsupportedAlgorithm(
                alg.chars().take(MAX_REPORTED_ALG_LEN).collect(),
            ));
        }

        let now = self.clock.now();
        let leaf_key = validate_chain(&token.header().x5c, &self.anchor, now)?;

        let key = DecodingKey::from_ec_der(leaf_key.as_sec1_bytes());
        let valid = jsonwebtoken::crypto::verify(
            token.signature_segment(),
            token.signing_input().as_bytes(),
            &key,
            Algorithm::ES256,
        )
        .unwrap_or(false);
        if !valid {
            return Err(JwsError::SignatureInvalid);
        }

        let payload = decode_segment(token.payload_segment())
            .map_err(|_| JwsError::ClaimsDecode("payload is not valid base64url".to_string()))?;

        let registered: RegisteredClaims = decode_claims(&payload)?;
        let claims: T = decode_claims(&payload)?;

        let now_secs = now.timestamp();
        if let Some(exp) = registered.exp {
            validate_exp_at(exp, self.leeway, now_secs)?;
        }
        if let Some(nbf) = registered.nbf {
            validate_nbf_at(nbf, self.leeway, now_secs)?;
        }

        Ok(VerifiedClaims { registered, claims })
    }
}

/// Decode JSON claims without echoing payload content in the error.
fn decode_claims<T: DeserializeOwned>(payload: &[u8]) -> Result<T, JwsError> {
    serde_json::from_slice(payload).map_err(|e| {
        JwsError::ClaimsDecode(format!(
            "payload does not match the claims shape at line {} column {}",
            e.line(),
            e.column()
        ))
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::Deserialize;
    use serde_json::json;
    use storekit_test_utils::crypto_fixtures::TestPki;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Transaction {
        #[serde(rename = "transactionId")]
        transaction_id: String,
        #[serde(rename = "bundleId")]
        bundle_id: String,
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn verifier_for(pki: &TestPki) -> JwsVerifier {
        JwsVerifier::with_trust_anchor(TrustAnchor::from_der(&pki.root_der).unwrap())
    }

    fn sign(pki: &TestPki, claims: &serde_json::Value) -> String {
        pki.sign_compact(&json!({"alg": "ES256", "x5c": pki.x5c()}), claims)
            .unwrap()
    }

    #[test]
    fn test_verify_happy_path() {
        let pki = TestPki::generate().unwrap();
        let token = sign(
            &pki,
            &json!({"transactionId": "2000000123", "bundleId": "com.example.app", "iss": "apple"}),
        );

        let verified: VerifiedClaims<Transaction> = verifier_for(&pki).verify(&token).unwrap();

        assert_eq!(verified.transaction_id, "2000000123");
        assert_eq!(verified.bundle_id, "com.example.app");
        assert_eq!(verified.registered.iss.as_deref(), Some("apple"));
    }

    #[test]
    fn test_verify_is_idempotent() {
        let pki = TestPki::generate().unwrap();
        let token = sign(&pki, &json!({"transactionId": "1", "bundleId": "b"}));
        let verifier = verifier_for(&pki);

        let first: VerifiedClaims<Transaction> = verifier.verify(&token).unwrap();
        let second: VerifiedClaims<Transaction> = verifier.verify(&token).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_alg_checked_before_chain() {
        // Garbage x5c entries would fail chain parsing if it ran first
        let pki = TestPki::generate().unwrap();
        let token = pki
            .sign_compact(
                &json!({"alg": "none", "x5c": ["a", "b", "c"]}),
                &json!({}),
            )
            .unwrap();

        let err = verifier_for(&pki).verify::<serde_json::Value>(&token).unwrap_err();
        assert_eq!(err, JwsError::UnsupportedAlgorithm("none".to_string()));
    }

    #[test]
    fn test_long_alg_is_truncated_in_error() {
        let pki = TestPki::generate().unwrap();
        let long_alg = "X".repeat(500);
        let token = pki
            .sign_compact(&json!({"alg": long_alg, "x5c": pki.x5c()}), &json!({}))
            .unwrap();

        match verifier_for(&pki).verify::<serde_json::Value>(&token) {
            Err(JwsError::UnsupportedAlgorithm(alg)) => assert_eq!(alg.len(), MAX_REPORTED_ALG_LEN),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_expired_claims_rejected() {
        let pki = TestPki::generate().unwrap();
        let now = Utc::now();
        let exp = now.timestamp() - 10;
        let token = sign(&pki, &json!({"exp": exp}));

        let verifier = verifier_for(&pki).with_clock(Arc::new(FixedClock(now)));
        let err = verifier.verify::<serde_json::Value>(&token).unwrap_err();
        assert_eq!(err, JwsError::ExpiredClaims { exp });
    }

    #[test]
    fn test_fractional_exp_is_floored() {
        let pki = TestPki::generate().unwrap();
        let now = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        let now_secs = now.timestamp();
        let verifier = verifier_for(&pki).with_clock(Arc::new(FixedClock(now)));

        #[allow(clippy::cast_precision_loss)]
        let future = sign(&pki, &json!({"exp": now_secs as f64 + 3600.5}));
        let verified: VerifiedClaims<serde_json::Value> = verifier.verify(&future).unwrap();
        assert_eq!(verified.registered.exp, Some(now_secs + 3600));

        #[allow(clippy::cast_precision_loss)]
        let past = sign(&pki, &json!({"exp": now_secs as f64 - 3600.5}));
        assert_eq!(
            verifier.verify::<serde_json::Value>(&past).unwrap_err(),
            JwsError::ExpiredClaims {
                exp: now_secs - 3601
            }
        );
    }

    #[test]
    fn test_domain_shape_checked_before_expiry() {
        let pki = TestPki::generate().unwrap();
        let token = sign(&pki, &json!({"exp": 1, "transactionId": 7}));

        let err = verifier_for(&pki).verify::<Transaction>(&token).unwrap_err();
        assert!(matches!(err, JwsError::ClaimsDecode(_)), "got {err:?}");
    }

    #[test]
    fn test_leeway_accepts_recently_expired() {
        let pki = TestPki::generate().unwrap();
        let now = Utc::now();
        let token = sign(&pki, &json!({"exp": now.timestamp() - 10}));

        let verifier = verifier_for(&pki)
            .with_clock(Arc::new(FixedClock(now)))
            .with_leeway(Duration::from_secs(30));
        assert!(verifier.verify::<serde_json::Value>(&token).is_ok());
    }

    #[test]
    fn test_leeway_is_clamped() {
        let pki = TestPki::generate().unwrap();
        let verifier = verifier_for(&pki).with_leeway(Duration::from_secs(3600));
        assert_eq!(verifier.leeway(), Duration::from_secs(600));
    }

    #[test]
    fn test_not_yet_valid_rejected() {
        let pki = TestPki::generate().unwrap();
        let now = Utc::now();
        let nbf = now.timestamp() + 120;
        let token = sign(&pki, &json!({"nbf": nbf}));

        let verifier = verifier_for(&pki).with_clock(Arc::new(FixedClock(now)));
        let err = verifier.verify::<serde_json::Value>(&token).unwrap_err();
        assert_eq!(err, JwsError::ClaimsNotYetValid { nbf });
    }

    #[test]
    fn test_clock_outside_certificate_validity_rejected() {
        let pki = TestPki::generate().unwrap();
        let token = sign(&pki, &json!({}));

        let past = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        let verifier = verifier_for(&pki).with_clock(Arc::new(FixedClock(past)));
        assert!(matches!(
            verifier.verify::<serde_json::Value>(&token),
            Err(JwsError::ChainValidation { .. })
        ));
    }

    #[test]
    fn test_domain_shape_mismatch_is_claims_decode() {
        let pki = TestPki::generate().unwrap();
        let token = sign(&pki, &json!({"transactionId": 42}));

        let err = verifier_for(&pki).verify::<Transaction>(&token).unwrap_err();
        assert!(matches!(err, JwsError::ClaimsDecode(_)));
        // Payload content is not echoed
        assert!(!err.to_string().contains("42"));
    }

    #[test]
    fn test_non_json_payload_is_claims_decode() {
        let pki = TestPki::generate().unwrap();
        let token = pki
            .sign_raw(&json!({"alg": "ES256", "x5c": pki.x5c()}), b"not json")
            .unwrap();

        let err = verifier_for(&pki).verify::<serde_json::Value>(&token).unwrap_err();
        assert!(matches!(err, JwsError::ClaimsDecode(_)));
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        let pki = TestPki::generate().unwrap();
        let other = TestPki::generate().unwrap();

        // Header carries the trusted chain, signature comes from another leaf
        let token = other
            .sign_compact(&json!({"alg": "ES256", "x5c": pki.x5c()}), &json!({}))
            .unwrap();

        let err = verifier_for(&pki).verify::<serde_json::Value>(&token).unwrap_err();
        assert_eq!(err, JwsError::SignatureInvalid);
    }

    #[test]
    fn test_verify_all_is_all_or_nothing() {
        let pki = TestPki::generate().unwrap();
        let good = sign(&pki, &json!({"transactionId": "1", "bundleId": "b"}));
        let also_good = sign(&pki, &json!({"transactionId": "2", "bundleId": "b"}));
        let verifier = verifier_for(&pki);

        let all: Vec<VerifiedClaims<Transaction>> =
            verifier.verify_all(&[good.clone(), also_good]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].transaction_id, "2");

        let err = verifier
            .verify_all::<Transaction, _>(&[good, "bad".to_string()])
            .unwrap_err();
        assert!(matches!(err, JwsError::Parse(_)));
    }

    #[test]
    fn test_debug_shows_fingerprint_only() {
        let pki = TestPki::generate().unwrap();
        let verifier = verifier_for(&pki);
        let debug = format!("{verifier:?}");
        assert!(debug.contains(&verifier.trust_anchor().fingerprint()));
    }
}
