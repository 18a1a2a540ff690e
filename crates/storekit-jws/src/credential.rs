//! App Store Server API credential issuer.
//!
//! Signs short-lived ES256 bearer tokens and caches the current one. Cache
//! hits take only the read lock. On a miss the write lock is taken and the
//! cache re-checked, so concurrent cold callers produce a single signing
//! operation and all of them observe the same credential.

use crate::clock::{Clock, SystemClock};
use crate::config::IssuerConfig;
use crate::errors::JwsError;
use crate::observability::{record_credential_cache, record_credential_issuance};
use chrono::{DateTime, Utc};
use common::jws::decode_pem_body;
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::instrument;

/// `aud` of every App Store Server API credential.
pub const AUDIENCE: &str = "appstoreconnect-v1";

/// Lifetime of an issued credential. Apple rejects tokens valid for more
/// than an hour.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(55 * 60);

const TOKEN_LIFETIME_SECS: i64 = 55 * 60;

/// Claims of an issued credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
    pub bid: String,
}

/// A signed credential and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct Credential {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// The compact token.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Valid while the expiry is strictly after `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// `Authorization` header value for API requests.
    #[must_use]
    pub fn authorization_header(&self) -> SecretString {
        SecretString::from(format!("Bearer {}", self.token.expose_secret()))
    }
}

/// Issues and caches credentials for one App Store Connect key.
pub struct CredentialIssuer {
    config: IssuerConfig,
    encoding_key: EncodingKey,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<Credential>>,
    issued: AtomicU64,
}

// Custom Debug to keep key material out of logs
impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("config", &self.config)
            .field("issued", &self.issued_count())
            .finish_non_exhaustive()
    }
}

impl CredentialIssuer {
    /// Build an issuer, loading the private key from `config`.
    ///
    /// # Errors
    ///
    /// Returns `JwsError::Configuration` if the key is not a PKCS#8 PEM EC
    /// P-256 key. This is not retryable.
    pub fn new(config: IssuerConfig) -> Result<Self, JwsError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build an issuer that reads time from `clock`.
    ///
    /// # Errors
    ///
    /// Same as [`CredentialIssuer::new`].
    pub fn with_clock(config: IssuerConfig, clock: Arc<dyn Clock>) -> Result<Self, JwsError> {
        let encoding_key = load_signing_key(&config.private_key)?;

        tracing::debug!(
            target: "storekit.jws.credential",
            key_id = %config.key_id,
            "Credential signing key loaded"
        );

        Ok(Self {
            config,
            encoding_key,
            clock,
            cache: RwLock::new(None),
            issued: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Return the cached credential, signing a new one if it is missing or
    /// expired.
    ///
    /// # Errors
    ///
    /// Returns `JwsError::Signing` if signing fails; the cache is left as it
    /// was and the call may be retried.
    #[instrument(skip_all)]
    pub fn get(&self) -> Result<Credential, JwsError> {
        // Fast path: shared lock only
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(credential) = cache.as_ref() {
                if credential.is_valid_at(self.clock.now()) {
                    record_credential_cache("hit");
                    return Ok(credential.clone());
                }
            }
        }

        record_credential_cache("miss");

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have signed while we waited for the lock
        let now = self.clock.now();
        if let Some(credential) = cache.as_ref() {
            if credential.is_valid_at(now) {
                tracing::debug!(
                    target: "storekit.jws.credential",
                    "Credential refreshed by concurrent caller"
                );
                return Ok(credential.clone());
            }
        }

        let credential = self.sign(now)?;
        *cache = Some(credential.clone());

        Ok(credential)
    }

    /// Drop the cached credential so the next `get` signs a new one.
    pub fn invalidate(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = None;
        tracing::debug!(target: "storekit.jws.credential", "Credential cache invalidated");
    }

    /// Number of completed signing operations.
    #[must_use]
    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    fn sign(&self, now: DateTime<Utc>) -> Result<Credential, JwsError> {
        let start = Instant::now();

        let result = self.sign_at(now);

        match &result {
            Ok(credential) => {
                record_credential_issuance("success", start.elapsed());
                self.issued.fetch_add(1, Ordering::SeqCst);
                tracing::info!(
                    target: "storekit.jws.credential",
                    key_id = %self.config.key_id,
                    expires_at = %credential.expires_at,
                    "Credential issued"
                );
            }
            Err(e) => {
                record_credential_issuance("error", start.elapsed());
                tracing::warn!(
                    target: "storekit.jws.credential",
                    key_id = %self.config.key_id,
                    error = %e,
                    "Credential signing failed"
                );
            }
        }

        result
    }

    fn sign_at(&self, now: DateTime<Utc>) -> Result<Credential, JwsError> {
        let iat = now.timestamp();
        let exp = iat + TOKEN_LIFETIME_SECS;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| JwsError::Signing("expiry out of range".to_string()))?;

        let claims = CredentialClaims {
            iss: self.config.issuer_id.clone(),
            iat,
            exp,
            aud: AUDIENCE.to_string(),
            bid: self.config.bundle_id.clone(),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.config.key_id.clone());
        header.x5c.clone_from(&self.config.certificate_chain);

        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| JwsError::Signing(format!("ES256 signing operation failed: {e}")))?;

        Ok(Credential {
            token: SecretString::from(token),
            expires_at,
        })
    }
}

/// Load a PKCS#8 PEM EC P-256 private key.
///
/// The key is parsed with ring first so SEC1, P-384 and Ed25519 keys are
/// rejected here rather than on the first signing attempt.
fn load_signing_key(pem: &SecretString) -> Result<EncodingKey, JwsError> {
    let der = decode_pem_body(pem.expose_secret(), "PRIVATE KEY")
        .map_err(|e| JwsError::Configuration(format!("Invalid private key: {e}")))?;

    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &der, &SystemRandom::new())
        .map_err(|_| {
            JwsError::Configuration(
                "Invalid private key: not a PKCS#8 EC P-256 key".to_string(),
            )
        })?;

    Ok(EncodingKey::from_ec_der(&der))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::jws::{decode_segment, split_compact};
    use std::sync::Mutex;
    use storekit_test_utils::crypto_fixtures;

    struct SteppingClock(Mutex<DateTime<Utc>>);

    impl SteppingClock {
        fn at(now: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(now)))
        }

        fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn config_with_key(pem: String) -> IssuerConfig {
        IssuerConfig::new(
            "57246542-96fe-1a63-e053-0824d011072a",
            "2X9R4HXF34",
            "com.example.app",
            SecretString::from(pem),
        )
    }

    fn decode_json(segment: &str) -> serde_json::Value {
        serde_json::from_slice(&decode_segment(segment).unwrap()).unwrap()
    }

    #[test]
    fn test_credential_header_and_claims() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let issuer = CredentialIssuer::with_clock(
            config_with_key(crypto_fixtures::p256_private_key_pem()),
            SteppingClock::at(now),
        )
        .unwrap();

        let credential = issuer.get().unwrap();
        let parts = split_compact(credential.token()).unwrap();

        let header = decode_json(parts.header);
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["kid"], "2X9R4HXF34");
        assert_eq!(header["typ"], "JWT");
        assert!(header.get("x5c").is_none());

        let claims: CredentialClaims =
            serde_json::from_slice(&decode_segment(parts.payload).unwrap()).unwrap();
        assert_eq!(
            claims,
            CredentialClaims {
                iss: "57246542-96fe-1a63-e053-0824d011072a".to_string(),
                iat: now.timestamp(),
                exp: now.timestamp() + 3300,
                aud: "appstoreconnect-v1".to_string(),
                bid: "com.example.app".to_string(),
            }
        );
        assert_eq!(credential.expires_at(), now + chrono::Duration::minutes(55));
    }

    #[test]
    fn test_certificate_chain_is_carried_in_header() {
        let config = config_with_key(crypto_fixtures::p256_private_key_pem())
            .with_certificate_chain(vec!["bGVhZg==".to_string()]);
        let issuer = CredentialIssuer::new(config).unwrap();

        let credential = issuer.get().unwrap();
        let header = decode_json(split_compact(credential.token()).unwrap().header);
        assert_eq!(header["x5c"][0], "bGVhZg==");
    }

    #[test]
    fn test_cache_hit_returns_same_token() {
        let issuer =
            CredentialIssuer::new(config_with_key(crypto_fixtures::p256_private_key_pem())).unwrap();

        let first = issuer.get().unwrap();
        let second = issuer.get().unwrap();

        assert_eq!(first.token(), second.token());
        assert_eq!(issuer.issued_count(), 1);
    }

    #[test]
    fn test_expired_credential_is_replaced() {
        let clock = SteppingClock::at(Utc::now());
        let issuer = CredentialIssuer::with_clock(
            config_with_key(crypto_fixtures::p256_private_key_pem()),
            clock.clone(),
        )
        .unwrap();

        let first = issuer.get().unwrap();

        // Exactly at expiry the credential is no longer valid
        clock.advance(chrono::Duration::minutes(55));
        let second = issuer.get().unwrap();

        assert!(second.expires_at() > first.expires_at());
        assert_ne!(first.token(), second.token());
        assert_eq!(issuer.issued_count(), 2);
    }

    #[test]
    fn test_invalidate_forces_resign() {
        let issuer =
            CredentialIssuer::new(config_with_key(crypto_fixtures::p256_private_key_pem())).unwrap();

        issuer.get().unwrap();
        issuer.invalidate();
        issuer.get().unwrap();

        assert_eq!(issuer.issued_count(), 2);
    }

    #[test]
    fn test_authorization_header() {
        let issuer =
            CredentialIssuer::new(config_with_key(crypto_fixtures::p256_private_key_pem())).unwrap();
        let credential = issuer.get().unwrap();

        let header = credential.authorization_header();
        assert_eq!(
            header.expose_secret(),
            format!("Bearer {}", credential.token())
        );
    }

    #[test]
    fn test_rejects_unusable_keys() {
        let cases = [
            ("garbage", "not a pem".to_string()),
            ("sec1", crypto_fixtures::p256_sec1_private_key_pem()),
            ("p384", crypto_fixtures::p384_private_key_pem()),
            ("ed25519", crypto_fixtures::ed25519_private_key_pem()),
        ];

        for (name, pem) in cases {
            let err = CredentialIssuer::new(config_with_key(pem)).unwrap_err();
            assert!(
                matches!(err, JwsError::Configuration(_)),
                "{name}: expected configuration error, got {err:?}"
            );
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_debug_does_not_leak_key_or_token() {
        let pem = crypto_fixtures::p256_private_key_pem();
        let issuer = CredentialIssuer::new(config_with_key(pem.clone())).unwrap();
        let credential = issuer.get().unwrap();

        let issuer_debug = format!("{issuer:?}");
        assert!(!issuer_debug.contains(pem.lines().nth(1).unwrap()));

        let credential_debug = format!("{credential:?}");
        assert!(!credential_debug.contains(credential.token()));
    }
}
