//! `x5c` certificate chain validation.
//!
//! A chain is accepted only when both checks pass:
//!
//! 1. **Structural**: leaf is issued by the intermediate, which is issued by
//!    the root carried in the same header.
//! 2. **Anchor**: that root is the pinned [`TrustAnchor`], either byte for byte
//!    or as a certificate the anchor itself signed.
//!
//! The structural check alone proves only that the token carries a
//! self-consistent chain, which anyone can mint. The anchor check is what ties
//! the chain to the App Store.
//!
//! Nothing is cached; every call re-validates the chain it was given.

use crate::errors::{ChainFailure, ChainPosition, JwsError};
use crate::trust_anchor::TrustAnchor;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use tracing::instrument;
use x509_parser::certificate::X509Certificate;
use x509_parser::oid_registry::{OID_EC_P256, OID_KEY_TYPE_EC_PUBLIC_KEY};
use x509_parser::prelude::{ASN1Time, FromDer};

/// Uncompressed SEC1 P-256 point taken from a validated leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafPublicKey(Vec<u8>);

impl LeafPublicKey {
    #[must_use]
    pub fn as_sec1_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The three positional certificates of an `x5c` chain.
///
/// Borrows DER owned by the validating call and is never kept past it.
pub struct CertificateChain<'a> {
    pub leaf: X509Certificate<'a>,
    pub intermediate: X509Certificate<'a>,
    pub root: X509Certificate<'a>,
}

impl<'a> CertificateChain<'a> {
    /// Parse leaf, intermediate and root from their DER encodings.
    ///
    /// # Errors
    ///
    /// Returns `JwsError::Certificate` for the first position that fails.
    pub fn from_der(
        leaf: &'a [u8],
        intermediate: &'a [u8],
        root: &'a [u8],
    ) -> Result<Self, JwsError> {
        Ok(Self {
            leaf: parse_certificate(leaf, ChainPosition::Leaf)?,
            intermediate: parse_certificate(intermediate, ChainPosition::Intermediate)?,
            root: parse_certificate(root, ChainPosition::Root)?,
        })
    }

    fn at(&self, position: ChainPosition) -> &X509Certificate<'a> {
        match position {
            ChainPosition::Leaf => &self.leaf,
            ChainPosition::Intermediate => &self.intermediate,
            ChainPosition::Root => &self.root,
        }
    }
}

/// Validate the first three `x5c` entries and return the leaf's signing key.
///
/// Entries after the root are ignored.
///
/// # Errors
///
/// - `JwsError::Certificate` - an entry is missing, not base64, not DER, or the
///   leaf key is not usable for ES256
/// - `JwsError::ChainValidation` - structural or anchor validation failed
/// - `JwsError::Configuration` - `now` cannot be expressed as a certificate time
#[instrument(skip_all)]
pub fn validate_chain(
    x5c: &[String],
    anchor: &TrustAnchor,
    now: DateTime<Utc>,
) -> Result<LeafPublicKey, JwsError> {
    let leaf_der = decode_entry(x5c, ChainPosition::Leaf)?;
    let intermediate_der = decode_entry(x5c, ChainPosition::Intermediate)?;
    let root_der = decode_entry(x5c, ChainPosition::Root)?;

    let chain = CertificateChain::from_der(&leaf_der, &intermediate_der, &root_der)?;
    let leaf_key = leaf_p256_point(&chain.leaf)?;

    let at = asn1_time_at(now.timestamp())?;

    validate_structure(&chain, at)?;
    validate_anchor(&chain.root, &root_der, anchor, at)?;

    tracing::debug!(
        target: "storekit.jws.chain",
        anchor = %anchor.fingerprint(),
        "Certificate chain validated"
    );

    Ok(leaf_key)
}

fn decode_entry(x5c: &[String], position: ChainPosition) -> Result<Vec<u8>, JwsError> {
    let entry = x5c.get(position.index()).ok_or_else(|| JwsError::Certificate {
        position,
        reason: "missing from x5c".to_string(),
    })?;

    STANDARD.decode(entry).map_err(|_| {
        tracing::debug!(target: "storekit.jws.chain", %position, "x5c entry is not valid base64");
        JwsError::Certificate {
            position,
            reason: "not valid base64".to_string(),
        }
    })
}

fn parse_certificate(der: &[u8], position: ChainPosition) -> Result<X509Certificate<'_>, JwsError> {
    match X509Certificate::from_der(der) {
        Ok((rest, cert)) if rest.is_empty() => Ok(cert),
        Ok(_) => Err(JwsError::Certificate {
            position,
            reason: "trailing data after certificate".to_string(),
        }),
        Err(e) => {
            tracing::debug!(target: "storekit.jws.chain", %position, error = %e, "Failed to parse certificate");
            Err(JwsError::Certificate {
                position,
                reason: "not a valid DER certificate".to_string(),
            })
        }
    }
}

fn leaf_p256_point(leaf: &X509Certificate<'_>) -> Result<LeafPublicKey, JwsError> {
    let spki = leaf.public_key();
    let curve = spki
        .algorithm
        .parameters
        .as_ref()
        .and_then(|p| p.as_oid().ok());

    if spki.algorithm.algorithm != OID_KEY_TYPE_EC_PUBLIC_KEY || curve.as_ref() != Some(&OID_EC_P256) {
        tracing::debug!(target: "storekit.jws.chain", "Leaf key is not an EC P-256 key");
        return Err(JwsError::Certificate {
            position: ChainPosition::Leaf,
            reason: "public key is not an EC P-256 key".to_string(),
        });
    }

    Ok(LeafPublicKey(spki.subject_public_key.data.to_vec()))
}

/// The verification clock as a certificate time. Fails only for clocks far
/// outside the years a certificate can encode.
fn asn1_time_at(secs: i64) -> Result<ASN1Time, JwsError> {
    ASN1Time::from_timestamp(secs).map_err(|_| {
        tracing::warn!(target: "storekit.jws.chain", now = secs, "Clock outside certificate time range");
        JwsError::Configuration(format!(
            "clock time {secs} is outside the range of certificate validity times"
        ))
    })
}

fn chain_error(position: ChainPosition, failure: ChainFailure) -> JwsError {
    tracing::debug!(target: "storekit.jws.chain", %position, %failure, "Certificate chain rejected");
    JwsError::ChainValidation { position, failure }
}

/// Leaf -> intermediate -> root, using only certificates from the token.
fn validate_structure(chain: &CertificateChain<'_>, at: ASN1Time) -> Result<(), JwsError> {
    let links = [
        (ChainPosition::Leaf, ChainPosition::Intermediate),
        (ChainPosition::Intermediate, ChainPosition::Root),
    ];

    for (subject_pos, issuer_pos) in links {
        let subject = chain.at(subject_pos);
        let issuer = chain.at(issuer_pos);

        if subject.issuer().as_raw() != issuer.subject().as_raw() {
            return Err(chain_error(subject_pos, ChainFailure::IssuerMismatch));
        }
        if !issuer.is_ca() {
            return Err(chain_error(issuer_pos, ChainFailure::NotCa));
        }
        if subject.verify_signature(Some(issuer.public_key())).is_err() {
            return Err(chain_error(subject_pos, ChainFailure::BadSignature));
        }
    }

    for position in [ChainPosition::Leaf, ChainPosition::Intermediate, ChainPosition::Root] {
        if !chain.at(position).validity().is_valid_at(at) {
            return Err(chain_error(position, ChainFailure::Expired));
        }
    }

    Ok(())
}

/// The chain's root must be the anchor or be signed by it.
fn validate_anchor(
    root: &X509Certificate<'_>,
    root_der: &[u8],
    anchor: &TrustAnchor,
    at: ASN1Time,
) -> Result<(), JwsError> {
    if root_der == anchor.der() {
        return Ok(());
    }

    let anchor_cert = anchor.certificate()?;

    let issued_by_anchor = root.issuer().as_raw() == anchor_cert.subject().as_raw()
        && root.verify_signature(Some(anchor_cert.public_key())).is_ok()
        && anchor_cert.validity().is_valid_at(at);

    if issued_by_anchor {
        Ok(())
    } else {
        Err(chain_error(ChainPosition::Root, ChainFailure::UntrustedRoot))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::Duration;
    use storekit_test_utils::crypto_fixtures::TestPki;

    fn anchor_for(pki: &TestPki) -> TrustAnchor {
        TrustAnchor::from_der(&pki.root_der).unwrap()
    }

    #[test]
    fn test_valid_chain_returns_leaf_point() {
        let pki = TestPki::generate().unwrap();
        let key = validate_chain(&pki.x5c(), &anchor_for(&pki), Utc::now()).unwrap();

        // Uncompressed P-256 point
        assert_eq!(key.as_sec1_bytes().len(), 65);
        assert_eq!(key.as_sec1_bytes()[0], 0x04);
    }

    #[test]
    fn test_extra_chain_entries_are_ignored() {
        let pki = TestPki::generate().unwrap();
        let mut x5c = pki.x5c();
        x5c.push("bm90IGEgY2VydA==".to_string());

        assert!(validate_chain(&x5c, &anchor_for(&pki), Utc::now()).is_ok());
    }

    #[test]
    fn test_self_consistent_chain_with_foreign_root_is_rejected() {
        let trusted = TestPki::generate().unwrap();
        let foreign = TestPki::generate().unwrap();

        let err = validate_chain(&foreign.x5c(), &anchor_for(&trusted), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            JwsError::ChainValidation {
                position: ChainPosition::Root,
                failure: ChainFailure::UntrustedRoot,
            }
        );
    }

    #[test]
    fn test_swapped_in_anchor_root_fails_structure() {
        let trusted = TestPki::generate().unwrap();
        let foreign = TestPki::generate().unwrap();

        let mut x5c = foreign.x5c();
        x5c[2] = trusted.x5c()[2].clone();

        let err = validate_chain(&x5c, &anchor_for(&trusted), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            JwsError::ChainValidation {
                position: ChainPosition::Intermediate,
                failure: ChainFailure::IssuerMismatch | ChainFailure::BadSignature,
            }
        ));
    }

    #[test]
    fn test_foreign_leaf_is_rejected() {
        let trusted = TestPki::generate().unwrap();
        let foreign = TestPki::generate().unwrap();

        let mut x5c = trusted.x5c();
        x5c[0] = foreign.x5c()[0].clone();

        let err = validate_chain(&x5c, &anchor_for(&trusted), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            JwsError::ChainValidation {
                position: ChainPosition::Leaf,
                ..
            }
        ));
    }

    #[test]
    fn test_expired_chain_is_rejected() {
        let pki = TestPki::generate().unwrap();
        let far_future = Utc::now() + Duration::days(365 * 50);

        let err = validate_chain(&pki.x5c(), &anchor_for(&pki), far_future).unwrap_err();
        assert!(matches!(
            err,
            JwsError::ChainValidation {
                failure: ChainFailure::Expired,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_base64_entry() {
        let pki = TestPki::generate().unwrap();
        let mut x5c = pki.x5c();
        x5c[1] = "***".to_string();

        let err = validate_chain(&x5c, &anchor_for(&pki), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            JwsError::Certificate {
                position: ChainPosition::Intermediate,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_der_entry() {
        let pki = TestPki::generate().unwrap();
        let mut x5c = pki.x5c();
        x5c[0] = STANDARD.encode(b"definitely not DER");

        let err = validate_chain(&x5c, &anchor_for(&pki), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            JwsError::Certificate {
                position: ChainPosition::Leaf,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_entry() {
        let pki = TestPki::generate().unwrap();
        let x5c = pki.x5c()[..2].to_vec();

        let err = validate_chain(&x5c, &anchor_for(&pki), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            JwsError::Certificate {
                position: ChainPosition::Root,
                ..
            }
        ));
    }

    #[test]
    fn test_leaf_with_p384_key_is_rejected() {
        let pki = TestPki::generate_with_p384_leaf().unwrap();

        let err = validate_chain(&pki.x5c(), &anchor_for(&pki), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            JwsError::Certificate {
                position: ChainPosition::Leaf,
                ..
            }
        ));
    }

    #[test]
    fn test_reissued_anchor_root_is_accepted() {
        let pki = TestPki::generate().unwrap();
        let reissued = pki.reissued_root_der().unwrap();
        assert_ne!(reissued, pki.root_der);

        let key = validate_chain(&pki.x5c_with_root(&reissued), &anchor_for(&pki), Utc::now());
        assert!(key.is_ok(), "re-issued root should chain to the anchor: {key:?}");
    }

    #[test]
    fn test_root_with_anchor_name_but_other_key_is_rejected() {
        let trusted = TestPki::generate().unwrap();
        let forged = TestPki::generate().unwrap();

        // Same distinguished name, different key
        let trusted_root = parse_certificate(&trusted.root_der, ChainPosition::Root).unwrap();
        let forged_root = parse_certificate(&forged.root_der, ChainPosition::Root).unwrap();
        assert_eq!(trusted_root.subject().as_raw(), forged_root.subject().as_raw());
        assert_eq!(forged_root.issuer().as_raw(), trusted_root.subject().as_raw());

        let err = validate_chain(&forged.x5c(), &anchor_for(&trusted), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            JwsError::ChainValidation {
                position: ChainPosition::Root,
                failure: ChainFailure::UntrustedRoot,
            }
        );
    }

    #[test]
    fn test_clock_outside_certificate_time_range() {
        assert!(asn1_time_at(Utc::now().timestamp()).is_ok());
        assert!(matches!(
            asn1_time_at(i64::MAX),
            Err(JwsError::Configuration(_))
        ));
    }

    #[test]
    fn test_production_anchor_rejects_test_chain() {
        let pki = TestPki::generate().unwrap();
        let anchor = TrustAnchor::apple_root_ca_g3().unwrap();

        let err = validate_chain(&pki.x5c(), anchor, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            JwsError::ChainValidation {
                position: ChainPosition::Root,
                failure: ChainFailure::UntrustedRoot,
            }
        );
    }
}
