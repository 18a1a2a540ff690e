//! Adversarial tests for signed-payload verification
//!
//! Every case here must be rejected. The interesting part is which check
//! rejects it, so assertions pin the error variant.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use serde_json::{json, Value};
use storekit_jws::{ChainFailure, ChainPosition, JwsError, JwsVerifier, ParseStage};
use storekit_test_utils::*;

fn verifier(pki: &TestPki) -> JwsVerifier {
    JwsVerifier::with_trust_anchor(pki.trust_anchor())
}

// ============================================================================
// Chain substitution
// ============================================================================

/// A complete, internally consistent chain under a foreign root is rejected
/// at the anchor check.
#[test]
fn test_self_consistent_foreign_chain_rejected() -> Result<(), anyhow::Error> {
    // Arrange
    let trusted = TestPki::generate()?;
    let attacker = TestPki::generate()?;
    let token = SignedPayloadBuilder::transaction().sign(&attacker);

    // Act
    let err = verifier(&trusted).verify::<Value>(&token).unwrap_err();

    // Assert
    assert_eq!(
        err,
        JwsError::ChainValidation {
            position: ChainPosition::Root,
            failure: ChainFailure::UntrustedRoot,
        }
    );

    Ok(())
}

/// Presenting the trusted root does not help when the intermediate was not
/// issued by it.
#[test]
fn test_trusted_root_with_foreign_intermediate_rejected() -> Result<(), anyhow::Error> {
    let trusted = TestPki::generate()?;
    let attacker = TestPki::generate()?;

    let mut x5c = attacker.x5c();
    x5c[2] = trusted.x5c()[2].clone();
    let token = SignedPayloadBuilder::transaction()
        .with_x5c(x5c)
        .sign(&attacker);

    let err = verifier(&trusted).verify::<Value>(&token).unwrap_err();
    assert!(
        matches!(err, JwsError::ChainValidation { .. }),
        "expected chain rejection, got {err:?}"
    );

    Ok(())
}

/// A leaf from another PKI spliced in front of a trusted intermediate fails
/// the leaf link.
#[test]
fn test_foreign_leaf_under_trusted_intermediate_rejected() -> Result<(), anyhow::Error> {
    let trusted = TestPki::generate()?;
    let attacker = TestPki::generate()?;

    let mut x5c = trusted.x5c();
    x5c[0] = attacker.x5c()[0].clone();
    let token = SignedPayloadBuilder::transaction()
        .with_x5c(x5c)
        .sign(&attacker);

    let err = verifier(&trusted).verify::<Value>(&token).unwrap_err();
    assert!(
        matches!(
            err,
            JwsError::ChainValidation {
                position: ChainPosition::Leaf,
                ..
            }
        ),
        "expected leaf link rejection, got {err:?}"
    );

    Ok(())
}

/// A trusted chain with a signature from some other key fails the signature
/// check, not the chain check.
#[test]
fn test_trusted_chain_signed_by_other_key_rejected() -> Result<(), anyhow::Error> {
    let trusted = TestPki::generate()?;
    let attacker = TestPki::generate()?;
    let token = SignedPayloadBuilder::transaction()
        .with_x5c(trusted.x5c())
        .sign(&attacker);

    assert_eq!(
        verifier(&trusted).verify::<Value>(&token).unwrap_err(),
        JwsError::SignatureInvalid
    );

    Ok(())
}

// ============================================================================
// Algorithm confusion
// ============================================================================

/// Headers naming anything but ES256 are refused before any key is used.
#[test]
fn test_non_es256_algorithms_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let verifier = verifier(&pki);

    for alg in ["none", "HS256", "ES384", "RS256", "es256", ""] {
        let token = SignedPayloadBuilder::transaction().with_alg(alg).sign(&pki);
        let err = verifier.verify::<Value>(&token).unwrap_err();
        assert_eq!(
            err,
            JwsError::UnsupportedAlgorithm(alg.to_string()),
            "alg {alg:?} should be refused"
        );
    }

    Ok(())
}

/// A very long `alg` is truncated in the error.
#[test]
fn test_long_algorithm_truncated_in_error() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let alg = "X".repeat(4096);
    let token = SignedPayloadBuilder::transaction().with_alg(&alg).sign(&pki);

    match verifier(&pki).verify::<Value>(&token) {
        Err(JwsError::UnsupportedAlgorithm(reported)) => assert!(reported.len() < 64),
        other => panic!("expected UnsupportedAlgorithm, got {other:?}"),
    }

    Ok(())
}

/// A P-384 leaf cannot carry an ES256 signature even under a trusted root.
#[test]
fn test_p384_leaf_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate_with_p384_leaf()?;
    let token = SignedPayloadBuilder::transaction().sign(&pki);

    let err = verifier(&pki).verify::<Value>(&token).unwrap_err();
    assert!(
        matches!(
            err,
            JwsError::Certificate {
                position: ChainPosition::Leaf,
                ..
            }
        ),
        "expected leaf key rejection, got {err:?}"
    );

    Ok(())
}

// ============================================================================
// Tampering
// ============================================================================

/// Changing one payload byte invalidates the signature.
#[test]
fn test_tampered_payload_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let token = SignedPayloadBuilder::transaction().sign(&pki);
    let verifier = verifier(&pki);
    assert!(verifier.verify::<Value>(&token).is_ok());

    let tampered = tamper_payload_byte(&token);

    assert_eq!(
        verifier.verify::<Value>(&tampered).unwrap_err(),
        JwsError::SignatureInvalid
    );

    Ok(())
}

/// Adding a header field breaks the signature because the header is part of
/// the signing input.
#[test]
fn test_rewritten_header_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let token = SignedPayloadBuilder::transaction().sign(&pki);

    let rewritten = replace_header(&token, &json!({"x5c": pki.x5c(), "alg": "ES256", "kid": "k"}));

    assert_eq!(
        verifier(&pki).verify::<Value>(&rewritten).unwrap_err(),
        JwsError::SignatureInvalid
    );

    Ok(())
}

/// A properly signed payload that is not JSON fails claims decoding.
#[test]
fn test_signed_non_json_payload_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let token = pki.sign_raw(&json!({"alg": "ES256", "x5c": pki.x5c()}), b"not json")?;

    let err = verifier(&pki).verify::<Value>(&token).unwrap_err();
    assert!(matches!(err, JwsError::ClaimsDecode(_)));
    assert!(!err.to_string().contains("not json"));

    Ok(())
}

/// A registered claim of the wrong type fails claims decoding.
#[test]
fn test_mistyped_exp_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let token = SignedPayloadBuilder::transaction()
        .with_claim("exp", "tomorrow")
        .sign(&pki);

    let err = verifier(&pki).verify::<Value>(&token).unwrap_err();
    assert!(matches!(err, JwsError::ClaimsDecode(_)));

    Ok(())
}

// ============================================================================
// Malformed input
// ============================================================================

/// Undecodable DER in the chain is reported against its position.
#[test]
fn test_bad_certificate_der_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let token = SignedPayloadBuilder::transaction().sign(&pki);
    let verifier = verifier(&pki);

    for (index, position) in [
        (0, ChainPosition::Leaf),
        (1, ChainPosition::Intermediate),
        (2, ChainPosition::Root),
    ] {
        let broken = replace_x5c_entry(&token, index, b"\x30\x03\x02\x01\x00");
        match verifier.verify::<Value>(&broken) {
            Err(JwsError::Certificate { position: p, .. }) => assert_eq!(p, position),
            other => panic!("expected Certificate error at {position}, got {other:?}"),
        }
    }

    Ok(())
}

/// Anything but three non-empty segments is a parse error.
#[test]
fn test_malformed_segments_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let token = SignedPayloadBuilder::transaction().sign(&pki);
    let verifier = verifier(&pki);

    let two = token.rsplitn(2, '.').nth(1).expect("has a dot").to_string();
    let four = format!("{token}.extra");
    let empty_signature = format!("{two}.");

    for candidate in [two.as_str(), four.as_str(), empty_signature.as_str(), "", "..."] {
        let err = verifier.verify::<Value>(candidate).unwrap_err();
        assert!(
            matches!(err, JwsError::Parse(ParseStage::Segments)),
            "expected segment error, got {err:?}"
        );
    }

    Ok(())
}

/// A chain shorter than three certificates is refused during parsing.
#[test]
fn test_short_chain_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let x5c: Vec<String> = pki.x5c().into_iter().take(2).collect();
    let token = SignedPayloadBuilder::transaction().with_x5c(x5c).sign(&pki);

    assert_eq!(
        verifier(&pki).verify::<Value>(&token).unwrap_err(),
        JwsError::Parse(ParseStage::ChainLength)
    );

    Ok(())
}

/// Oversized input is refused before decoding.
#[test]
fn test_oversized_token_rejected() -> Result<(), anyhow::Error> {
    let pki = TestPki::generate()?;
    let token = SignedPayloadBuilder::transaction()
        .with_claim("padding", "A".repeat(common::jws::MAX_JWS_SIZE_BYTES))
        .sign(&pki);

    assert_eq!(
        verifier(&pki).verify::<Value>(&token).unwrap_err(),
        JwsError::Parse(ParseStage::TooLarge)
    );

    Ok(())
}
