//! Generated PKI and key fixtures for testing
//!
//! [`TestPki`] mirrors the App Store layout: a P-384 root and intermediate
//! issuing a P-256 leaf. Every call generates fresh keys, so two `TestPki`
//! values are always mutually untrusted, which is what the anchor tests need.
//!
//! Validity windows are fixed (2020-01-01 to 2049-12-31) so expiry tests can
//! step outside them with a clock instead of waiting.

use base64::{engine::general_purpose::STANDARD, Engine};
use common::jws::encode_segment;
use common::secret::SecretString;
use jsonwebtoken::{Algorithm, EncodingKey};
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    IsCa, KeyPair, SignatureAlgorithm, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
    PKCS_ED25519,
};
use serde_json::Value;
use storekit_jws::{IssuerConfig, TrustAnchor};
use thiserror::Error;

use crate::test_ids::{TEST_BUNDLE_ID, TEST_ISSUER_ID, TEST_KEY_ID};

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Certificate generation failed: {0}")]
    Certificate(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

impl From<rcgen::Error> for FixtureError {
    fn from(e: rcgen::Error) -> Self {
        FixtureError::Certificate(e.to_string())
    }
}

pub const ROOT_COMMON_NAME: &str = "StoreKit Test Root CA - G3";
pub const INTERMEDIATE_COMMON_NAME: &str = "StoreKit Test Worldwide Developer Relations CA";
pub const LEAF_COMMON_NAME: &str = "StoreKit Test Receipt Signing";

/// A three-tier certificate chain with the leaf private key.
pub struct TestPki {
    pub root_der: Vec<u8>,
    pub intermediate_der: Vec<u8>,
    pub leaf_der: Vec<u8>,
    /// PKCS#8 PEM private key of the leaf.
    pub leaf_key_pem: String,
    leaf_alg: Algorithm,
    root_key_pem: String,
}

impl TestPki {
    /// Generate a chain with a P-256 leaf, usable for ES256.
    pub fn generate() -> Result<Self, FixtureError> {
        Self::generate_with_leaf(&PKCS_ECDSA_P256_SHA256, Algorithm::ES256)
    }

    /// Generate a chain whose leaf key is P-384, which ES256 cannot use.
    pub fn generate_with_p384_leaf() -> Result<Self, FixtureError> {
        Self::generate_with_leaf(&PKCS_ECDSA_P384_SHA384, Algorithm::ES384)
    }

    fn generate_with_leaf(
        leaf_key_alg: &'static SignatureAlgorithm,
        leaf_alg: Algorithm,
    ) -> Result<Self, FixtureError> {
        let root_key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)?;
        let root = ca_params(ROOT_COMMON_NAME)?.self_signed(&root_key)?;

        let intermediate_key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)?;
        let intermediate = ca_params(INTERMEDIATE_COMMON_NAME)?.signed_by(
            &intermediate_key,
            &root,
            &root_key,
        )?;

        let leaf_key = KeyPair::generate_for(leaf_key_alg)?;
        let leaf = leaf_params(LEAF_COMMON_NAME)?.signed_by(&leaf_key, &intermediate, &intermediate_key)?;

        Ok(Self {
            root_der: der_of(&root),
            intermediate_der: der_of(&intermediate),
            leaf_der: der_of(&leaf),
            leaf_key_pem: leaf_key.serialize_pem(),
            leaf_alg,
            root_key_pem: root_key.serialize_pem(),
        })
    }

    /// `x5c` header value: standard base64 DER, leaf first.
    pub fn x5c(&self) -> Vec<String> {
        [&self.leaf_der, &self.intermediate_der, &self.root_der]
            .iter()
            .map(|der| STANDARD.encode(der))
            .collect()
    }

    /// `x5c` with the root entry replaced by `root_der`.
    pub fn x5c_with_root(&self, root_der: &[u8]) -> Vec<String> {
        [&self.leaf_der, &self.intermediate_der]
            .iter()
            .map(|der| STANDARD.encode(der))
            .chain(std::iter::once(STANDARD.encode(root_der)))
            .collect()
    }

    /// The root re-issued with the same subject and key but a different
    /// validity window, so its DER differs from `root_der`.
    pub fn reissued_root_der(&self) -> Result<Vec<u8>, FixtureError> {
        let root_key = KeyPair::from_pem(&self.root_key_pem)?;
        let mut params = ca_params(ROOT_COMMON_NAME)?;
        params.not_before = date_time_ymd(2021, 6, 1);
        Ok(der_of(&params.self_signed(&root_key)?))
    }

    /// The root of this chain as a trust anchor.
    pub fn trust_anchor(&self) -> TrustAnchor {
        TrustAnchor::from_der(&self.root_der).expect("generated root is a valid anchor")
    }

    /// Issuer configuration signing with the leaf key and carrying this chain.
    pub fn issuer_config(&self) -> IssuerConfig {
        IssuerConfig::new(
            TEST_ISSUER_ID,
            TEST_KEY_ID,
            TEST_BUNDLE_ID,
            SecretString::from(self.leaf_key_pem.clone()),
        )
        .with_certificate_chain(self.x5c())
    }

    /// Sign `claims` under `header` with the leaf key.
    ///
    /// The header is used verbatim, so it may declare any `alg`; the signature
    /// is always made with the leaf key's own algorithm.
    pub fn sign_compact(&self, header: &Value, claims: &Value) -> Result<String, FixtureError> {
        let payload =
            serde_json::to_vec(claims).map_err(|e| FixtureError::Crypto(e.to_string()))?;
        self.sign_raw(header, &payload)
    }

    /// Sign arbitrary payload bytes under `header` with the leaf key.
    pub fn sign_raw(&self, header: &Value, payload: &[u8]) -> Result<String, FixtureError> {
        let header = serde_json::to_vec(header).map_err(|e| FixtureError::Crypto(e.to_string()))?;
        let signing_input = format!("{}.{}", encode_segment(&header), encode_segment(payload));

        let key = EncodingKey::from_ec_pem(self.leaf_key_pem.as_bytes())
            .map_err(|e| FixtureError::Crypto(e.to_string()))?;
        let signature = jsonwebtoken::crypto::sign(signing_input.as_bytes(), &key, self.leaf_alg)
            .map_err(|e| FixtureError::Crypto(e.to_string()))?;

        Ok(format!("{signing_input}.{signature}"))
    }
}

fn der_of(cert: &Certificate) -> Vec<u8> {
    cert.der().to_vec()
}

fn named_params(common_name: &str) -> Result<CertificateParams, FixtureError> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "StoreKit Test");
    dn.push(DnType::CountryName, "US");
    params.distinguished_name = dn;
    params.not_before = date_time_ymd(2020, 1, 1);
    params.not_after = date_time_ymd(2049, 12, 31);
    Ok(params)
}

fn ca_params(common_name: &str) -> Result<CertificateParams, FixtureError> {
    let mut params = named_params(common_name)?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    Ok(params)
}

fn leaf_params(common_name: &str) -> Result<CertificateParams, FixtureError> {
    let mut params = named_params(common_name)?;
    params.is_ca = IsCa::ExplicitNoCa;
    Ok(params)
}

// =============================================================================
// Standalone key fixtures
// =============================================================================

/// Fresh PKCS#8 PEM EC P-256 private key.
pub fn p256_private_key_pem() -> String {
    generate_pem(&PKCS_ECDSA_P256_SHA256)
}

/// A P-256 key whose PEM label claims SEC1 (`EC PRIVATE KEY`).
pub fn p256_sec1_private_key_pem() -> String {
    p256_private_key_pem().replace("PRIVATE KEY", "EC PRIVATE KEY")
}

/// Fresh PKCS#8 PEM EC P-384 private key.
pub fn p384_private_key_pem() -> String {
    generate_pem(&PKCS_ECDSA_P384_SHA384)
}

/// Fresh PKCS#8 PEM Ed25519 private key.
pub fn ed25519_private_key_pem() -> String {
    generate_pem(&PKCS_ED25519)
}

fn generate_pem(alg: &'static SignatureAlgorithm) -> String {
    KeyPair::generate_for(alg)
        .expect("key generation should succeed")
        .serialize_pem()
}
