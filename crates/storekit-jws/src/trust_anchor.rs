//! Pinned root certificate for App Store signed payloads.
//!
//! The anchor is compiled into the binary and parsed once. There is no runtime
//! configuration and no network fetch; rotating the anchor means shipping a
//! new build.

use crate::errors::JwsError;
use common::jws::decode_pem_body;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

/// Apple Root CA - G3, as published by Apple PKI.
pub const APPLE_ROOT_CA_G3_PEM: &str = "-----BEGIN CERTIFICATE-----
MIICQzCCAcmgAwIBAgIILcX8iNLFS5UwCgYIKoZIzj0EAwMwZzEbMBkGA1UEAwwS
QXBwbGUgUm9vdCBDQSAtIEczMSYwJAYDVQQLDB1BcHBsZSBDZXJ0aWZpY2F0aW9u
IEF1dGhvcml0eTETMBEGA1UECgwKQXBwbGUgSW5jLjELMAkGA1UEBhMCVVMwHhcN
MTQwNDMwMTgxOTA2WhcNMzkwNDMwMTgxOTA2WjBnMRswGQYDVQQDDBJBcHBsZSBS
b290IENBIC0gRzMxJjAkBgNVBAsMHUFwcGxlIENlcnRpZmljYXRpb24gQXV0aG9y
aXR5MRMwEQYDVQQKDApBcHBsZSBJbmMuMQswCQYDVQQGEwJVUzB2MBAGByqGSM49
AgEGBSuBBAAiA2IABJjpLz1AcqTtkyJygRMc3RCV8cWjTnHcFBbZDuWmBSp3ZHtf
TjjTuxxEtX/1H7YyYl3J6YRbTzBPEVoA/VhYDKX1DyxNB0cTddqXl5dvMVztK517
IDvYuVTZXpmkOlEKMaNCMEAwHQYDVR0OBBYEFLuw3qFYM4iapIqZ3r6966/ayySr
MA8GA1UdEwEB/wQFMAMBAf8wDgYDVR0PAQH/BAQDAgEGMAoGCCqGSM49BAMDA2gA
MGUCMQCD6cHEFl4aXTQY2e3v9GwOAEZLuN+yRhHFD/3meoyhpmvOwgPUnPWTxnS4
at+qIxUCMG1mihDK1A3UT82NQz60imOlM27jbdoXt2QfyFMm+YhidDkLF1vLUagM
6BgD56KyKA==
-----END CERTIFICATE-----
";

static APPLE_ROOT_CA_G3: LazyLock<Result<TrustAnchor, JwsError>> =
    LazyLock::new(|| TrustAnchor::from_pem(APPLE_ROOT_CA_G3_PEM));

/// A root certificate that signed-payload chains must terminate in.
///
/// Immutable once constructed. Construction parses the DER so an unusable
/// anchor is reported up front instead of on every verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    der: Vec<u8>,
}

impl TrustAnchor {
    /// The pinned App Store root, parsed on first use and shared process-wide.
    ///
    /// # Errors
    ///
    /// Returns `JwsError::Configuration` if the compiled-in certificate cannot
    /// be parsed.
    pub fn apple_root_ca_g3() -> Result<&'static TrustAnchor, JwsError> {
        APPLE_ROOT_CA_G3.as_ref().map_err(Clone::clone)
    }

    /// Build an anchor from DER bytes.
    ///
    /// # Errors
    ///
    /// Returns `JwsError::Configuration` if the bytes are not a single
    /// well-formed CA certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, JwsError> {
        let (rest, cert) = X509Certificate::from_der(der)
            .map_err(|e| JwsError::Configuration(format!("trust anchor is not valid DER: {e}")))?;

        if !rest.is_empty() {
            return Err(JwsError::Configuration(
                "trust anchor has trailing data".to_string(),
            ));
        }

        if !cert.is_ca() {
            return Err(JwsError::Configuration(
                "trust anchor is not a CA certificate".to_string(),
            ));
        }

        Ok(Self { der: der.to_vec() })
    }

    /// Build an anchor from a PEM `CERTIFICATE` block.
    ///
    /// # Errors
    ///
    /// Returns `JwsError::Configuration` if the PEM or the certificate inside
    /// it is malformed.
    pub fn from_pem(pem: &str) -> Result<Self, JwsError> {
        let der = decode_pem_body(pem, "CERTIFICATE")
            .map_err(|e| JwsError::Configuration(format!("trust anchor PEM: {e}")))?;
        Self::from_der(&der)
    }

    /// Raw DER bytes of the anchor.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Hex SHA-256 of the DER, for log correlation.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    /// Parse the stored DER.
    ///
    /// Construction already parsed these bytes, so failure here means memory
    /// corruption; it is still reported rather than unwrapped.
    pub(crate) fn certificate(&self) -> Result<X509Certificate<'_>, JwsError> {
        X509Certificate::from_der(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|e| JwsError::Configuration(format!("trust anchor is not valid DER: {e}")))
    }
}
