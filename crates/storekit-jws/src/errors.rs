use common::jws::{CompactError, TimeClaimError};
use std::fmt;
use thiserror::Error;

/// Stage of compact-serialization parsing that rejected a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    /// Token exceeds the maximum accepted size.
    TooLarge,
    /// Not exactly three non-empty dot-separated segments.
    Segments,
    /// Header segment is not unpadded base64url.
    HeaderEncoding,
    /// Header is not the expected JSON object.
    HeaderJson,
    /// Header `x5c` has fewer than three certificates.
    ChainLength,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ParseStage::TooLarge => "token too large",
            ParseStage::Segments => "segment split",
            ParseStage::HeaderEncoding => "header base64url",
            ParseStage::HeaderJson => "header json",
            ParseStage::ChainLength => "certificate chain length",
        };
        f.write_str(stage)
    }
}

impl From<CompactError> for ParseStage {
    fn from(e: CompactError) -> Self {
        match e {
            CompactError::TooLarge => ParseStage::TooLarge,
            CompactError::SegmentCount(_) | CompactError::EmptySegment(_) => ParseStage::Segments,
            CompactError::Encoding => ParseStage::HeaderEncoding,
        }
    }
}

/// Position of a certificate inside the `x5c` chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPosition {
    Leaf,
    Intermediate,
    Root,
}

impl ChainPosition {
    /// Index of this position inside `x5c`.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ChainPosition::Leaf => 0,
            ChainPosition::Intermediate => 1,
            ChainPosition::Root => 2,
        }
    }
}

impl fmt::Display for ChainPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainPosition::Leaf => "leaf",
            ChainPosition::Intermediate => "intermediate",
            ChainPosition::Root => "root",
        };
        f.write_str(name)
    }
}

/// Why a parsed chain was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFailure {
    /// Issuer name does not match the next certificate's subject.
    IssuerMismatch,
    /// Certificate signature does not verify under the issuer key.
    BadSignature,
    /// Issuing certificate is not a CA.
    NotCa,
    /// Certificate is outside its validity window.
    Expired,
    /// Chain root does not validate against the pinned trust anchor.
    UntrustedRoot,
}

impl fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ChainFailure::IssuerMismatch => "issuer mismatch",
            ChainFailure::BadSignature => "bad certificate signature",
            ChainFailure::NotCa => "issuer is not a CA",
            ChainFailure::Expired => "certificate outside validity window",
            ChainFailure::UntrustedRoot => "root is not the trust anchor",
        };
        f.write_str(reason)
    }
}

/// Errors from the verification path and the credential issuer.
///
/// Messages never include token, payload or key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwsError {
    #[error("Malformed signed payload: {0}")]
    Parse(ParseStage),

    #[error("Invalid {position} certificate: {reason}")]
    Certificate {
        position: ChainPosition,
        reason: String,
    },

    #[error("Certificate chain rejected at {position}: {failure}")]
    ChainValidation {
        position: ChainPosition,
        failure: ChainFailure,
    },

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Claims could not be decoded: {0}")]
    ClaimsDecode(String),

    #[error("Claims expired at {exp}")]
    ExpiredClaims { exp: i64 },

    #[error("Claims not valid before {nbf}")]
    ClaimsNotYetValid { nbf: i64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

impl JwsError {
    /// Whether retrying the same call can succeed.
    ///
    /// Only per-call signing failures are retryable; configuration errors need
    /// a configuration change and verification failures are deterministic.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, JwsError::Signing(_))
    }

    /// Bounded metric label for this error.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            JwsError::Parse(_) => "parse",
            JwsError::Certificate { .. } => "certificate",
            JwsError::ChainValidation { .. } => "chain",
            JwsError::UnsupportedAlgorithm(_) => "algorithm",
            JwsError::SignatureInvalid => "signature",
            JwsError::ClaimsDecode(_) => "claims",
            JwsError::ExpiredClaims { .. } | JwsError::ClaimsNotYetValid { .. } => "expired",
            JwsError::Configuration(_) => "configuration",
            JwsError::Signing(_) => "signing",
        }
    }
}

impl From<TimeClaimError> for JwsError {
    fn from(e: TimeClaimError) -> Self {
        match e {
            TimeClaimError::Expired { exp } => JwsError::ExpiredClaims { exp },
            TimeClaimError::NotYetValid { nbf } => JwsError::ClaimsNotYetValid { nbf },
        }
    }
}
