//! Compact JWS utilities shared by the verification path and the credential issuer.
//!
//! This module provides:
//! - Size limits for DoS prevention
//! - Splitting of `header.payload.signature` into borrowed segments
//! - base64url segment decoding
//! - PEM body extraction for a required label
//! - `exp` / `nbf` checks against an explicit `now`
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE splitting or decoding
//! - The signing input is borrowed from the original token, never re-serialized
//! - Error values carry no token content
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jws::{split_compact, decode_segment};
//!
//! let parts = split_compact(token)?;
//! let header_json = decode_segment(parts.header)?;
//! // verify parts.signature over parts.signing_input.as_bytes()
//! ```

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted compact JWS size in bytes (64KB).
///
/// Signed payloads from the App Store carry a three-certificate `x5c` chain in
/// the header (roughly 3-4KB) and notification payloads embed further signed
/// payloads, so the limit is larger than a plain bearer token would need.
/// Oversized input is rejected before any base64 decoding.
pub const MAX_JWS_SIZE_BYTES: usize = 64 * 1024;

/// The only signing algorithm accepted or produced: ECDSA P-256 with SHA-256.
pub const ES256: &str = "ES256";

/// Maximum leeway that may be applied to `exp` / `nbf` checks (10 minutes).
///
/// Larger configured values are clamped to this bound.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced while splitting or decoding a compact serialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompactError {
    /// Token exceeds [`MAX_JWS_SIZE_BYTES`].
    #[error("token exceeds the maximum size of {MAX_JWS_SIZE_BYTES} bytes")]
    TooLarge,

    /// Token does not have exactly three segments.
    #[error("expected 3 segments, found {0}")]
    SegmentCount(usize),

    /// One of the segments is empty.
    #[error("segment {0} is empty")]
    EmptySegment(usize),

    /// A segment is not valid unpadded base64url.
    #[error("segment is not valid base64url")]
    Encoding,
}

/// Errors produced while extracting a PEM body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PemError {
    /// The expected `-----BEGIN <label>-----` / `-----END <label>-----` pair is missing.
    #[error("expected a PEM block labelled {0}")]
    MissingBoundary(String),

    /// The body between the boundaries is not valid base64.
    #[error("PEM body is not valid base64")]
    Encoding,
}

/// Errors produced by registered time-claim checks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeClaimError {
    /// `exp` is at or before `now - leeway`.
    #[error("token expired at {exp}")]
    Expired {
        /// The rejected expiry (Unix seconds).
        exp: i64,
    },

    /// `nbf` is after `now + leeway`.
    #[error("token not valid before {nbf}")]
    NotYetValid {
        /// The rejected not-before (Unix seconds).
        nbf: i64,
    },
}

// =============================================================================
// Compact Serialization
// =============================================================================

/// Borrowed view of the three segments of a compact serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactParts<'a> {
    /// base64url header segment.
    pub header: &'a str,
    /// base64url payload segment.
    pub payload: &'a str,
    /// base64url signature segment.
    pub signature: &'a str,
    /// `header.payload`, borrowed from the original token.
    pub signing_input: &'a str,
}

/// Split a compact serialization into its three segments.
///
/// # Errors
///
/// - `TooLarge` - token exceeds [`MAX_JWS_SIZE_BYTES`]
/// - `SegmentCount` - token does not contain exactly two `.` separators
/// - `EmptySegment` - any segment is empty
pub fn split_compact(token: &str) -> Result<CompactParts<'_>, CompactError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWS_SIZE_BYTES {
        tracing::debug!(
            target: "storekit.common.jws",
            token_size = token.len(),
            max_size = MAX_JWS_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(CompactError::TooLarge);
    }

    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        let count = token.split('.').count();
        tracing::debug!(
            target: "storekit.common.jws",
            segments = count,
            "Token rejected: invalid compact format"
        );
        return Err(CompactError::SegmentCount(count));
    };

    for (index, segment) in [header, payload, signature].iter().enumerate() {
        if segment.is_empty() {
            tracing::debug!(
                target: "storekit.common.jws",
                segment = index,
                "Token rejected: empty segment"
            );
            return Err(CompactError::EmptySegment(index));
        }
    }

    // header + '.' + payload is a prefix of the original token
    let signing_input = token
        .get(..header.len() + 1 + payload.len())
        .ok_or(CompactError::SegmentCount(3))?;

    Ok(CompactParts {
        header,
        payload,
        signature,
        signing_input,
    })
}

/// Decode one base64url (unpadded) segment.
///
/// # Errors
///
/// Returns `CompactError::Encoding` if the segment is not valid base64url.
pub fn decode_segment(segment: &str) -> Result<Vec<u8>, CompactError> {
    URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "storekit.common.jws", error = %e, "Failed to decode segment base64url");
        CompactError::Encoding
    })
}

/// Encode bytes as one base64url (unpadded) segment.
#[must_use]
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

// =============================================================================
// PEM
// =============================================================================

/// Extract and decode the body of a PEM block with the given label.
///
/// Only the exact label is accepted, so a `PRIVATE KEY` (PKCS#8) request
/// rejects `EC PRIVATE KEY` (SEC1) and `RSA PRIVATE KEY` (PKCS#1) input.
///
/// # Errors
///
/// - `MissingBoundary` - the BEGIN/END lines for `label` are absent
/// - `Encoding` - the body is not valid standard base64
pub fn decode_pem_body(pem: &str, label: &str) -> Result<Vec<u8>, PemError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let mut inside = false;
    let mut closed = false;
    let mut body = String::new();
    for line in pem.lines().map(str::trim) {
        if line == begin {
            inside = true;
        } else if line == end {
            closed = inside;
            break;
        } else if inside {
            body.push_str(line);
        }
    }

    if !closed || body.is_empty() {
        return Err(PemError::MissingBoundary(label.to_string()));
    }

    STANDARD.decode(body).map_err(|_| PemError::Encoding)
}

// =============================================================================
// Registered time claims
// =============================================================================

/// Clamp a configured leeway to [`MAX_CLOCK_SKEW`].
#[must_use]
pub fn clamp_clock_skew(leeway: Duration) -> Duration {
    leeway.min(MAX_CLOCK_SKEW)
}

/// Reject an `exp` that is at or before `now - leeway`.
///
/// # Errors
///
/// Returns `TimeClaimError::Expired` for an already-past expiry.
pub fn validate_exp_at(exp: i64, leeway: Duration, now: i64) -> Result<(), TimeClaimError> {
    // Safe cast: leeway is clamped to MAX_CLOCK_SKEW (600 seconds)
    #[allow(clippy::cast_possible_wrap)]
    let leeway_secs = clamp_clock_skew(leeway).as_secs() as i64;

    if exp <= now - leeway_secs {
        tracing::debug!(
            target: "storekit.common.jws",
            exp = exp,
            now = now,
            leeway_secs = leeway_secs,
            "Token rejected: expired"
        );
        return Err(TimeClaimError::Expired { exp });
    }

    Ok(())
}

/// Reject an `nbf` that is after `now + leeway`.
///
/// # Errors
///
/// Returns `TimeClaimError::NotYetValid` when the token is not yet valid.
pub fn validate_nbf_at(nbf: i64, leeway: Duration, now: i64) -> Result<(), TimeClaimError> {
    #[allow(clippy::cast_possible_wrap)]
    let leeway_secs = clamp_clock_skew(leeway).as_secs() as i64;

    if nbf > now + leeway_secs {
        tracing::debug!(
            target: "storekit.common.jws",
            nbf = nbf,
            now = now,
            leeway_secs = leeway_secs,
            "Token rejected: not yet valid"
        );
        return Err(TimeClaimError::NotYetValid { nbf });
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
