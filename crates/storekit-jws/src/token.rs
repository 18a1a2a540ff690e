//! Compact-serialization parser for App Store signed payloads.

use crate::errors::{JwsError, ParseStage};
use common::jws::{decode_segment, split_compact};
use serde::Deserialize;
use tracing::instrument;

/// Minimum number of `x5c` entries: leaf, intermediate, root.
pub const MIN_CHAIN_LENGTH: usize = 3;

/// Decoded JWS protected header.
///
/// Fields other than `alg` and `x5c` are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Header {
    pub alg: String,
    /// Standard base64 DER certificates, leaf first.
    pub x5c: Vec<String>,
}

/// A parsed signed payload.
///
/// Holds the original string so the signature is checked over the exact
/// bytes that were signed.
#[derive(Debug, Clone)]
pub struct SignedToken {
    raw: String,
    header: Header,
    header_len: usize,
    payload_len: usize,
}

impl SignedToken {
    /// Parse a compact serialization.
    ///
    /// Only the header is decoded; the payload and signature stay encoded
    /// until the chain and signature have been checked.
    ///
    /// # Errors
    ///
    /// Returns `JwsError::Parse` naming the stage that rejected the input.
    #[instrument(skip_all)]
    pub fn parse(token: &str) -> Result<Self, JwsError> {
        let parts = split_compact(token).map_err(|e| JwsError::Parse(e.into()))?;

        let header_bytes = decode_segment(parts.header)
            .map_err(|_| JwsError::Parse(ParseStage::HeaderEncoding))?;

        let header: Header = serde_json::from_slice(&header_bytes).map_err(|e| {
            tracing::debug!(target: "storekit.jws.token", error = %e, "Failed to parse header JSON");
            JwsError::Parse(ParseStage::HeaderJson)
        })?;

        if header.x5c.len() < MIN_CHAIN_LENGTH {
            tracing::debug!(
                target: "storekit.jws.token",
                chain_length = header.x5c.len(),
                "Token rejected: certificate chain too short"
            );
            return Err(JwsError::Parse(ParseStage::ChainLength));
        }

        Ok(Self {
            header_len: parts.header.len(),
            payload_len: parts.payload.len(),
            raw: token.to_string(),
            header,
        })
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The token exactly as received.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `header.payload`, the bytes covered by the signature.
    #[must_use]
    pub fn signing_input(&self) -> &str {
        self.raw
            .get(..self.header_len + 1 + self.payload_len)
            .unwrap_or_default()
    }

    /// base64url payload segment.
    #[must_use]
    pub fn payload_segment(&self) -> &str {
        let start = self.header_len + 1;
        self.raw
            .get(start..start + self.payload_len)
            .unwrap_or_default()
    }

    /// base64url signature segment.
    #[must_use]
    pub fn signature_segment(&self) -> &str {
        self.raw
            .get(self.header_len + self.payload_len + 2..)
            .unwrap_or_default()
    }
}
