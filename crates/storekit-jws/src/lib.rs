//! App Store signed-payload verification and App Store Server API credentials.
//!
//! Two independent halves share the ES256 algorithm and key conventions:
//!
//! - **Verification**: parse a compact JWS, validate its `x5c` chain against
//!   the pinned Apple root, verify the signature and decode typed claims.
//! - **Issuance**: sign short-lived bearer credentials with an App Store
//!   Connect key and cache them until shortly before Apple would reject them.
//!
//! # Modules
//!
//! - `trust_anchor` - Pinned root certificate
//! - `token` - Compact serialization parser
//! - `chain` - Certificate chain validation
//! - `verifier` - Signature verification and claims binding
//! - `claims` - Registered and verified claims types
//! - `credential` - Credential issuer and cache
//! - `config` - Issuer configuration
//! - `errors` - Error types
//! - `observability` - Metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use storekit_jws::{JwsVerifier, VerifiedClaims};
//!
//! let verifier = JwsVerifier::new()?;
//! let claims: VerifiedClaims<serde_json::Value> = verifier.verify(signed_transaction)?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chain;
pub mod claims;
pub mod clock;
pub mod config;
pub mod credential;
pub mod errors;
pub mod observability;
pub mod token;
pub mod trust_anchor;
pub mod verifier;

pub use claims::{Audience, RegisteredClaims, VerifiedClaims};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, IssuerConfig};
pub use credential::{Credential, CredentialClaims, CredentialIssuer, AUDIENCE, TOKEN_LIFETIME};
pub use errors::{ChainFailure, ChainPosition, JwsError, ParseStage};
pub use token::{Header, SignedToken};
pub use trust_anchor::TrustAnchor;
pub use verifier::JwsVerifier;
