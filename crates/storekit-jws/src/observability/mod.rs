//! Observability for the verification path and the credential issuer.
//!
//! # Privacy by Default
//!
//! All instrumentation uses `#[instrument(skip_all)]` and explicit safe field
//! allow-listing. Tokens, payloads and private keys are never recorded; the
//! only identifying value logged is the trust-anchor fingerprint.

pub mod metrics;

pub use metrics::{record_credential_cache, record_credential_issuance, record_verification};
