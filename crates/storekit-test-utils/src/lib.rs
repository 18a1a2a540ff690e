//! # StoreKit Test Utilities
//!
//! Shared test utilities for `storekit-jws`.
//!
//! This crate provides:
//! - A generated three-tier test PKI (P-384 root and intermediate, P-256 leaf)
//! - Standalone key fixtures (P-256, P-384, Ed25519, mislabeled SEC1)
//! - Signed-payload builders and tamper helpers
//! - A manually driven clock
//! - Fixed test IDs
//! - Custom assertions (TokenAssertions trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storekit_test_utils::*;
//!
//! #[test]
//! fn test_example() {
//!     let pki = TestPki::generate()?;
//!     let token = SignedPayloadBuilder::transaction().sign(&pki);
//!
//!     let verifier = JwsVerifier::with_trust_anchor(pki.trust_anchor());
//!     let claims: VerifiedClaims<Value> = verifier.verify(&token)?;
//! }
//! ```

pub mod assertions;
pub mod clock;
pub mod crypto_fixtures;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use clock::*;
pub use crypto_fixtures::*;
pub use test_ids::*;
pub use token_builders::*;
