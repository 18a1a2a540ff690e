//! Common utilities shared across the storekit crates.

#![warn(clippy::pedantic)]

/// Module for compact JWS helpers (size limit, segment splitting, PEM and time checks)
pub mod jws;

/// Module for secret types that prevent accidental logging
pub mod secret;
