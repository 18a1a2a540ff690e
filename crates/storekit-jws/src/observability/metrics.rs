//! Metrics definitions for signed-payload verification and credential issuance.
//!
//! All metrics follow Prometheus naming conventions:
//! - `storekit_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! No exporter is installed here; the embedding process picks one.
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `status`: 2 values (success, error)
//! - `error_category`: `JwsError::category()` values plus `none`
//! - `outcome`: 2 values (hit, miss)

use metrics::{counter, histogram};
use std::time::Duration;

// ============================================================================
// Verification Metrics
// ============================================================================

/// Record a signed-payload verification result.
///
/// Metric: `storekit_jws_verifications_total`
/// Labels: `status`, `error_category`
pub fn record_verification(status: &str, error_category: Option<&str>) {
    let category = error_category.unwrap_or("none");
    counter!("storekit_jws_verifications_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

// ============================================================================
// Credential Metrics
// ============================================================================

/// Record a credential signing operation.
///
/// Metric: `storekit_credential_issuance_duration_seconds`, `storekit_credential_issuance_total`
/// Labels: `status`
pub fn record_credential_issuance(status: &str, duration: Duration) {
    histogram!("storekit_credential_issuance_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("storekit_credential_issuance_total", "status" => status.to_string()).increment(1);
}

/// Record a credential cache lookup.
///
/// Metric: `storekit_credential_cache_total`
/// Labels: `outcome` (hit, miss)
pub fn record_credential_cache(outcome: &str) {
    counter!("storekit_credential_cache_total", "outcome" => outcome.to_string()).increment(1);
}
