//! Time source for expiry checks and credential lifetimes.

use chrono::{DateTime, Utc};

/// Source of the current time.
///
/// Verification and issuance read the time through this trait so tests can
/// move past an expiry without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
