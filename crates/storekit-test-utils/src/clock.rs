//! Manually driven clock for expiry tests

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use storekit_jws::Clock;

/// A clock that only moves when told to.
///
/// # Example
/// ```rust,ignore
/// let clock = MockClock::starting_now();
/// let issuer = CredentialIssuer::with_clock(config, clock.clone())?;
/// clock.advance(Duration::minutes(56));
/// ```
#[derive(Debug)]
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    /// Start at the current wall-clock time, truncated to whole seconds.
    pub fn starting_now() -> Arc<Self> {
        let now = Utc::now();
        let whole = DateTime::from_timestamp(now.timestamp(), 0).expect("current time in range");
        Self::at(whole)
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }

    /// Current mock time as Unix seconds.
    pub fn now_secs(&self) -> i64 {
        self.now().timestamp()
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = to;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}
