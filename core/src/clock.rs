//! Clock abstraction.
//!
//! Both dedup windows in the scan gate are measured against an injected
//! clock so that tests can advance time deterministically.

use chrono::{DateTime, Utc};

/// Abstracts time for testability.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
