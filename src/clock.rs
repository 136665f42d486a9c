//! Clock abstraction so reservation timestamps can be faked in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in UNIX epoch milliseconds.
///
/// Reservation arithmetic runs on these timestamps, so cooperating processes
/// should agree on them to within ordinary clock skew. A caller clock behind
/// the stored snapshot is clamped by the procedure rather than trusted.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}
