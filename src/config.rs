//! Bucket configuration: steady-state rate and burst capacity.

use std::time::Duration;

/// Maximum frequency of some events, in events per second.
///
/// A zero limit allows no events. [`Limit::INF`] allows every event, even
/// against a zero-capacity bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit(f64);

impl Limit {
    /// The infinite rate limit; admits all events without consulting the store.
    pub const INF: Limit = Limit(f64::MAX);

    /// A limit of `n` events per second.
    pub fn per_second(n: f64) -> Self {
        Limit(n)
    }

    /// Converts a minimum interval between events to a limit.
    ///
    /// A zero interval means no minimum at all, i.e. [`Limit::INF`].
    pub fn every(interval: Duration) -> Self {
        if interval.is_zero() {
            return Limit::INF;
        }
        Limit(1.0 / interval.as_secs_f64())
    }

    /// Whether this limit admits every event.
    pub fn is_unlimited(&self) -> bool {
        self.0 == f64::MAX
    }

    /// Events per second as the raw value handed to the reservation procedure.
    pub fn events_per_second(&self) -> f64 {
        self.0
    }
}

/// Token bucket configuration.
///
/// Replaced wholesale by [`Limiter::set_config`](crate::Limiter::set_config);
/// a reservation attempt always sees a complete `limit` + `capacity` pair,
/// never a half-applied update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Steady-state refill rate.
    pub limit: Limit,
    /// Maximum burst: the bucket's token ceiling.
    pub capacity: i64,
}
