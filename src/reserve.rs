//! Reservation arithmetic and the wire types it produces.
//!
//! This is the client-side rendition of the procedure the store executes
//! atomically (the Lua source lives in [`crate::script`]); native backends
//! such as [`MemoryStore`](crate::store::MemoryStore) run it directly. The
//! two renditions must agree, so the worked examples in the tests below pin
//! this one to the shared contract.
//!
//! Semantics:
//! - An absent snapshot is a freshly full bucket stamped at the request time.
//! - Elapsed time refills `floor(elapsed * limit / 1000)` tokens, capped at
//!   capacity.
//! - Denial leaves the snapshot untouched and reports the earliest instant a
//!   retry could succeed.
//!
//! Invariants:
//! - `0 <= tc <= capacity` after every committed write.
//! - `ts` never regresses across committed writes; a stored timestamp ahead
//!   of the caller's clock is clamped down to `now`, never trusted.
//! - All division floors, so wait hints are conservative.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const MILLIS_PER_SEC: f64 = 1000.0;

/// Stored bucket snapshot. Field names are the persisted wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Remaining token count.
    pub tc: i64,
    /// Last refill time, epoch milliseconds.
    pub ts: i64,
}

/// Outcome of one reservation attempt.
///
/// Serialized form is the wire contract with the store-side procedure; the
/// field names below must round-trip exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Whether the requested amount was granted.
    pub ok: bool,
    /// Tokens reserved: the requested amount on grant, zero on denial.
    pub tokens: i64,
    /// Epoch milliseconds at which the caller may act.
    pub time_to_act: i64,
    /// Whether the snapshot write was confirmed. A granted reservation with
    /// `update == false` is non-authoritative.
    pub update: bool,
}

impl Reservation {
    /// Delay from `now_ms` until [`time_to_act`](Self::time_to_act), clamped
    /// at zero.
    pub fn delay_from(&self, now_ms: i64) -> Duration {
        let millis = self.time_to_act.saturating_sub(now_ms).max(0);
        Duration::from_millis(millis as u64)
    }
}

/// Runs the reservation procedure against `snapshot` as of `now_ms`.
///
/// Returns the reservation with `update` still false and, on grant, the new
/// snapshot to persist; confirming the write is the storage layer's job.
pub(crate) fn apply(
    snapshot: Option<Bucket>,
    limit: f64,
    capacity: i64,
    now_ms: i64,
    amount: i64,
) -> (Reservation, Option<Bucket>) {
    let mut bucket = snapshot.unwrap_or(Bucket { tc: capacity, ts: now_ms });

    // A snapshot stamped ahead of this caller's clock would yield negative
    // elapsed time; clamp the timestamp instead.
    if now_ms < bucket.ts {
        bucket.ts = now_ms;
    }

    // Elapsed time beyond what refills the bucket to full buys nothing.
    let max_elapsed = ((capacity - bucket.tc) as f64 * MILLIS_PER_SEC / limit).floor() as i64;
    let elapsed = (now_ms - bucket.ts).min(max_elapsed);

    let refill = (elapsed as f64 * limit / MILLIS_PER_SEC).floor() as i64;
    let tokens = (bucket.tc + refill).min(capacity) - amount;

    if tokens < 0 {
        let wait = ((-tokens) as f64 * MILLIS_PER_SEC / limit).floor() as i64;
        let denied = Reservation {
            ok: false,
            tokens: 0,
            time_to_act: now_ms.saturating_add(wait),
            update: false,
        };
        (denied, None)
    } else {
        let granted =
            Reservation { ok: true, tokens: amount, time_to_act: now_ms, update: false };
        (granted, Some(Bucket { tc: tokens, ts: now_ms }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn absent_snapshot_defaults_to_a_full_bucket() {
        let (r, commit) = apply(None, 1.0, 10, T0, 5);
        assert!(r.ok);
        assert_eq!(r.tokens, 5);
        assert_eq!(r.time_to_act, T0);
        assert_eq!(commit, Some(Bucket { tc: 5, ts: T0 }));
    }

    #[test]
    fn denial_reports_earliest_retry_and_leaves_snapshot_alone() {
        // 1 token/s, 5 tokens left, asking for 10: short 5 tokens, 5000ms.
        let (r, commit) = apply(Some(Bucket { tc: 5, ts: T0 }), 1.0, 10, T0, 10);
        assert!(!r.ok);
        assert_eq!(r.tokens, 0);
        assert_eq!(r.time_to_act, T0 + 5000);
        assert_eq!(commit, None);
    }

    #[test]
    fn elapsed_time_refills_floor_of_rate_product() {
        // 2 tokens/s for 2500ms refills exactly 5 tokens.
        let (r, commit) = apply(Some(Bucket { tc: 0, ts: T0 }), 2.0, 10, T0 + 2500, 5);
        assert!(r.ok);
        assert_eq!(commit, Some(Bucket { tc: 0, ts: T0 + 2500 }));
    }

    #[test]
    fn refill_fraction_is_floored_not_rounded() {
        // 1 token/s for 1999ms refills 1 token, never 2.
        let (_, commit) = apply(Some(Bucket { tc: 0, ts: T0 }), 1.0, 10, T0 + 1999, 1);
        assert_eq!(commit, Some(Bucket { tc: 0, ts: T0 + 1999 }));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        // A week of idle time still tops out at capacity.
        let week = 7 * 24 * 3600 * 1000;
        let (r, commit) = apply(Some(Bucket { tc: 3, ts: T0 }), 100.0, 10, T0 + week, 1);
        assert!(r.ok);
        assert_eq!(commit, Some(Bucket { tc: 9, ts: T0 + week }));
    }

    #[test]
    fn stored_timestamp_ahead_of_caller_clock_is_clamped() {
        // Snapshot stamped 10s in this caller's future: no refill, no
        // negative elapsed time, timestamp moves down to now on commit.
        let (r, commit) = apply(Some(Bucket { tc: 4, ts: T0 + 10_000 }), 1.0, 10, T0, 2);
        assert!(r.ok);
        assert_eq!(commit, Some(Bucket { tc: 2, ts: T0 }));
    }

    #[test]
    fn committed_count_stays_within_bounds() {
        for amount in 0..=10 {
            let (r, commit) = apply(None, 5.0, 10, T0, amount);
            assert!(r.ok);
            let bucket = commit.expect("grant commits");
            assert!((0..=10).contains(&bucket.tc), "tc out of range: {}", bucket.tc);
        }
    }

    #[test]
    fn zero_limit_denies_without_panicking() {
        let (r, commit) = apply(Some(Bucket { tc: 0, ts: T0 }), 0.0, 10, T0 + 60_000, 1);
        assert!(!r.ok);
        assert_eq!(commit, None);
        assert!(r.time_to_act > T0);
    }

    #[test]
    fn delay_from_clamps_at_zero() {
        let r = Reservation { ok: false, tokens: 0, time_to_act: T0, update: false };
        assert_eq!(r.delay_from(T0 + 100), Duration::ZERO);
        assert_eq!(r.delay_from(T0 - 250), Duration::from_millis(250));
    }

    #[test]
    fn reservation_wire_names_round_trip() {
        let r = Reservation { ok: true, tokens: 3, time_to_act: T0, update: true };
        let encoded = serde_json::to_string(&r).unwrap();
        assert!(encoded.contains("\"timeToAct\""));
        assert!(encoded.contains("\"update\""));
        let decoded: Reservation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn bucket_wire_names_round_trip() {
        let decoded: Bucket = serde_json::from_str("{\"tc\":7,\"ts\":42}").unwrap();
        assert_eq!(decoded, Bucket { tc: 7, ts: 42 });
        assert_eq!(serde_json::to_string(&decoded).unwrap(), "{\"tc\":7,\"ts\":42}");
    }
}
