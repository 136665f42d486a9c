//! Error taxonomy for reservation attempts.
//!
//! Denial is not an error: [`Limiter::try_consume`](crate::Limiter::try_consume)
//! reports it as `Ok(false)` and the blocking path sleeps through it.

use thiserror::Error;

/// Errors produced by a [`ScriptStore`](crate::store::ScriptStore) backend.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The store has no procedure cached under the presented handle.
    ///
    /// Consumed by [`Script`](crate::script::Script), which falls back to
    /// registration by full source; limiter callers never observe it.
    #[error("procedure handle not known to the store")]
    UnknownHandle,
    /// The store was unreachable or the call failed in transit.
    #[error("transport: {0}")]
    Transport(String),
    /// The store replied with something other than the expected shape.
    #[error("unexpected reply: {0}")]
    Reply(String),
}

/// Errors surfaced by [`Limiter`](crate::Limiter) operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The store call failed; nothing can be assumed about bucket state.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// The procedure returned text that does not decode as a reservation.
    #[error("malformed reservation reply: {0}")]
    Decode(#[from] serde_json::Error),
    /// The request can never succeed: it asks for more than the bucket holds
    /// even when full. Raised before any store contact.
    #[error("amount {amount} exceeds bucket capacity {capacity}")]
    ExceedsCapacity { amount: i64, capacity: i64 },
    /// The caller's cancellation token fired while waiting.
    #[error("wait cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the caller gave up, as opposed to the system failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether the request was rejected as unsatisfiable at any size of wait.
    pub fn is_exceeds_capacity(&self) -> bool {
        matches!(self, Error::ExceedsCapacity { .. })
    }
}
