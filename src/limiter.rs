//! The per-key limiter facade and its blocking wait loop.
//!
//! Semantics:
//! - `try_consume` makes exactly one reservation attempt and never sleeps.
//! - `consume_blocking` turns denials into cancellable sleeps and re-attempts,
//!   sampling the clock afresh each round so real elapsed time, not a
//!   one-shot estimate, drives the refill arithmetic.
//! - Attempts on one facade are serialized under its configuration lock;
//!   attempts from other processes are ordered by the store's atomic
//!   evaluation of the procedure.
//!
//! Invariants:
//! - A request larger than the configured capacity never reaches the store.
//! - An unlimited rate never reaches the store.
//! - Cancellation is observed between attempts and during sleeps; an attempt
//!   already in flight is left to finish.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Error;
use crate::reserve::Reservation;
use crate::script::{Script, TOKEN_BUCKET};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::{ScriptArg, ScriptStore};

/// Token-bucket rate limiter over a shared store.
///
/// Every `Limiter` across any number of processes that shares a store and a
/// key enforces one global limit. See the
/// [token bucket algorithm](https://en.wikipedia.org/wiki/Token_bucket).
pub struct Limiter<S> {
    store: Arc<S>,
    key: String,
    config: RwLock<Config>,
    script: Script,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl<S> std::fmt::Debug for Limiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("key", &self.key)
            .field("script", &self.script.hash())
            .finish_non_exhaustive()
    }
}

impl<S> Limiter<S>
where
    S: ScriptStore,
{
    /// Creates a limiter for the bucket identified by `key` on `store`.
    pub fn new(store: S, key: impl Into<String>, config: Config) -> Self {
        Self::with_parts(
            Arc::new(store),
            key.into(),
            config,
            Arc::new(SystemClock),
            Arc::new(TokioSleeper),
        )
    }

    /// [`Limiter::new`] with injected time sources, for tests and embedders
    /// with their own clock discipline.
    pub fn with_parts(
        store: Arc<S>,
        key: String,
        config: Config,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            store,
            key,
            config: RwLock::new(config),
            script: Script::new(TOKEN_BUCKET),
            clock,
            sleeper,
        }
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> Config {
        *self.config.read().await
    }

    /// Replaces the configuration wholesale.
    ///
    /// Safe to call concurrently with in-flight consumption: an attempt keeps
    /// the snapshot it captured, and only later attempts see the update.
    pub async fn set_config(&self, config: Config) {
        *self.config.write().await = config;
    }

    /// Attempts to take `amount` tokens right now, without waiting.
    ///
    /// `Ok(false)` means "not now": the bucket had too few tokens, or the
    /// store could not confirm the snapshot write. An unconfirmed grant is
    /// deliberately reported as a denial here because this entry point cannot
    /// promise anything it cannot prove was persisted.
    pub async fn try_consume(&self, amount: i64) -> Result<bool, Error> {
        let r = self.reserve(amount).await?;
        if r.ok && !r.update {
            tracing::warn!(
                key = %self.key,
                "granted reservation lacked write confirmation; reporting denial"
            );
            return Ok(false);
        }
        Ok(r.ok)
    }

    /// Takes `amount` tokens, sleeping until the bucket can supply them.
    ///
    /// Fails fast with [`Error::ExceedsCapacity`] when the request can never
    /// succeed, and with [`Error::Cancelled`] when `cancel` fires first: an
    /// already-cancelled token returns before any store contact. Denials
    /// never mutate the bucket, so cancellation leaves nothing to undo.
    pub async fn consume_blocking(
        &self,
        amount: i64,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let capacity = self.config().await.capacity;
        if amount > capacity {
            return Err(Error::ExceedsCapacity { amount, capacity });
        }

        loop {
            // Checked ahead of every attempt, not just inside the sleep race:
            // a token cancelled while the timer was firing, or during a
            // zero-delay burst, must not trigger another store call.
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let now = self.clock.now_millis();
            let r = self.reserve_at(now, amount).await?;
            if r.ok {
                return Ok(());
            }

            // The delay must come from this round's reservation: the bucket
            // may have been drained or refilled by other callers since the
            // last one, so a stale wait hint proves nothing.
            let delay = r.delay_from(now);
            tracing::debug!(key = %self.key, ?delay, "bucket empty; waiting");
            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = self.sleeper.sleep(delay) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    /// One reservation attempt at the current time, exposing the raw
    /// [`Reservation`], including the wait hint and write confirmation that
    /// [`try_consume`](Self::try_consume) folds into a single bool.
    pub async fn reserve(&self, amount: i64) -> Result<Reservation, Error> {
        self.reserve_at(self.clock.now_millis(), amount).await
    }

    /// Captures the configuration and invokes the procedure under the write
    /// lock, so attempts on this facade cannot interleave with each other or
    /// with a configuration update mid-flight.
    async fn reserve_at(&self, now_ms: i64, amount: i64) -> Result<Reservation, Error> {
        let config = self.config.write().await;

        // Unbounded rate admits everything locally, never touching shared
        // state, regardless of capacity.
        if config.limit.is_unlimited() {
            return Ok(Reservation {
                ok: true,
                tokens: amount,
                time_to_act: now_ms,
                update: true,
            });
        }
        if amount > config.capacity {
            return Err(Error::ExceedsCapacity { amount, capacity: config.capacity });
        }

        let args = [
            ScriptArg::Float(config.limit.events_per_second()),
            ScriptArg::Int(config.capacity),
            ScriptArg::Int(now_ms),
            ScriptArg::Int(amount),
        ];
        let raw = self.script.run(self.store.as_ref(), &[self.key.as_str()], &args).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}
