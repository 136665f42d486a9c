#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tokengate
//!
//! Distributed token-bucket rate limiting with store-side atomic reservations.
//!
//! The bucket's authoritative state lives in a shared key-value store, so any
//! number of processes holding a [`Limiter`] for the same key cooperatively
//! enforce one global limit. Each attempt to consume tokens is a single atomic
//! procedure evaluated inside the store; there is no client-side
//! read-then-write window for concurrent callers to race through.
//!
//! ## Features
//!
//! - **Non-blocking admission** via [`Limiter::try_consume`]
//! - **Blocking admission** via [`Limiter::consume_blocking`], with a
//!   cancellable wait-and-retry loop driven by the store's own wait hints
//! - **Procedure caching**: reservations are invoked by a short
//!   content-derived handle, falling back to full registration when the store
//!   has lost its cache
//! - **Pluggable backends** through the [`ScriptStore`] trait: an in-process
//!   [`MemoryStore`] ships here, a Redis backend in `tokengate-redis`
//! - **Runtime reconfiguration**: swap rate and capacity atomically with
//!   [`Limiter::set_config`]
//!
//! ## Quick Start
//!
//! ```rust
//! use tokengate::{Config, Limit, Limiter, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = Limiter::new(
//!         MemoryStore::new(),
//!         "api:global",
//!         Config { limit: Limit::per_second(100.0), capacity: 50 },
//!     );
//!
//!     if limiter.try_consume(1).await.unwrap() {
//!         // admitted: do the rate-limited work
//!     }
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod reserve;
pub mod script;
pub mod sleeper;
pub mod store;

// Re-exports
pub use clock::{Clock, SystemClock};
pub use config::{Config, Limit};
pub use error::{Error, StoreError};
pub use limiter::Limiter;
pub use reserve::{Bucket, Reservation};
pub use script::Script;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{MemoryStore, ScriptArg, ScriptStore};
