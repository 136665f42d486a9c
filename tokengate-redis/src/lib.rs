#![forbid(unsafe_code)]
#![deny(warnings)]

//! Redis backend for `tokengate`.
//!
//! Maps the store surface onto `EVALSHA`/`EVAL`, so the reservation procedure
//! runs atomically inside Redis's script engine. A `NOSCRIPT` reply becomes
//! the distinguished unknown-handle signal that drives the client-side
//! registration fallback.
//!
//! ```no_run
//! use tokengate::{Config, Limit, Limiter};
//! use tokengate_redis::RedisStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisStore::connect("redis://127.0.0.1/").await.unwrap();
//!     let limiter = Limiter::new(
//!         store,
//!         "api:global",
//!         Config { limit: Limit::per_second(100.0), capacity: 50 },
//!     );
//!     let _admitted = limiter.try_consume(1).await.unwrap();
//! }
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokengate::{ScriptArg, ScriptStore, StoreError};

/// [`ScriptStore`] over a Redis connection manager.
///
/// The manager multiplexes requests and reconnects internally, so the store
/// is cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Wraps an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Connects to `url`, e.g. `redis://127.0.0.1:6379/`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(transport)?;
        let conn = ConnectionManager::new(client).await.map_err(transport)?;
        tracing::debug!(url, "connected redis script store");
        Ok(Self { conn })
    }
}

fn transport(err: redis::RedisError) -> StoreError {
    StoreError::Transport(err.to_string())
}

/// Everything the script engine hands back that is not a string reply is a
/// protocol-shape violation, not a transport failure.
fn classify(err: redis::RedisError) -> StoreError {
    if err.kind() == redis::ErrorKind::TypeError {
        StoreError::Reply(err.to_string())
    } else {
        StoreError::Transport(err.to_string())
    }
}

fn push_keys_and_args(cmd: &mut redis::Cmd, keys: &[&str], args: &[ScriptArg]) {
    cmd.arg(keys.len());
    for key in keys {
        cmd.arg(*key);
    }
    for arg in args {
        match arg {
            ScriptArg::Int(v) => cmd.arg(*v),
            ScriptArg::Float(v) => cmd.arg(*v),
        };
    }
}

#[async_trait]
impl ScriptStore for RedisStore {
    async fn eval_by_hash(
        &self,
        hash: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> Result<String, StoreError> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(hash);
        push_keys_and_args(&mut cmd, keys, args);
        let mut conn = self.conn.clone();
        let reply: Result<String, redis::RedisError> = cmd.query_async(&mut conn).await;
        match reply {
            Ok(raw) => Ok(raw),
            Err(err) if err.kind() == redis::ErrorKind::NoScriptError => {
                Err(StoreError::UnknownHandle)
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn eval_by_source(
        &self,
        source: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> Result<String, StoreError> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(source);
        push_keys_and_args(&mut cmd, keys, args);
        let mut conn = self.conn.clone();
        let reply: Result<String, redis::RedisError> = cmd.query_async(&mut conn).await;
        reply.map_err(classify)
    }
}
