//! The store-side reservation procedure and its content-addressed cache.

use sha1::{Digest, Sha1};

use crate::error::StoreError;
use crate::store::{ScriptArg, ScriptStore};

/// Lua rendition of the token-bucket reservation procedure.
///
/// `KEYS[1]` is the bucket key; `ARGV` is `(limit, capacity, now, amount)`.
/// The snapshot is a JSON object `{tc, ts}` and the reply a JSON object
/// `{ok, tokens, timeToAct, update}`; both shapes are mirrored by
/// [`Bucket`](crate::reserve::Bucket) and
/// [`Reservation`](crate::reserve::Reservation).
pub(crate) const TOKEN_BUCKET: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local amount = tonumber(ARGV[4])
local mill = 1000

local bucket = {tc = capacity, ts = now}
local value = redis.call("get", key)
if value then
  bucket = cjson.decode(value)
end

if now < bucket.ts then
  bucket.ts = now
end

local maxElapsed = math.floor((capacity - bucket.tc) * mill / limit)
local elapsed = now - bucket.ts
if elapsed > maxElapsed then
  elapsed = maxElapsed
end

local tokens = bucket.tc + math.floor(elapsed * limit / mill)
if tokens > capacity then
  tokens = capacity
end
tokens = tokens - amount

local reservation = {ok = false, tokens = 0, timeToAct = now, update = false}
if tokens < 0 then
  reservation.timeToAct = now + math.floor(-tokens * mill / limit)
else
  reservation.ok = true
  reservation.tokens = amount
  bucket.tc = tokens
  bucket.ts = now
  if redis.call("set", key, cjson.encode(bucket)) then
    reservation.update = true
  end
end

return cjson.encode(reservation)
"#;

/// Lowercase hex SHA-1 of `source`, the handle algorithm shared with the
/// store's own script cache.
pub(crate) fn sha1_hex(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A store-side procedure addressed by the SHA-1 of its source.
///
/// Invocation tries the short handle first and falls back to transmitting the
/// full source when the store signals it has nothing cached under that handle
/// (first call ever, or a store restart emptied its cache). The fallback
/// registers the source, so later calls return to the cheap handle path. The
/// cache is keyed by procedure content only, never by bucket key.
#[derive(Debug, Clone)]
pub struct Script {
    source: &'static str,
    hash: String,
}

impl Script {
    pub fn new(source: &'static str) -> Self {
        Self { source, hash: sha1_hex(source) }
    }

    /// The SHA-1 hex handle for this procedure's source.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Evaluates the procedure on `store`, falling back to registration by
    /// source on a handle miss.
    pub(crate) async fn run<S>(
        &self,
        store: &S,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> Result<String, StoreError>
    where
        S: ScriptStore + ?Sized,
    {
        match store.eval_by_hash(&self.hash, keys, args).await {
            Err(StoreError::UnknownHandle) => {
                tracing::debug!(hash = %self.hash, "procedure not cached by store; registering by source");
                store.eval_by_source(self.source, keys, args).await
            }
            other => other,
        }
    }
}
