//! Storage backends: where the reservation procedure executes atomically.
//!
//! The bucket snapshot is the only cross-process shared mutable state, and it
//! is guarded exclusively by the store's atomic evaluation of the procedure.
//! Clients never lock it directly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::reserve;
use crate::reserve::Bucket;
use crate::script::sha1_hex;

/// A positional argument to a store-side procedure.
///
/// Reservation calls pass `(limit, capacity, now, amount)` in this order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptArg {
    Int(i64),
    Float(f64),
}

/// A key-value store that evaluates a registered procedure atomically.
///
/// The two entry points mirror the two ways a store can address a procedure:
/// by the short content-derived handle (cheap, may miss) or by the full
/// source (always works, registers the handle as a side effect). A handle
/// miss must surface as [`StoreError::UnknownHandle`] so
/// [`Script`](crate::script::Script) can fall back; every other failure is
/// transport or protocol.
///
/// No evaluation of a procedure for a given key may interleave with another:
/// the atomic read-compute-write inside the store is what makes reservations
/// race-free across processes.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Evaluates the procedure registered under `hash`.
    async fn eval_by_hash(
        &self,
        hash: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> Result<String, StoreError>;

    /// Evaluates `source` directly, registering its handle for later calls.
    async fn eval_by_source(
        &self,
        source: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> Result<String, StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    /// Bucket key to encoded `{tc, ts}` snapshot.
    buckets: HashMap<String, String>,
    /// Handles of procedures registered by source.
    registered: HashSet<String>,
}

/// In-process store backend.
///
/// Buckets and the registered-handle set live behind one mutex, which is the
/// atomicity domain. Rather than interpret source text, it executes this
/// crate's reservation procedure natively, so it accepts only that procedure.
/// Suitable for single-process limiting and as the test backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    hash_calls: AtomicUsize,
    source_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every registered procedure handle, as a store restart would.
    pub fn evict_procedures(&self) {
        self.inner.lock().unwrap().registered.clear();
    }

    /// Raw snapshot text stored for `key`, if any.
    pub fn snapshot(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().buckets.get(key).cloned()
    }

    /// Number of handle-addressed and source-addressed evaluations served,
    /// in that order.
    pub fn call_counts(&self) -> (usize, usize) {
        (self.hash_calls.load(Ordering::SeqCst), self.source_calls.load(Ordering::SeqCst))
    }

    fn execute(
        inner: &mut Inner,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> Result<String, StoreError> {
        let key = keys.first().ok_or_else(|| StoreError::Reply("missing bucket key".into()))?;
        let (limit, capacity, now, amount) = match args {
            [ScriptArg::Float(l), ScriptArg::Int(c), ScriptArg::Int(n), ScriptArg::Int(a)] => {
                (*l, *c, *n, *a)
            }
            other => {
                return Err(StoreError::Reply(format!("unexpected argument shape: {other:?}")))
            }
        };

        let snapshot = match inner.buckets.get(*key) {
            Some(raw) => Some(serde_json::from_str::<Bucket>(raw).map_err(|e| {
                StoreError::Reply(format!("corrupt snapshot for {key}: {e}"))
            })?),
            None => None,
        };

        let (mut reservation, commit) = reserve::apply(snapshot, limit, capacity, now, amount);
        if let Some(bucket) = commit {
            let encoded =
                serde_json::to_string(&bucket).map_err(|e| StoreError::Reply(e.to_string()))?;
            inner.buckets.insert((*key).to_string(), encoded);
            reservation.update = true;
        }
        serde_json::to_string(&reservation).map_err(|e| StoreError::Reply(e.to_string()))
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn eval_by_hash(
        &self,
        hash: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> Result<String, StoreError> {
        self.hash_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if !inner.registered.contains(hash) {
            return Err(StoreError::UnknownHandle);
        }
        Self::execute(&mut inner, keys, args)
    }

    async fn eval_by_source(
        &self,
        source: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> Result<String, StoreError> {
        self.source_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let hash = sha1_hex(source);
        inner.registered.insert(hash);
        Self::execute(&mut inner, keys, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARGS: [ScriptArg; 4] = [
        ScriptArg::Float(1.0),
        ScriptArg::Int(10),
        ScriptArg::Int(1_700_000_000_000),
        ScriptArg::Int(5),
    ];

    #[tokio::test]
    async fn unregistered_hash_is_a_distinguished_miss() {
        let store = MemoryStore::new();
        let err = store.eval_by_hash("deadbeef", &["k"], &ARGS).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownHandle));
        assert!(store.snapshot("k").is_none(), "a miss must not touch bucket state");
    }

    #[tokio::test]
    async fn source_evaluation_registers_the_handle() {
        let store = MemoryStore::new();
        store.eval_by_source("the procedure", &["k"], &ARGS).await.unwrap();
        store.eval_by_hash(&sha1_hex("the procedure"), &["k"], &ARGS).await.unwrap();
        assert_eq!(store.call_counts(), (1, 1));
    }

    #[tokio::test]
    async fn eviction_restores_the_miss() {
        let store = MemoryStore::new();
        store.eval_by_source("the procedure", &["k"], &ARGS).await.unwrap();
        store.evict_procedures();
        let err =
            store.eval_by_hash(&sha1_hex("the procedure"), &["k"], &ARGS).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownHandle));
    }

    #[tokio::test]
    async fn grant_persists_the_new_snapshot() {
        let store = MemoryStore::new();
        let raw = store.eval_by_source("p", &["k"], &ARGS).await.unwrap();
        assert!(raw.contains("\"ok\":true"));
        let snapshot = store.snapshot("k").expect("grant persists");
        let bucket: Bucket = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(bucket.tc, 5);
    }

    #[tokio::test]
    async fn malformed_arguments_are_a_reply_error() {
        let store = MemoryStore::new();
        let err = store
            .eval_by_source("p", &["k"], &[ScriptArg::Int(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Reply(_)));
    }

    #[tokio::test]
    async fn missing_key_is_a_reply_error() {
        let store = MemoryStore::new();
        let err = store.eval_by_source("p", &[], &ARGS).await.unwrap_err();
        assert!(matches!(err, StoreError::Reply(_)));
    }
}
