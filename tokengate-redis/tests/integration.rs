use tokengate::{Config, Limit, Limiter};
use tokengate_redis::RedisStore;
use tokio_util::sync::CancellationToken;

// Requires a live Redis. If TOKENGATE_TEST_REDIS_URL is unset, the test skips.
#[tokio::test]
async fn reserves_against_live_redis() {
    let url = match std::env::var("TOKENGATE_TEST_REDIS_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("skipping: set TOKENGATE_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379)");
            return;
        }
    };

    let store = RedisStore::connect(&url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to redis at '{}': {}", url, e));
    let key = format!("tokengate:test:{}", uuid::Uuid::new_v4());
    let limiter = Limiter::new(
        store,
        key.clone(),
        Config { limit: Limit::per_second(1.0), capacity: 10 },
    );

    // Fresh key acts as a full bucket.
    assert!(limiter.try_consume(5).await.expect("first reservation"));
    // 5 left: a request for 10 must be denied, not queued.
    assert!(!limiter.try_consume(10).await.expect("second reservation"));
    // 5 left: blocking consumption of 5 grants without sleeping.
    let cancel = CancellationToken::new();
    limiter.consume_blocking(5, &cancel).await.expect("blocking take");

    // Cleanup
    let client = redis::Client::open(url.as_str()).expect("client");
    let mut conn = client.get_multiplexed_async_connection().await.expect("conn");
    let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await.expect("cleanup failed");
}

// Requires a live Redis. Exercises the registration fallback after the store
// loses its script cache.
#[tokio::test]
async fn survives_a_flushed_script_cache() {
    let url = match std::env::var("TOKENGATE_TEST_REDIS_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("skipping: set TOKENGATE_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379)");
            return;
        }
    };

    let store = RedisStore::connect(&url).await.expect("connect");
    let key = format!("tokengate:test:{}", uuid::Uuid::new_v4());
    let limiter = Limiter::new(
        store,
        key.clone(),
        Config { limit: Limit::per_second(100.0), capacity: 100 },
    );

    assert!(limiter.try_consume(1).await.expect("registering reservation"));

    let client = redis::Client::open(url.as_str()).expect("client");
    let mut conn = client.get_multiplexed_async_connection().await.expect("conn");
    let _: () = redis::cmd("SCRIPT")
        .arg("FLUSH")
        .query_async(&mut conn)
        .await
        .expect("script flush");

    // Same call, evicted handle: the fallback must re-register transparently.
    assert!(limiter.try_consume(1).await.expect("fallback reservation"));

    let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await.expect("cleanup failed");
}
