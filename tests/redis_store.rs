//! Runs the bucket script against a real Redis.
//! Requires Docker - run with `cargo test -- --ignored`.

use std::time::Duration;

use medalt_api::store::{BucketParams, BucketStore, RedisBucketStore, TakeOutcome};
use testcontainers::{ContainerAsync, GenericImage, core::WaitFor, runners::AsyncRunner};

async fn start_redis() -> (ContainerAsync<GenericImage>, RedisBucketStore) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start Redis container");

    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get port");
    let url = format!("redis://127.0.0.1:{}", port);

    let store = RedisBucketStore::connect(&url, Duration::from_secs(5))
        .await
        .expect("Failed to connect bucket store");

    (container, store)
}

fn params(now_ms: u64, ttl: Duration) -> BucketParams {
    BucketParams {
        capacity: 3.0,
        refill_rate: 1.0,
        now_ms,
        ttl,
    }
}

async fn bucket_fields(store: &RedisBucketStore, key: &str) -> (Option<String>, Option<String>) {
    let mut conn = store.connection();
    redis::cmd("HMGET")
        .arg(key)
        .arg("tokens")
        .arg("lastRefill")
        .query_async(&mut conn)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires Docker for Redis container"]
async fn test_burst_then_reject() {
    let (_container, store) = start_redis().await;
    let ttl = Duration::from_secs(60);

    for expected in [2.0, 1.0, 0.0] {
        let outcome = store.take("search:ip:1", params(1_000, ttl)).await.unwrap();
        assert_eq!(outcome, TakeOutcome::Taken { remaining: expected });
    }

    let outcome = store.take("search:ip:1", params(1_000, ttl)).await.unwrap();
    assert_eq!(outcome, TakeOutcome::Exhausted { available: 0.0 });

    // half a second later there is half a token, which the reply must carry
    let outcome = store.take("search:ip:1", params(1_500, ttl)).await.unwrap();
    assert_eq!(outcome, TakeOutcome::Exhausted { available: 0.5 });
}

#[tokio::test]
#[ignore = "requires Docker for Redis container"]
async fn test_rejection_leaves_hash_untouched() {
    let (_container, store) = start_redis().await;
    let ttl = Duration::from_secs(60);

    for _ in 0..3 {
        store.take("k", params(1_000, ttl)).await.unwrap();
    }
    let before = bucket_fields(&store, "k").await;
    assert_eq!(before, (Some("0".to_string()), Some("1000".to_string())));

    let outcome = store.take("k", params(1_400, ttl)).await.unwrap();
    assert!(matches!(outcome, TakeOutcome::Exhausted { .. }));
    assert_eq!(bucket_fields(&store, "k").await, before);
}

#[tokio::test]
#[ignore = "requires Docker for Redis container"]
async fn test_admit_refreshes_ttl() {
    let (_container, store) = start_redis().await;
    let ttl = Duration::from_secs(60);

    store.take("k", params(1_000, ttl)).await.unwrap();

    let mut conn = store.connection();
    let pttl: i64 = redis::cmd("PTTL")
        .arg("k")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(pttl > 59_000 && pttl <= 60_000, "unexpected PTTL {}", pttl);
}

#[tokio::test]
#[ignore = "requires Docker for Redis container"]
async fn test_expired_bucket_starts_full() {
    let (_container, store) = start_redis().await;
    let ttl = Duration::from_millis(200);

    for _ in 0..3 {
        store.take("k", params(1_000, ttl)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    // same timestamp, so only expiry can explain a full bucket
    let outcome = store.take("k", params(1_000, ttl)).await.unwrap();
    assert_eq!(outcome, TakeOutcome::Taken { remaining: 2.0 });
}

#[tokio::test]
#[ignore = "requires Docker for Redis container"]
async fn test_late_timestamp_keeps_last_refill() {
    let (_container, store) = start_redis().await;
    let ttl = Duration::from_secs(60);

    store.take("k", params(10_000, ttl)).await.unwrap();
    store.take("k", params(5_000, ttl)).await.unwrap();

    let (_, last_refill) = bucket_fields(&store, "k").await;
    assert_eq!(last_refill.as_deref(), Some("10000"));
}
