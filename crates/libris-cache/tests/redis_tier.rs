//! Integration tests for the Redis tier.
//!
//! Tests use testcontainers to spin up a real Redis instance and are ignored
//! by default. Run with `--ignored` where Docker is available.

use std::sync::Arc;
use std::time::Duration;

use libris_cache::{
    CacheAsideOrchestrator, CacheConfig, CacheError, CacheInvalidationCoordinator, HealthMonitor,
    KeySpace, LocalCache, ReadTarget, RemoteCacheClient, Source,
};
use libris_storage::{ItemId, OwnerId};
use redis::AsyncCommands;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, u16)> = OnceCell::const_new();

async fn redis_config() -> CacheConfig {
    let (_, port) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, port)
        })
        .await;

    let mut config = CacheConfig::default();
    config.remote.host = "127.0.0.1".to_string();
    config.remote.port = *port;
    config
}

async fn raw_connection(config: &CacheConfig) -> redis::aio::MultiplexedConnection {
    let client = redis::Client::open(config.remote.connection_url()).expect("redis client");
    client
        .get_multiplexed_async_connection()
        .await
        .expect("redis connection")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_get_set_delete_round_trip() {
    let config = redis_config().await;
    let client = RemoteCacheClient::connect(&config).unwrap();

    client
        .set("libris-test:k1", "v1", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(client.get("libris-test:k1").await.unwrap(), "v1");

    let removed = client
        .delete(&["libris-test:k1".to_string(), "libris-test:absent".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(client.get("libris-test:k1").await.unwrap_err().is_not_found());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_set_applies_ttl() {
    let config = redis_config().await;
    let client = RemoteCacheClient::connect(&config).unwrap();
    client
        .set("libris-test:ttl", "v", Duration::from_secs(30))
        .await
        .unwrap();

    let mut conn = raw_connection(&config).await;
    let ttl: i64 = conn.ttl("libris-test:ttl").await.unwrap();
    assert!(ttl > 0 && ttl <= 30);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_sorted_set_primitives() {
    let config = redis_config().await;
    let client = RemoteCacheClient::connect(&config).unwrap();
    let key = "libris-test:recent:7";

    client.zadd(key, "41", 1.0).await.unwrap();
    client.zadd(key, "42", 2.0).await.unwrap();
    client.zadd(key, "43", 3.0).await.unwrap();
    assert_eq!(
        client.range_by_score(key, 2.0, 3.0).await.unwrap(),
        vec!["42", "43"]
    );

    client.zrem(key, "42").await.unwrap();
    assert_eq!(
        client.range_by_score(key, 0.0, 10.0).await.unwrap(),
        vec!["41", "43"]
    );
    client.delete(&[key.to_string()]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_ping_and_memory_usage() {
    let config = redis_config().await;
    let client = RemoteCacheClient::connect(&config).unwrap();

    client.ping(Duration::from_secs(1)).await.unwrap();
    assert!(client.memory_usage().await.unwrap() > 0);
    assert!(client.pool_stats().total >= 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_monitor_reports_healthy_redis() {
    let mut config = redis_config().await;
    config.health.max_response_time_ms = 1_000;
    let client = Arc::new(RemoteCacheClient::connect(&config).unwrap());
    let monitor = HealthMonitor::new(client, &config.health, &config.pool);

    let status = monitor.probe_once().await;
    assert!(status.is_healthy, "{}", status.message);
    assert!(status.metrics.memory_usage_bytes > 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_maintain_warms_pool_to_idle_floor() {
    let mut config = redis_config().await;
    config.pool.min_idle = 3;
    config.pool.max_idle = 4;
    config.health.max_response_time_ms = 1_000;
    let client = Arc::new(RemoteCacheClient::connect(&config).unwrap());
    assert_eq!(client.pool_stats().idle, 0);

    client.maintain().await;
    assert!(client.pool_stats().idle >= 3, "{:?}", client.pool_stats());

    let monitor = HealthMonitor::new(client.clone(), &config.health, &config.pool);
    let status = monitor.probe_once().await;
    assert!(status.is_healthy, "{}", status.message);
    assert!(!status.degraded);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_probe_loop_stays_healthy_with_idle_floor() {
    let mut config = redis_config().await;
    config.pool.min_idle = 2;
    config.health.interval_ms = 20;
    config.health.max_response_time_ms = 1_000;
    let client = Arc::new(RemoteCacheClient::connect(&config).unwrap());
    let monitor = HealthMonitor::new(client, &config.health, &config.pool);

    let handle = monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;

    let status = monitor.get_health_status();
    assert!(!status.degraded, "{}", status.message);
    assert!(status.metrics.connection_pool.idle >= 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_sub_second_ttl_is_kept() {
    let config = redis_config().await;
    let client = RemoteCacheClient::connect(&config).unwrap();
    client
        .set("libris-test:short", "v", Duration::from_millis(1500))
        .await
        .unwrap();

    let mut conn = raw_connection(&config).await;
    let pttl: i64 = conn.pttl("libris-test:short").await.unwrap();
    assert!(pttl > 1_000 && pttl <= 1_500, "pttl = {pttl}");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_invalidate_then_read_against_redis() {
    let config = redis_config().await;
    let client = Arc::new(RemoteCacheClient::connect(&config).unwrap());
    let monitor = HealthMonitor::new(client.clone(), &config.health, &config.pool);
    let keys = KeySpace::new("libris-test:");
    let local = Arc::new(LocalCache::<String>::from_config(&config.local));
    let coordinator = CacheInvalidationCoordinator::new(keys.clone(), local, client.clone());
    let reads = CacheAsideOrchestrator::new(
        keys,
        client,
        monitor.reporter(),
        config.ttl.clone(),
        coordinator.generations(),
    );

    let compute = || async { Ok::<_, CacheError>(vec!["Dune".to_string()]) };
    let first = reads
        .get_or_compute(OwnerId(7), ReadTarget::Homepage, compute)
        .await
        .unwrap();
    assert_eq!(first.source, Source::Database);
    let second = reads
        .get_or_compute(OwnerId(7), ReadTarget::Homepage, compute)
        .await
        .unwrap();
    assert_eq!(second.source, Source::Cache);

    coordinator.invalidate(ItemId(42), OwnerId(7)).await.unwrap();
    let third = reads
        .get_or_compute(OwnerId(7), ReadTarget::Homepage, compute)
        .await
        .unwrap();
    assert_eq!(third.source, Source::Database);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unreachable_redis_is_connection_failure() {
    let mut config = CacheConfig::default();
    config.remote.host = "127.0.0.1".to_string();
    config.remote.port = 1;
    config.timeouts.dial_ms = 200;
    let client = RemoteCacheClient::connect(&config).unwrap();

    let err = client.get("libris-test:k").await.unwrap_err();
    assert!(err.is_transport(), "{err}");
}
