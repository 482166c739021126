//! Remote cache client: deadlines, statistics and payload encoding over a
//! [`RemoteTier`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{PoolStats, RemoteTier, redis::RedisTier};
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::metrics;

/// Per-class deadlines applied to every remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Deadline for get, range and memory queries.
    pub read_timeout: Duration,
    /// Deadline for set, delete and sorted-set writes.
    pub write_timeout: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            read_timeout: config.timeouts.read(),
            write_timeout: config.timeouts.write(),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Client connectivity as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Ready,
    /// The most recent call failed on transport.
    Error,
    /// Closed by the owner. Terminal.
    Closed,
}

impl ClientStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Error,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Error => 1,
            Self::Closed => 2,
        }
    }
}

/// Snapshot of the client's call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub operations: u64,
    pub errors: u64,
    pub hits: u64,
    pub misses: u64,
    pub timeouts: u64,
    /// Unix milliseconds of the last attempted call, 0 if none.
    pub last_operation_ms: u64,
}

/// Pool occupancy plus hit/miss/timeout counters, as exported to health
/// reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub hits: u64,
    pub misses: u64,
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    operations: AtomicU64,
    errors: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
    last_operation_ms: AtomicU64,
}

/// Remote cache client.
///
/// Thread-safe; share it behind an `Arc`. All counters are lock-free.
pub struct RemoteCacheClient {
    tier: Arc<dyn RemoteTier>,
    options: ClientOptions,
    status: AtomicU8,
    counters: Counters,
    // Set while a health probe loop runs against this client.
    monitored: AtomicBool,
}

impl RemoteCacheClient {
    pub fn new(tier: Arc<dyn RemoteTier>, options: ClientOptions) -> Self {
        Self {
            tier,
            options,
            status: AtomicU8::new(ClientStatus::Ready.as_u8()),
            counters: Counters::default(),
            monitored: AtomicBool::new(false),
        }
    }

    /// Builds a Redis-backed client from configuration.
    pub fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let tier = RedisTier::from_config(config)?;
        Ok(Self::new(Arc::new(tier), ClientOptions::from_config(config)))
    }

    pub fn options(&self) -> ClientOptions {
        self.options
    }

    pub fn tier_name(&self) -> &'static str {
        self.tier.name()
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Marks the client closed. Later calls fail with [`CacheError::Closed`]
    /// without touching the tier.
    pub fn close(&self) {
        self.status
            .store(ClientStatus::Closed.as_u8(), Ordering::Release);
        tracing::info!(tier = self.tier.name(), "Remote cache client closed");
    }

    /// Returns the raw value stored at `key`, or `NotFound`.
    pub async fn get(&self, key: &str) -> CacheResult<String> {
        let value = self
            .call("get", key, self.options.read_timeout, self.tier.get(key))
            .await?;
        match value {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit("remote");
                Ok(value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss("remote");
                Err(CacheError::not_found(key))
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let raw = self.get(key).await?;
        serde_json::from_str(&raw).map_err(|e| {
            tracing::warn!(key, error = %e, "Undecodable cache entry");
            CacheError::serialization(format!("{key}: {e}"))
        })
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.call(
            "set",
            key,
            self.options.write_timeout,
            self.tier.set_ex(key, value, ttl),
        )
        .await
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }

    /// Deletes `keys` in a single round trip. An empty slice is a no-op.
    pub async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let summary = match keys {
            [only] => only.clone(),
            [first, rest @ ..] => format!("{first} (+{} more)", rest.len()),
            [] => String::new(),
        };
        self.call(
            "del",
            &summary,
            self.options.write_timeout,
            self.tier.del(keys),
        )
        .await
    }

    /// Round-trips a PING under `timeout` and returns its latency.
    pub async fn ping(&self, timeout: Duration) -> CacheResult<Duration> {
        let started = Instant::now();
        self.call("ping", "-", timeout, self.tier.ping()).await?;
        let elapsed = started.elapsed();
        metrics::record_ping(elapsed);
        Ok(elapsed)
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        self.call(
            "zadd",
            key,
            self.options.write_timeout,
            self.tier.zadd(key, member, score),
        )
        .await
    }

    pub async fn range_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        self.call(
            "zrangebyscore",
            key,
            self.options.read_timeout,
            self.tier.zrange_by_score(key, min, max),
        )
        .await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> CacheResult<()> {
        self.call(
            "zrem",
            key,
            self.options.write_timeout,
            self.tier.zrem(key, member),
        )
        .await
    }

    pub async fn memory_usage(&self) -> CacheResult<u64> {
        self.call(
            "info",
            "memory",
            self.options.read_timeout,
            self.tier.memory_usage(),
        )
        .await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.tier.pool_stats()
    }

    pub fn pool_metrics(&self) -> PoolMetrics {
        let pool = self.tier.pool_stats();
        PoolMetrics {
            total: pool.total,
            active: pool.active,
            idle: pool.idle,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            operations: self.counters.operations.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            last_operation_ms: self.counters.last_operation_ms.load(Ordering::Relaxed),
        }
    }

    /// Claims the single probe-loop slot. Returns false if a loop already
    /// runs against this client.
    pub(crate) fn claim_monitor(&self) -> bool {
        self.monitored
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_monitor(&self) {
        self.monitored.store(false, Ordering::Release);
    }

    /// Pool housekeeping. No-op once closed.
    pub async fn maintain(&self) {
        if self.status() != ClientStatus::Closed {
            self.tier.maintain().await;
        }
    }

    async fn call<T, F>(
        &self,
        operation: &'static str,
        key: &str,
        deadline: Duration,
        fut: F,
    ) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        if self.status() == ClientStatus::Closed {
            return Err(CacheError::Closed);
        }

        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_operation_ms
            .store(unix_millis(), Ordering::Relaxed);
        metrics::record_remote_operation(operation);

        let result = match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::timeout(operation, key)),
        };

        match &result {
            Ok(_) => self.set_status(ClientStatus::Ready),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                if e.is_timeout() {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                if e.is_transport() {
                    self.set_status(ClientStatus::Error);
                }
                metrics::record_remote_error(operation, e.category().as_str());
                tracing::debug!(operation, key, error = %e, "Remote cache call failed");
            }
        }
        result
    }

    fn set_status(&self, next: ClientStatus) {
        // Closed is sticky.
        let _ = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ClientStatus::Closed.as_u8()).then_some(next.as_u8())
            });
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
