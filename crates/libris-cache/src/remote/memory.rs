//! In-process remote tier.
//!
//! Behaves like a single Redis node for the primitives the cache uses, with
//! switches for simulating outages, latency and protocol errors. Used by the
//! test suites and by the probe binary when no Redis host is configured.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{PoolStats, RemoteTier};
use crate::config::expiry_after;
use crate::error::CacheError;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Faults {
    latency: Option<Duration>,
    protocol_error: Option<String>,
    memory_usage: Option<u64>,
}

/// Thread-safe in-memory implementation of [`RemoteTier`].
#[derive(Debug)]
pub struct MemoryTier {
    values: DashMap<String, StoredValue>,
    sorted_sets: DashMap<String, Vec<(f64, String)>>,
    offline: AtomicBool,
    faults: RwLock<Faults>,
    pool: RwLock<PoolStats>,
    calls: AtomicU64,
    del_calls: AtomicU64,
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTier {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            sorted_sets: DashMap::new(),
            offline: AtomicBool::new(false),
            faults: RwLock::new(Faults::default()),
            pool: RwLock::new(PoolStats {
                total: 1,
                active: 0,
                idle: 1,
            }),
            calls: AtomicU64::new(0),
            del_calls: AtomicU64::new(0),
        }
    }

    /// While offline every call fails with `ConnectionFailed`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.write().latency = latency;
    }

    /// Makes every call fail with a `Remote` error carrying `message`.
    pub fn set_protocol_error(&self, message: Option<String>) {
        self.faults.write().protocol_error = message;
    }

    /// Overrides the reported memory usage.
    pub fn set_memory_usage(&self, bytes: Option<u64>) {
        self.faults.write().memory_usage = bytes;
    }

    pub fn set_pool_stats(&self, stats: PoolStats) {
        *self.pool.write() = stats;
    }

    /// Total calls received, including failed ones.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn del_call_count(&self) -> u64 {
        self.del_calls.load(Ordering::SeqCst)
    }

    /// Whether `key` holds a live value, without counting as a call.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values
            .get(key)
            .is_some_and(|v| v.expires_at > Instant::now())
    }

    /// Remaining TTL of `key`, without counting as a call.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.values
            .get(key)
            .and_then(|v| v.expires_at.checked_duration_since(Instant::now()))
    }

    /// Writes a raw value directly, bypassing faults and counters.
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.values.insert(
            key.into(),
            StoredValue {
                value: value.into(),
                expires_at: expiry_after(Instant::now(), ttl),
            },
        );
    }

    async fn enter(&self, operation: &'static str, key: &str) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (latency, protocol_error) = {
            let faults = self.faults.read();
            (faults.latency, faults.protocol_error.clone())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::connection_failed(format!(
                "{operation} {key}: connection refused"
            )));
        }
        if let Some(message) = protocol_error {
            return Err(CacheError::remote(operation, key, message));
        }
        Ok(())
    }

    fn approximate_memory(&self) -> u64 {
        let values: usize = self
            .values
            .iter()
            .map(|e| e.key().len() + e.value().value.len())
            .sum();
        let sets: usize = self
            .sorted_sets
            .iter()
            .map(|e| e.key().len() + e.value().iter().map(|(_, m)| m.len() + 8).sum::<usize>())
            .sum();
        (values + sets) as u64
    }
}

#[async_trait]
impl RemoteTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.enter("get", key).await?;
        let now = Instant::now();
        let Some(entry) = self.values.get(key) else {
            return Ok(None);
        };
        if entry.expires_at > now {
            return Ok(Some(entry.value.clone()));
        }
        drop(entry);
        self.values.remove_if(key, |_, v| v.expires_at <= now);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.enter("set", key).await?;
        self.seed(key, value, ttl);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        let summary = keys.first().map(String::as_str).unwrap_or_default();
        self.enter("del", summary).await?;
        self.del_calls.fetch_add(1, Ordering::SeqCst);

        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, v)) = self.values.remove(key) {
                if v.expires_at > now {
                    removed += 1;
                }
            } else if self.sorted_sets.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.enter("ping", "-").await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError> {
        self.enter("zadd", key).await?;
        let mut set = self.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        let at = set.partition_point(|(s, m)| (*s, m.as_str()) < (score, member));
        set.insert(at, (score, member.to_string()));
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, CacheError> {
        self.enter("zrangebyscore", key).await?;
        Ok(self
            .sorted_sets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(s, _)| *s >= min && *s <= max)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.enter("zrem", key).await?;
        if let Some(mut set) = self.sorted_sets.get_mut(key) {
            set.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn memory_usage(&self) -> Result<u64, CacheError> {
        self.enter("info", "memory").await?;
        let forced = self.faults.read().memory_usage;
        Ok(forced.unwrap_or_else(|| self.approximate_memory()))
    }

    fn pool_stats(&self) -> PoolStats {
        *self.pool.read()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_expiry() {
        let tier = MemoryTier::new();
        tier.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(tier.get("k").await.unwrap().as_deref(), Some("v"));

        tier.seed("old", "v", Duration::ZERO);
        assert_eq!(tier.get("old").await.unwrap(), None);
        assert_eq!(tier.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_with_huge_ttl() {
        let tier = MemoryTier::new();
        tier.set_ex("k", "v", Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(tier.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_del_counts_existing_keys() {
        let tier = MemoryTier::new();
        tier.seed("a", "1", Duration::from_secs(60));
        tier.seed("b", "2", Duration::from_secs(60));

        let removed = tier
            .del(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tier.del_call_count(), 1);
        assert!(!tier.contains_key("a"));
    }

    #[tokio::test]
    async fn test_sorted_set() {
        let tier = MemoryTier::new();
        tier.zadd("z", "b", 2.0).await.unwrap();
        tier.zadd("z", "a", 1.0).await.unwrap();
        tier.zadd("z", "c", 3.0).await.unwrap();
        tier.zadd("z", "a", 4.0).await.unwrap();

        assert_eq!(
            tier.zrange_by_score("z", 0.0, 3.0).await.unwrap(),
            vec!["b", "c"]
        );
        tier.zrem("z", "c").await.unwrap();
        assert_eq!(
            tier.zrange_by_score("z", f64::NEG_INFINITY, f64::INFINITY)
                .await
                .unwrap(),
            vec!["b", "a"]
        );
    }

    #[tokio::test]
    async fn test_faults() {
        let tier = MemoryTier::new();
        tier.set_offline(true);
        assert!(matches!(
            tier.ping().await,
            Err(CacheError::ConnectionFailed { .. })
        ));
        tier.set_offline(false);

        tier.set_protocol_error(Some("WRONGTYPE".into()));
        assert!(matches!(
            tier.get("k").await,
            Err(CacheError::Remote { .. })
        ));
        tier.set_protocol_error(None);

        tier.set_memory_usage(Some(4096));
        assert_eq!(tier.memory_usage().await.unwrap(), 4096);
        assert_eq!(tier.call_count(), 3);
    }
}
