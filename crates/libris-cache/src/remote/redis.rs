//! Redis-backed remote tier over a deadpool connection pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, RedisError};
use deadpool_redis::{Connection, Pool, PoolConfig, PoolError, Runtime, Timeouts};

use super::{PoolStats, RemoteTier};
use crate::config::CacheConfig;
use crate::error::CacheError;

/// Redis tier.
///
/// Pool sizing and lifetimes come from [`PoolConfig`](crate::config::PoolConfig):
/// `max_active` bounds the pool. `min_idle`, `max_idle` and
/// `max_lifetime_secs` are enforced by [`RemoteTier::maintain`], which the
/// health monitor calls before each probe.
pub struct RedisTier {
    pool: Pool,
    min_idle: usize,
    max_idle: usize,
    max_lifetime: Duration,
    dial: Duration,
}

impl RedisTier {
    /// Builds the pool. No connection is opened until first use.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let mut redis_config = deadpool_redis::Config::from_url(config.remote.connection_url());
        redis_config.pool = Some(PoolConfig {
            max_size: config.pool.max_active,
            timeouts: Timeouts {
                wait: Some(config.timeouts.dial()),
                create: Some(config.timeouts.dial()),
                recycle: Some(config.timeouts.dial()),
            },
            ..PoolConfig::default()
        });

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::validation(format!("failed to create Redis pool: {e}")))?;

        tracing::info!(
            host = %config.remote.host,
            port = config.remote.port,
            max_active = config.pool.max_active,
            "Redis pool created"
        );

        Ok(Self {
            pool,
            min_idle: config.pool.min_idle,
            max_idle: config.pool.max_idle,
            max_lifetime: config.pool.max_lifetime(),
            dial: config.timeouts.dial(),
        })
    }

    /// Drops connections past their lifetime and idle connections above
    /// `max_idle`.
    fn trim_idle(&self) {
        let excess = self.pool_stats().idle.saturating_sub(self.max_idle);
        let dropped = AtomicUsize::new(0);
        let max_lifetime = self.max_lifetime;
        // retain() only visits idle connections.
        self.pool.retain(|_, metrics| {
            if metrics.age() >= max_lifetime {
                return false;
            }
            if dropped.load(Ordering::Relaxed) < excess {
                dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            true
        });
    }

    /// Opens connections until `min_idle` are idle, within `max_active`.
    ///
    /// Checked-out connections are held together and returned at once;
    /// checkouts never wait for a busy slot.
    async fn fill_idle(&self) {
        let status = self.pool.status();
        if status.available >= self.min_idle {
            return;
        }
        let target = self
            .min_idle
            .min(status.available + status.max_size.saturating_sub(status.size));
        let timeouts = Timeouts {
            wait: Some(Duration::ZERO),
            create: Some(self.dial),
            recycle: Some(self.dial),
        };

        let mut held = Vec::with_capacity(target);
        while held.len() < target {
            match self.pool.timeout_get(&timeouts).await {
                Ok(conn) => held.push(conn),
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        idle = held.len(),
                        min_idle = self.min_idle,
                        "Could not warm Redis pool to its idle floor"
                    );
                    break;
                }
            }
        }
        drop(held);
    }

    async fn conn(&self, operation: &'static str, key: &str) -> Result<Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| classify_pool_error(operation, key, e))
    }
}

/// Maps a Redis error onto the cache taxonomy.
pub fn classify_redis_error(operation: &'static str, key: &str, e: RedisError) -> CacheError {
    if e.is_timeout() {
        CacheError::timeout(operation, key)
    } else if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
        CacheError::connection_failed(format!("{operation} {key}: {e}"))
    } else {
        CacheError::remote(operation, key, e.to_string())
    }
}

/// Maps a pool checkout error onto the cache taxonomy.
pub fn classify_pool_error(operation: &'static str, key: &str, e: PoolError) -> CacheError {
    match e {
        PoolError::Timeout(_) => CacheError::timeout(operation, key),
        PoolError::Backend(e) => classify_redis_error(operation, key, e),
        other => CacheError::connection_failed(format!("{operation} {key}: {other}")),
    }
}

/// PSETEX argument for `ttl`. Redis rejects a zero expiry.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Extracts `used_memory` from an `INFO memory` reply.
pub(crate) fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
}

#[async_trait]
impl RemoteTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn("get", key).await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| classify_redis_error("get", key, e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn("set", key).await?;
        conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
            .await
            .map_err(|e| classify_redis_error("set", key, e))
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        let summary = keys.first().map(String::as_str).unwrap_or_default();
        let mut conn = self.conn("del", summary).await?;
        conn.del::<_, u64>(keys.to_vec())
            .await
            .map_err(|e| classify_redis_error("del", summary, e))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn("ping", "-").await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error("ping", "-", e))?;
        if pong != "PONG" {
            return Err(CacheError::remote("ping", "-", format!("unexpected reply {pong}")));
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError> {
        let mut conn = self.conn("zadd", key).await?;
        let added: Result<(), RedisError> = conn.zadd(key, member, score).await;
        added.map_err(|e| classify_redis_error("zadd", key, e))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn("zrangebyscore", key).await?;
        let members: Result<Vec<String>, RedisError> = conn.zrangebyscore(key, min, max).await;
        members.map_err(|e| classify_redis_error("zrangebyscore", key, e))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.conn("zrem", key).await?;
        let removed: Result<(), RedisError> = conn.zrem(key, member).await;
        removed.map_err(|e| classify_redis_error("zrem", key, e))
    }

    async fn memory_usage(&self) -> Result<u64, CacheError> {
        let mut conn = self.conn("info", "memory").await?;
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_redis_error("info", "memory", e))?;
        parse_used_memory(&info)
            .ok_or_else(|| CacheError::remote("info", "memory", "used_memory missing from INFO"))
    }

    fn pool_stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            total: status.size,
            active: status.size.saturating_sub(status.available),
            idle: status.available,
        }
    }

    async fn maintain(&self) {
        self.trim_idle();
        self.fill_idle().await;
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
