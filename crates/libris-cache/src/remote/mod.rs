//! Remote (L2) cache tier.
//!
//! ## Architecture
//!
//! - [`RemoteTier`]: provider capability (Redis, in-memory). Returns
//!   classified [`CacheError`]s and reports absence as `Ok(None)`.
//! - [`RemoteCacheClient`]: the only type callers use. Adds deadlines,
//!   lock-free per-call statistics, Ready/Error/Closed status, JSON payload
//!   encoding, and maps absence to [`CacheError::NotFound`].
//!
//! The provider is chosen when the client is built; nothing inspects the
//! concrete tier type at runtime.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

pub mod client;
pub mod memory;
pub mod redis;

pub use client::{ClientOptions, ClientStats, ClientStatus, RemoteCacheClient};
pub use memory::MemoryTier;
pub use redis::RedisTier;

/// Connection pool occupancy as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
}

/// Key-value and sorted-set primitives of a networked cache.
///
/// Implementations must be thread-safe and must not retry internally; the
/// client enforces deadlines around every call.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Returns `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Deletes all `keys` in one round trip. Returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
    -> Result<Vec<String>, CacheError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// Bytes of memory in use on the remote server.
    async fn memory_usage(&self) -> Result<u64, CacheError>;

    fn pool_stats(&self) -> PoolStats;

    /// Periodic housekeeping, e.g. recycling old pooled connections and
    /// keeping the idle floor warm.
    async fn maintain(&self) {}

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}
