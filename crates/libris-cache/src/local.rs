//! In-process (L1) cache of per-owner projections.
//!
//! One mutex guards the map. Loaders and any other I/O run with the lock
//! released; a load that races an invalidation is returned to its caller
//! but not cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use libris_storage::OwnerId;
use parking_lot::Mutex;

use crate::config::{LocalCacheConfig, expiry_after};
use crate::error::CacheError;
use crate::metrics;

/// The L1 capability the invalidation coordinator depends on.
pub trait LocalTier: Send + Sync {
    /// Drops everything cached for `owner`. Returns whether an entry existed.
    fn invalidate_owner(&self, owner: OwnerId) -> Result<bool, CacheError>;
}

struct CacheEntry<T> {
    payload: T,
    inserted_at: Instant,
    expires_at: Instant,
}

struct Inner<T> {
    entries: HashMap<OwnerId, CacheEntry<T>>,
    // Bumped on every invalidation; loads started under an older epoch are
    // not cached.
    epoch: u64,
}

#[derive(Debug, Default)]
struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

/// A point-in-time snapshot of L1 statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

pub struct LocalCache<T> {
    inner: Mutex<Inner<T>>,
    ttl: Duration,
    max_entries: usize,
    stats: CacheStatistics,
}

impl<T> std::fmt::Debug for LocalCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("size", &self.inner.lock().entries.len())
            .finish()
    }
}

impl<T: Clone> LocalCache<T> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                epoch: 0,
            }),
            ttl,
            max_entries: max_entries.max(1),
            stats: CacheStatistics::default(),
        }
    }

    pub fn from_config(config: &LocalCacheConfig) -> Self {
        Self::new(config.ttl(), config.max_entries)
    }

    pub fn get(&self, owner: OwnerId) -> Option<T> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let hit = match inner.entries.get(&owner) {
            Some(entry) if entry.expires_at > now => Some(entry.payload.clone()),
            _ => None,
        };
        if hit.is_none() {
            inner.entries.remove(&owner);
        }
        drop(inner);

        if hit.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_hit("local");
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_miss("local");
        }
        hit
    }

    pub fn insert(&self, owner: OwnerId, payload: T) {
        let mut inner = self.inner.lock();
        self.insert_locked(&mut inner, owner, payload);
    }

    /// Returns the cached projection for `owner`, or runs `loader` and caches
    /// its result.
    pub async fn get_or_load<F, Fut, E>(&self, owner: OwnerId, loader: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(owner) {
            return Ok(hit);
        }

        let epoch = self.inner.lock().epoch;
        let payload = loader().await?;

        let mut inner = self.inner.lock();
        if inner.epoch == epoch {
            self.insert_locked(&mut inner, owner, payload.clone());
        } else {
            tracing::debug!(owner = %owner, "L1 load raced an invalidation; not cached");
        }
        Ok(payload)
    }

    pub fn invalidate(&self, owner: OwnerId) -> bool {
        let mut inner = self.inner.lock();
        inner.epoch = inner.epoch.wrapping_add(1);
        let removed = inner.entries.remove(&owner).is_some();
        let size = inner.entries.len();
        drop(inner);

        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        metrics::set_cache_entries("local", size);
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.epoch = inner.epoch.wrapping_add(1);
        inner.entries.clear();
        drop(inner);
        metrics::set_cache_entries("local", 0);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LocalCacheStats {
        LocalCacheStats {
            entries: self.len(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
        }
    }

    fn insert_locked(&self, inner: &mut Inner<T>, owner: OwnerId, payload: T) {
        let now = Instant::now();
        if !inner.entries.contains_key(&owner) && inner.entries.len() >= self.max_entries {
            let evicted = Self::evict(&mut inner.entries, now);
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        inner.entries.insert(
            owner,
            CacheEntry {
                payload,
                inserted_at: now,
                expires_at: expiry_after(now, self.ttl),
            },
        );
        metrics::set_cache_entries("local", inner.entries.len());
    }

    /// Drops expired entries; if none were expired, drops the oldest one.
    fn evict(entries: &mut HashMap<OwnerId, CacheEntry<T>>, now: Instant) -> u64 {
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let expired = before - entries.len();
        if expired > 0 {
            return expired as u64;
        }

        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.inserted_at)
            .map(|(owner, _)| *owner);
        match oldest {
            Some(owner) => {
                entries.remove(&owner);
                1
            }
            None => 0,
        }
    }
}

impl<T: Clone + Send> LocalTier for LocalCache<T> {
    fn invalidate_owner(&self, owner: OwnerId) -> Result<bool, CacheError> {
        Ok(self.invalidate(owner))
    }
}
