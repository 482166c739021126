//! Cache-aside read path over the remote tier.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use libris_storage::OwnerId;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::TtlConfig;
use crate::error::{CacheError, CacheResult};
use crate::health::HealthReporter;
use crate::invalidation::InvalidationGenerations;
use crate::keys::{KeySpace, ReadTarget};
use crate::metrics;
use crate::remote::RemoteCacheClient;

/// Where a value was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    Database,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Database => "database",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub source: Source,
}

pub struct CacheAsideOrchestrator {
    keys: KeySpace,
    remote: Arc<RemoteCacheClient>,
    health: HealthReporter,
    ttl: TtlConfig,
    generations: InvalidationGenerations,
}

impl CacheAsideOrchestrator {
    /// `generations` must come from the coordinator invalidating the same
    /// key space, see [`CacheInvalidationCoordinator::generations`].
    ///
    /// [`CacheInvalidationCoordinator::generations`]: crate::invalidation::CacheInvalidationCoordinator::generations
    pub fn new(
        keys: KeySpace,
        remote: Arc<RemoteCacheClient>,
        health: HealthReporter,
        ttl: TtlConfig,
        generations: InvalidationGenerations,
    ) -> Self {
        Self {
            keys,
            remote,
            health,
            ttl,
            generations,
        }
    }

    /// Serves `target` for `owner` from the remote tier, or runs `compute`
    /// and writes the result back.
    ///
    /// Falls back to `compute` on a miss, on a transport failure, on a closed
    /// client, or on any remote error while the tier is degraded. Other
    /// remote errors against a healthy tier are returned. A failed
    /// write-back never fails the read. A value computed while the owner was
    /// invalidated is returned but not written back.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        owner: OwnerId,
        target: ReadTarget,
        compute: F,
    ) -> CacheResult<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let key = self.keys.key(owner, target);
        let category = target.category();

        match self.remote.get_json::<T>(&key).await {
            Ok(value) => {
                metrics::record_read(category, Source::Cache.as_str());
                return Ok(Fetched {
                    value,
                    source: Source::Cache,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) if self.can_fall_back(&e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Remote cache unavailable; reading from store"
                );
            }
            Err(e) => {
                tracing::error!(
                    key = %key,
                    error = %e,
                    "Remote cache read failed on healthy tier"
                );
                return Err(e);
            }
        }

        let generation = self.generations.current(owner);
        let value = compute().await?;
        metrics::record_read(category, Source::Database.as_str());

        if self.generations.current(owner) != generation {
            tracing::debug!(key = %key, "Read raced an invalidation; skipping write-back");
        } else if let Err(e) = self
            .remote
            .set_json(&key, &value, self.ttl.ttl_for(category))
            .await
        {
            self.write_back_failed(&key, category, &e);
        } else if self.generations.current(owner) != generation {
            // An invalidation landed between the check and the write.
            if let Err(e) = self.remote.delete(std::slice::from_ref(&key)).await {
                self.write_back_failed(&key, category, &e);
            }
        }

        Ok(Fetched {
            value,
            source: Source::Database,
        })
    }

    fn can_fall_back(&self, e: &CacheError) -> bool {
        e.is_transport() || matches!(e, CacheError::Closed) || self.health.is_degraded()
    }

    fn write_back_failed(&self, key: &str, category: &'static str, e: &CacheError) {
        tracing::warn!(key, category, error = %e, "Cache write-back failed");
        metrics::record_write_back_failure(category);
    }
}
