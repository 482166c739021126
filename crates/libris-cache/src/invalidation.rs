//! Post-commit cache invalidation.
//!
//! For each committed `(item, owner)` pair the coordinator clears the L1
//! entry for the owner, then deletes every L2 key the mutation can make
//! stale in a single multi-key delete. The L1 step always runs first.
//!
//! Every invalidation also bumps the owner's generation before touching L2.
//! Readers snapshot it before computing and refuse to write back a value
//! computed under an older generation.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use libris_storage::{InvalidationEvent, InvalidationSink, ItemId, OwnerId};

use crate::error::{CacheError, CacheResult};
use crate::keys::{KeySpace, validate_key_set};
use crate::local::LocalTier;
use crate::metrics;
use crate::remote::RemoteCacheClient;

/// Outcome of one invalidation.
#[derive(Debug, Clone)]
pub struct InvalidationReport {
    /// The L2 keys submitted for deletion.
    pub keys: Vec<String>,
    /// L2 keys that existed and were removed.
    pub removed: u64,
    /// Whether an L1 entry existed for the owner.
    pub l1_cleared: bool,
    /// L1 failure, if any. L2 deletion still ran.
    pub l1_error: Option<CacheError>,
}

/// Per-owner invalidation counters shared between the coordinator and the
/// read path.
#[derive(Debug, Clone, Default)]
pub struct InvalidationGenerations {
    inner: Arc<DashMap<OwnerId, u64>>,
}

impl InvalidationGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, owner: OwnerId) -> u64 {
        self.inner.get(&owner).map(|g| *g).unwrap_or(0)
    }

    /// Advances the owner's generation and returns the new value.
    pub fn bump(&self, owner: OwnerId) -> u64 {
        let mut generation = self.inner.entry(owner).or_insert(0);
        *generation = generation.wrapping_add(1);
        *generation
    }
}

pub struct CacheInvalidationCoordinator {
    keys: KeySpace,
    local: Arc<dyn LocalTier>,
    remote: Arc<RemoteCacheClient>,
    generations: InvalidationGenerations,
}

impl CacheInvalidationCoordinator {
    pub fn new(keys: KeySpace, local: Arc<dyn LocalTier>, remote: Arc<RemoteCacheClient>) -> Self {
        Self {
            keys,
            local,
            remote,
            generations: InvalidationGenerations::new(),
        }
    }

    /// The generations this coordinator advances. Hand them to the
    /// `CacheAsideOrchestrator` serving the same key space.
    pub fn generations(&self) -> InvalidationGenerations {
        self.generations.clone()
    }

    /// Invalidates everything a committed mutation of `item` can affect.
    ///
    /// Must be called after the store transaction committed, never before
    /// and never on rollback. Deleting keys that are already absent is not
    /// an error, so repeating a call is harmless.
    pub async fn invalidate(&self, item: ItemId, owner: OwnerId) -> CacheResult<InvalidationReport> {
        let (l1_cleared, l1_error) = match self.local.invalidate_owner(owner) {
            Ok(cleared) => (cleared, None),
            Err(e) => {
                tracing::error!(owner = %owner, error = %e, "L1 invalidation failed");
                metrics::record_local_invalidation_failure();
                (false, Some(e))
            }
        };

        self.generations.bump(owner);
        let keys = self.keys.fan_out(item, owner);
        let removed = self.purge(&keys).await?;

        tracing::debug!(
            item = %item,
            owner = %owner,
            keys = keys.len(),
            removed,
            "Cache invalidated"
        );

        Ok(InvalidationReport {
            keys,
            removed,
            l1_cleared,
            l1_error,
        })
    }

    /// Validates `keys` and deletes them from L2 in one call. A malformed
    /// set is rejected before any remote call is made.
    pub async fn purge(&self, keys: &[String]) -> CacheResult<u64> {
        validate_key_set(keys)?;
        let removed = self.remote.delete(keys).await?;
        metrics::record_invalidation(keys.len());
        Ok(removed)
    }

    /// Invalidates a committed batch in order. Stops at the first L2 error.
    pub async fn invalidate_events(
        &self,
        events: &[InvalidationEvent],
    ) -> CacheResult<Vec<InvalidationReport>> {
        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            reports.push(self.invalidate(event.item_id, event.owner_id).await?);
        }
        Ok(reports)
    }
}

#[async_trait]
impl InvalidationSink for CacheInvalidationCoordinator {
    async fn on_committed(&self, events: &[InvalidationEvent]) {
        // The store already holds the truth; an L2 failure here leaves stale
        // entries bounded by their TTL.
        if let Err(e) = self.invalidate_events(events).await {
            tracing::error!(
                events = events.len(),
                error = %e,
                "Post-commit cache invalidation failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::keys::ReadTarget;
    use crate::local::LocalCache;
    use crate::remote::{ClientOptions, MemoryTier};

    struct BrokenLocal;

    impl LocalTier for BrokenLocal {
        fn invalidate_owner(&self, _owner: OwnerId) -> Result<bool, CacheError> {
            Err(CacheError::validation("l1 unavailable"))
        }
    }

    fn coordinator(
        local: Arc<dyn LocalTier>,
        tier: Arc<MemoryTier>,
    ) -> CacheInvalidationCoordinator {
        let client = Arc::new(RemoteCacheClient::new(tier, ClientOptions::default()));
        CacheInvalidationCoordinator::new(KeySpace::new("library:"), local, client)
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_tiers() {
        let tier = Arc::new(MemoryTier::new());
        let ks = KeySpace::new("library:");
        let homepage = ks.key(OwnerId(7), ReadTarget::Homepage);
        let detail = ks.key(OwnerId(7), ReadTarget::Detail(ItemId(42)));
        tier.seed(homepage.clone(), "{}", Duration::from_secs(60));
        tier.seed(detail.clone(), "{}", Duration::from_secs(60));

        let local = Arc::new(LocalCache::new(Duration::from_secs(60), 10));
        local.insert(OwnerId(7), "overview".to_string());

        let coordinator = coordinator(local.clone(), tier.clone());
        let report = coordinator.invalidate(ItemId(42), OwnerId(7)).await.unwrap();

        assert!(report.l1_cleared);
        assert!(report.l1_error.is_none());
        assert_eq!(report.keys.len(), 10);
        assert_eq!(report.removed, 2);
        assert!(local.is_empty());
        assert!(!tier.contains_key(&homepage));
        assert!(!tier.contains_key(&detail));
        assert_eq!(tier.del_call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let tier = Arc::new(MemoryTier::new());
        let local = Arc::new(LocalCache::<String>::new(Duration::from_secs(60), 10));
        let coordinator = coordinator(local, tier.clone());

        let first = coordinator.invalidate(ItemId(42), OwnerId(7)).await.unwrap();
        let second = coordinator.invalidate(ItemId(42), OwnerId(7)).await.unwrap();
        assert_eq!(first.keys, second.keys);
        assert_eq!(second.removed, 0);
    }

    #[tokio::test]
    async fn test_empty_key_set_makes_no_remote_call() {
        let tier = Arc::new(MemoryTier::new());
        let local = Arc::new(LocalCache::<String>::new(Duration::from_secs(60), 10));
        let coordinator = coordinator(local, tier.clone());

        let err = coordinator.purge(&[]).await.unwrap_err();
        assert!(matches!(err, CacheError::Validation { .. }));
        assert_eq!(tier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_l1_failure_is_reported_and_l2_still_purged() {
        let tier = Arc::new(MemoryTier::new());
        let key = KeySpace::new("library:").key(OwnerId(7), ReadTarget::List);
        tier.seed(key.clone(), "[]", Duration::from_secs(60));

        let coordinator = coordinator(Arc::new(BrokenLocal), tier.clone());
        let report = coordinator.invalidate(ItemId(1), OwnerId(7)).await.unwrap();

        assert!(matches!(report.l1_error, Some(CacheError::Validation { .. })));
        assert!(!tier.contains_key(&key));
    }

    #[tokio::test]
    async fn test_invalidate_advances_owner_generation() {
        let tier = Arc::new(MemoryTier::new());
        let local = Arc::new(LocalCache::<String>::new(Duration::from_secs(60), 10));
        let coordinator = coordinator(local, tier.clone());
        let generations = coordinator.generations();

        assert_eq!(generations.current(OwnerId(7)), 0);
        coordinator.invalidate(ItemId(42), OwnerId(7)).await.unwrap();
        coordinator.invalidate(ItemId(43), OwnerId(7)).await.unwrap();
        assert_eq!(generations.current(OwnerId(7)), 2);
        assert_eq!(generations.current(OwnerId(8)), 0);

        // Advanced even when the L2 delete fails.
        tier.set_offline(true);
        let _ = coordinator.invalidate(ItemId(42), OwnerId(8)).await;
        assert_eq!(generations.current(OwnerId(8)), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_propagates() {
        let tier = Arc::new(MemoryTier::new());
        tier.set_offline(true);
        let local = Arc::new(LocalCache::<String>::new(Duration::from_secs(60), 10));
        local.insert(OwnerId(7), "overview".to_string());
        let coordinator = coordinator(local.clone(), tier);

        let err = coordinator.invalidate(ItemId(1), OwnerId(7)).await.unwrap_err();
        assert!(err.is_transport());
        // L1 was cleared before the remote attempt.
        assert!(local.is_empty());
    }
}
