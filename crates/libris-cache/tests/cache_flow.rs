//! End-to-end read/write flow: tracked store writes, post-commit
//! invalidation, cache-aside reads.
//!
//! Runs against the in-memory store and the in-process remote tier.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use libris_cache::{
    CacheAsideOrchestrator, CacheConfig, CacheError, CacheInvalidationCoordinator, ClientOptions,
    HealthMonitor, KeySpace, LocalCache, MemoryTier, ReadTarget, RemoteCacheClient, Source,
    validate_key_set,
};
use libris_db_memory::InMemoryLibraryStore;
use libris_storage::{
    ItemId, ItemRecord, LibraryOverview, LibraryStore, OwnerId, StorageError, TrackedStore,
    organize,
};

struct Harness {
    tier: Arc<MemoryTier>,
    local: Arc<LocalCache<LibraryOverview>>,
    store: Arc<TrackedStore<InMemoryLibraryStore>>,
    monitor: HealthMonitor,
    coordinator: Arc<CacheInvalidationCoordinator>,
    reads: CacheAsideOrchestrator,
}

fn seed_items() -> Vec<ItemRecord> {
    vec![
        ItemRecord::new(ItemId(41), OwnerId(7), "Dune", "Frank Herbert", "paperback", "sci-fi")
            .with_tags(["classic"]),
        ItemRecord::new(ItemId(42), OwnerId(7), "Hyperion", "Dan Simmons", "epub", "sci-fi"),
        ItemRecord::new(ItemId(50), OwnerId(8), "Emma", "Jane Austen", "hardcover", "novel"),
    ]
}

fn harness() -> Harness {
    let mut config = CacheConfig::default();
    config.health.timeout_ms = 50;
    config.health.retry_ceiling = 3;

    let tier = Arc::new(MemoryTier::new());
    let client = Arc::new(RemoteCacheClient::new(
        tier.clone(),
        ClientOptions::from_config(&config),
    ));
    let monitor = HealthMonitor::new(client.clone(), &config.health, &config.pool);
    let keys = KeySpace::new(config.keys.domain_prefix.clone());
    let local = Arc::new(LocalCache::from_config(&config.local));
    let coordinator = Arc::new(CacheInvalidationCoordinator::new(
        keys.clone(),
        local.clone(),
        client.clone(),
    ));
    let store = Arc::new(TrackedStore::new(
        InMemoryLibraryStore::with_items(seed_items()),
        coordinator.clone(),
    ));
    let reads = CacheAsideOrchestrator::new(
        keys,
        client,
        monitor.reporter(),
        config.ttl.clone(),
        coordinator.generations(),
    );

    Harness {
        tier,
        local,
        store,
        monitor,
        coordinator,
        reads,
    }
}

impl Harness {
    async fn homepage(&self, owner: OwnerId) -> (LibraryOverview, Source) {
        let store = self.store.clone();
        let fetched = self
            .reads
            .get_or_compute(owner, ReadTarget::Homepage, || async move {
                let items = store.list_items(owner).await?;
                Ok::<_, CacheError>(organize(&items))
            })
            .await
            .unwrap();
        (fetched.value, fetched.source)
    }
}

#[tokio::test]
async fn test_homepage_miss_then_hit() {
    let h = harness();

    let (first, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Database);
    assert_eq!(first.total, 2);

    let (second, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Cache);
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_cached_payload_matches_fresh_compute() {
    let h = harness();
    h.homepage(OwnerId(7)).await;
    let (cached, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Cache);

    let fresh = organize(&h.store.list_items(OwnerId(7)).await.unwrap());
    assert_eq!(cached, fresh);
}

#[tokio::test]
async fn test_invalidate_then_read_goes_to_database() {
    let h = harness();
    h.homepage(OwnerId(7)).await;

    h.coordinator
        .invalidate(ItemId(42), OwnerId(7))
        .await
        .unwrap();

    let (_, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Database);
}

#[tokio::test]
async fn test_commit_during_miss_does_not_repopulate_stale_value() {
    let h = harness();
    let store = h.store.clone();

    // The read loads pre-write data, then the write commits and invalidates
    // before the read gets to write back.
    let stale = h
        .reads
        .get_or_compute(OwnerId(7), ReadTarget::Homepage, || async move {
            let items = store.list_items(OwnerId(7)).await?;
            let mut tx = store.begin_transaction().await?;
            tx.set_favorite(OwnerId(7), ItemId(42), true).await?;
            tx.commit().await?;
            Ok::<_, CacheError>(organize(&items))
        })
        .await
        .unwrap();
    assert!(stale.value.favorites.is_empty());
    assert_eq!(stale.source, Source::Database);

    let (after, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Database);
    assert_eq!(after.favorites.len(), 1);
}

#[tokio::test]
async fn test_committed_write_is_visible_on_next_read() {
    let h = harness();
    let (before, _) = h.homepage(OwnerId(7)).await;
    assert!(before.favorites.is_empty());

    let mut tx = h.store.begin_transaction().await.unwrap();
    tx.set_favorite(OwnerId(7), ItemId(42), true).await.unwrap();
    tx.commit().await.unwrap();

    let (after, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Database);
    assert_eq!(after.favorites.len(), 1);
    assert_eq!(after.favorites[0].id, ItemId(42));
}

#[tokio::test]
async fn test_rolled_back_write_does_not_invalidate() {
    let h = harness();
    h.homepage(OwnerId(7)).await;
    let deletes = h.tier.del_call_count();

    let mut tx = h.store.begin_transaction().await.unwrap();
    tx.set_favorite(OwnerId(7), ItemId(42), true).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(h.tier.del_call_count(), deletes);
    let (_, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Cache);
}

#[tokio::test]
async fn test_write_for_one_owner_keeps_other_owner_cached() {
    let h = harness();
    h.homepage(OwnerId(7)).await;
    h.homepage(OwnerId(8)).await;

    let mut tx = h.store.begin_transaction().await.unwrap();
    tx.set_tags(OwnerId(7), ItemId(41), vec!["reread".to_string()])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let (_, source) = h.homepage(OwnerId(8)).await;
    assert_eq!(source, Source::Cache);
    let (_, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Database);
}

#[tokio::test]
async fn test_invalidation_clears_l1_projection() {
    let h = harness();
    let store = h.store.clone();
    let overview = h
        .local
        .get_or_load(OwnerId(7), || async move {
            let items = store.list_items(OwnerId(7)).await?;
            Ok::<_, CacheError>(organize(&items))
        })
        .await
        .unwrap();
    assert_eq!(overview.total, 2);
    assert_eq!(h.local.len(), 1);

    let report = h
        .coordinator
        .invalidate(ItemId(41), OwnerId(7))
        .await
        .unwrap();
    assert!(report.l1_cleared);
    assert!(h.local.get(OwnerId(7)).is_none());
}

#[tokio::test]
async fn test_repeated_invalidation_is_idempotent() {
    let h = harness();
    h.homepage(OwnerId(7)).await;

    let first = h.coordinator.invalidate(ItemId(42), OwnerId(7)).await.unwrap();
    let second = h.coordinator.invalidate(ItemId(42), OwnerId(7)).await.unwrap();

    assert_eq!(first.keys, second.keys);
    assert_eq!(first.removed, 1);
    assert_eq!(second.removed, 0);
    for key in &first.keys {
        assert!(!h.tier.contains_key(key));
    }
}

#[tokio::test]
async fn test_empty_key_set_is_rejected_without_remote_calls() {
    let h = harness();
    let calls = h.tier.call_count();

    assert!(matches!(
        validate_key_set(&[]),
        Err(CacheError::Validation { .. })
    ));
    let err = h.coordinator.purge(&[]).await.unwrap_err();
    assert!(matches!(err, CacheError::Validation { .. }));
    assert_eq!(h.tier.call_count(), calls);
}

#[tokio::test]
async fn test_degraded_tier_falls_back_on_unexpected_error() {
    let h = harness();
    h.homepage(OwnerId(7)).await;

    h.tier.set_offline(true);
    for _ in 0..3 {
        h.monitor.probe_once().await;
    }
    let status = h.monitor.get_health_status();
    assert!(status.degraded);
    assert!(!status.is_healthy);

    h.tier.set_offline(false);
    h.tier.set_protocol_error(Some("ERR unexpected reply".to_string()));

    let (overview, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Database);
    assert_eq!(overview.total, 2);
}

#[tokio::test]
async fn test_slow_remote_tier_degrades_to_store_reads() {
    let h = harness();
    h.tier.set_latency(Some(Duration::from_secs(2)));

    let started = std::time::Instant::now();
    let (_, source) = h.homepage(OwnerId(7)).await;
    assert_eq!(source, Source::Database);
    // Read deadline plus a write-back deadline, nowhere near the injected latency.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_concurrent_reads_share_one_cached_value() {
    let h = harness();
    h.homepage(OwnerId(7)).await;

    let reads = join_all((0..16).map(|_| h.homepage(OwnerId(7)))).await;
    let expected = &reads[0].0;
    for (overview, source) in &reads {
        assert_eq!(*source, Source::Cache);
        assert_eq!(overview, expected);
    }
}

#[tokio::test]
async fn test_store_failure_surfaces_from_compute() {
    let h = harness();
    let store = h.store.clone();
    let missing = h
        .reads
        .get_or_compute(OwnerId(7), ReadTarget::Detail(ItemId(999)), || async move {
            let item = store.get_item(OwnerId(7), ItemId(999)).await?;
            item.ok_or_else(|| CacheError::Store(StorageError::not_found(7, 999)))
        })
        .await;
    assert!(matches!(missing, Err(CacheError::Store(_))));

    let store = h.store.clone();
    let found = h
        .reads
        .get_or_compute(OwnerId(7), ReadTarget::Detail(ItemId(41)), || async move {
            let item = store.get_item(OwnerId(7), ItemId(41)).await?;
            item.ok_or_else(|| CacheError::Store(StorageError::not_found(7, 41)))
        })
        .await;
    let found = tokio_test::assert_ok!(found);
    assert_eq!(found.value.title, "Dune");
    assert_eq!(found.source, Source::Database);
}
