use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use libris_storage::{ItemId, ItemRecord, LibraryStore, OwnerId, StorageError, Transaction};
use tokio::sync::RwLock;
use tracing::debug;

type ItemMap = BTreeMap<(OwnerId, ItemId), ItemRecord>;

/// In-memory library store.
///
/// Rows are keyed by `(owner, item)` so an owner's items are contiguous and
/// come back ordered by item id.
#[derive(Debug, Default)]
pub struct InMemoryLibraryStore {
    data: Arc<RwLock<ItemMap>>,
    stats: Arc<TransactionCounters>,
    /// When set, the next commit fails and the flag resets.
    fail_next_commit: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct TransactionCounters {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of transaction outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub committed: u64,
    pub rolled_back: u64,
    pub failed: u64,
}

impl InMemoryLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `items`.
    pub fn with_items(items: impl IntoIterator<Item = ItemRecord>) -> Self {
        let map: ItemMap = items
            .into_iter()
            .map(|item| ((item.owner_id, item.id), item))
            .collect();
        Self {
            data: Arc::new(RwLock::new(map)),
            ..Self::default()
        }
    }

    /// Makes the next commit fail with a transaction error.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            committed: self.stats.committed.load(Ordering::Relaxed),
            rolled_back: self.stats.rolled_back.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl LibraryStore for InMemoryLibraryStore {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        Ok(Box::new(MemoryTransaction {
            data: self.data.clone(),
            stats: self.stats.clone(),
            fail_next_commit: self.fail_next_commit.clone(),
            operations: Vec::new(),
        }))
    }

    async fn list_items(&self, owner_id: OwnerId) -> Result<Vec<ItemRecord>, StorageError> {
        let data = self.data.read().await;
        let items = data
            .range((owner_id, ItemId(i64::MIN))..=(owner_id, ItemId(i64::MAX)))
            .map(|(_, item)| item.clone())
            .collect();
        Ok(items)
    }

    async fn get_item(
        &self,
        owner_id: OwnerId,
        item_id: ItemId,
    ) -> Result<Option<ItemRecord>, StorageError> {
        Ok(self.data.read().await.get(&(owner_id, item_id)).cloned())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug)]
enum TransactionOp {
    Upsert(ItemRecord),
    Delete(OwnerId, ItemId),
    SetFavorite(OwnerId, ItemId, bool),
    SetTags(OwnerId, ItemId, Vec<String>),
}

/// A staged transaction. Nothing is visible to readers until commit.
#[derive(Debug)]
struct MemoryTransaction {
    data: Arc<RwLock<ItemMap>>,
    stats: Arc<TransactionCounters>,
    fail_next_commit: Arc<AtomicBool>,
    operations: Vec<TransactionOp>,
}

fn apply(map: &mut ItemMap, op: TransactionOp) -> Result<(), StorageError> {
    match op {
        TransactionOp::Upsert(record) => {
            map.insert((record.owner_id, record.id), record);
        }
        TransactionOp::Delete(owner_id, item_id) => {
            map.remove(&(owner_id, item_id))
                .ok_or_else(|| StorageError::not_found(owner_id, item_id))?;
        }
        TransactionOp::SetFavorite(owner_id, item_id, favorite) => {
            map.get_mut(&(owner_id, item_id))
                .ok_or_else(|| StorageError::not_found(owner_id, item_id))?
                .favorite = favorite;
        }
        TransactionOp::SetTags(owner_id, item_id, tags) => {
            map.get_mut(&(owner_id, item_id))
                .ok_or_else(|| StorageError::not_found(owner_id, item_id))?
                .tags = tags;
        }
    }
    Ok(())
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn upsert_item(&mut self, record: ItemRecord) -> Result<(), StorageError> {
        if record.title.trim().is_empty() {
            return Err(StorageError::invalid_item("title must not be empty"));
        }
        self.operations.push(TransactionOp::Upsert(record));
        Ok(())
    }

    async fn delete_item(
        &mut self,
        owner_id: OwnerId,
        item_id: ItemId,
    ) -> Result<(), StorageError> {
        self.operations.push(TransactionOp::Delete(owner_id, item_id));
        Ok(())
    }

    async fn set_favorite(
        &mut self,
        owner_id: OwnerId,
        item_id: ItemId,
        favorite: bool,
    ) -> Result<(), StorageError> {
        self.operations
            .push(TransactionOp::SetFavorite(owner_id, item_id, favorite));
        Ok(())
    }

    async fn set_tags(
        &mut self,
        owner_id: OwnerId,
        item_id: ItemId,
        tags: Vec<String>,
    ) -> Result<(), StorageError> {
        self.operations
            .push(TransactionOp::SetTags(owner_id, item_id, tags));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryTransaction {
            data,
            stats,
            fail_next_commit,
            operations,
        } = *self;

        if fail_next_commit.swap(false, Ordering::SeqCst) {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::transaction_error("commit rejected"));
        }

        let mut guard = data.write().await;
        // Apply to a scratch copy so a failing operation leaves the store untouched.
        let mut next = guard.clone();
        let op_count = operations.len();
        for op in operations {
            if let Err(e) = apply(&mut next, op) {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        }
        *guard = next;
        stats.committed.fetch_add(1, Ordering::Relaxed);
        debug!(operations = op_count, "memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dune() -> ItemRecord {
        ItemRecord::new(ItemId(42), OwnerId(7), "Dune", "Herbert", "paperback", "sf")
    }

    #[tokio::test]
    async fn test_commit_makes_changes_visible() {
        let store = InMemoryLibraryStore::new();
        let mut tx = store.begin_transaction().await.unwrap();
        tx.upsert_item(dune()).await.unwrap();
        assert!(store.is_empty().await);

        tx.commit().await.unwrap();
        let item = store.get_item(OwnerId(7), ItemId(42)).await.unwrap();
        assert_eq!(item.map(|i| i.title), Some("Dune".to_string()));
        assert_eq!(store.stats().committed, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let store = InMemoryLibraryStore::new();
        let mut tx = store.begin_transaction().await.unwrap();
        tx.upsert_item(dune()).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(store.stats().rolled_back, 1);
    }

    #[tokio::test]
    async fn test_failed_operation_aborts_whole_commit() {
        let store = InMemoryLibraryStore::new();
        let mut tx = store.begin_transaction().await.unwrap();
        tx.upsert_item(dune()).await.unwrap();
        tx.set_favorite(OwnerId(7), ItemId(99), true).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.is_empty().await);
        assert_eq!(store.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_list_items_is_owner_scoped_and_ordered() {
        let store = InMemoryLibraryStore::with_items([
            ItemRecord::new(ItemId(3), OwnerId(7), "c", "a", "f", "g"),
            ItemRecord::new(ItemId(1), OwnerId(7), "a", "a", "f", "g"),
            ItemRecord::new(ItemId(2), OwnerId(8), "b", "a", "f", "g"),
        ]);
        let ids: Vec<_> = store
            .list_items(OwnerId(7))
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![ItemId(1), ItemId(3)]);
    }

    #[tokio::test]
    async fn test_empty_title_rejected() {
        let store = InMemoryLibraryStore::new();
        let mut tx = store.begin_transaction().await.unwrap();
        let mut record = dune();
        record.title = "  ".into();
        assert!(tx.upsert_item(record).await.is_err());
    }
}
