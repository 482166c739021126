//! Store and transaction wrappers that report committed mutations.
//!
//! `TrackedStore` hands out `TrackedTransaction`s. Each tracked transaction
//! remembers which `(item, owner)` pairs it changed and forwards them to an
//! [`InvalidationSink`] only after the inner commit has succeeded.
//!
//! ```ignore
//! let store = TrackedStore::new(postgres_store, coordinator.clone());
//!
//! let mut tx = store.begin_transaction().await?;
//! tx.set_tags(owner, item, vec!["classic".into()]).await?;
//! tx.commit().await?; // coordinator.on_committed([{item, owner}]) runs here
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;
use crate::traits::{InvalidationSink, LibraryStore, Transaction};
use crate::types::{InvalidationEvent, ItemId, ItemRecord, OwnerId};

/// A store wrapper whose transactions notify a sink after commit.
///
/// Reads are delegated untouched.
pub struct TrackedStore<S: LibraryStore> {
    inner: S,
    sink: Arc<dyn InvalidationSink>,
}

impl<S: LibraryStore> TrackedStore<S> {
    pub fn new(inner: S, sink: Arc<dyn InvalidationSink>) -> Self {
        Self { inner, sink }
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: LibraryStore> LibraryStore for TrackedStore<S> {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let inner_tx = self.inner.begin_transaction().await?;
        Ok(Box::new(TrackedTransaction::new(inner_tx, self.sink.clone())))
    }

    async fn list_items(&self, owner_id: OwnerId) -> Result<Vec<ItemRecord>, StorageError> {
        self.inner.list_items(owner_id).await
    }

    async fn get_item(
        &self,
        owner_id: OwnerId,
        item_id: ItemId,
    ) -> Result<Option<ItemRecord>, StorageError> {
        self.inner.get_item(owner_id, item_id).await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

impl<S: LibraryStore> std::fmt::Debug for TrackedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedStore")
            .field("backend", &self.inner.backend_name())
            .finish()
    }
}

/// A transaction wrapper that collects touched items and reports them on commit.
pub struct TrackedTransaction {
    inner: Box<dyn Transaction>,
    sink: Arc<dyn InvalidationSink>,
    /// Distinct `(item, owner)` pairs, in first-touch order.
    touched: Vec<(ItemId, OwnerId)>,
}

impl TrackedTransaction {
    pub fn new(inner: Box<dyn Transaction>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self {
            inner,
            sink,
            touched: Vec::new(),
        }
    }

    fn touch(&mut self, item_id: ItemId, owner_id: OwnerId) {
        if !self.touched.contains(&(item_id, owner_id)) {
            self.touched.push((item_id, owner_id));
        }
    }

    /// Number of distinct items queued for invalidation.
    pub fn pending(&self) -> usize {
        self.touched.len()
    }
}

#[async_trait]
impl Transaction for TrackedTransaction {
    async fn upsert_item(&mut self, record: ItemRecord) -> Result<(), StorageError> {
        let (item_id, owner_id) = (record.id, record.owner_id);
        self.inner.upsert_item(record).await?;
        self.touch(item_id, owner_id);
        Ok(())
    }

    async fn delete_item(
        &mut self,
        owner_id: OwnerId,
        item_id: ItemId,
    ) -> Result<(), StorageError> {
        self.inner.delete_item(owner_id, item_id).await?;
        self.touch(item_id, owner_id);
        Ok(())
    }

    async fn set_favorite(
        &mut self,
        owner_id: OwnerId,
        item_id: ItemId,
        favorite: bool,
    ) -> Result<(), StorageError> {
        self.inner.set_favorite(owner_id, item_id, favorite).await?;
        self.touch(item_id, owner_id);
        Ok(())
    }

    async fn set_tags(
        &mut self,
        owner_id: OwnerId,
        item_id: ItemId,
        tags: Vec<String>,
    ) -> Result<(), StorageError> {
        self.inner.set_tags(owner_id, item_id, tags).await?;
        self.touch(item_id, owner_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let TrackedTransaction {
            inner,
            sink,
            touched,
        } = *self;

        inner.commit().await?;

        if touched.is_empty() {
            return Ok(());
        }

        // Events are stamped after the commit returned.
        let events: Vec<InvalidationEvent> = touched
            .into_iter()
            .map(|(item_id, owner_id)| InvalidationEvent::new(item_id, owner_id))
            .collect();
        sink.on_committed(&events).await;
        debug!(count = events.len(), "Dispatched post-commit invalidation events");

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.inner.rollback().await
    }
}

impl std::fmt::Debug for TrackedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedTransaction")
            .field("pending", &self.touched.len())
            .finish()
    }
}
