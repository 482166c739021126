//! Store traits.
//!
//! The cache core never sees SQL. It only needs to read an owner's items on a
//! cache miss and to learn which `(item, owner)` pairs a committed
//! transaction touched.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{InvalidationEvent, ItemId, ItemRecord, OwnerId};

/// The transactional source of truth for library items.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Begins a new transaction. The transaction must be either committed or
    /// rolled back.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if a transaction cannot be started.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;

    /// Lists all items owned by `owner_id`, ordered by item id.
    async fn list_items(&self, owner_id: OwnerId) -> Result<Vec<ItemRecord>, StorageError>;

    /// Reads a single item. Returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing items.
    async fn get_item(
        &self,
        owner_id: OwnerId,
        item_id: ItemId,
    ) -> Result<Option<ItemRecord>, StorageError>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// A transaction spanning the item table and its associated collections.
///
/// Operations are isolated from readers until `commit` succeeds.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Inserts or replaces an item together with its tags and favorite flag.
    async fn upsert_item(&mut self, record: ItemRecord) -> Result<(), StorageError>;

    /// Deletes an item and its collection memberships.
    async fn delete_item(&mut self, owner_id: OwnerId, item_id: ItemId)
    -> Result<(), StorageError>;

    /// Adds or removes an item from the owner's favorites.
    async fn set_favorite(
        &mut self,
        owner_id: OwnerId,
        item_id: ItemId,
        favorite: bool,
    ) -> Result<(), StorageError>;

    /// Replaces the tag set of an item.
    async fn set_tags(
        &mut self,
        owner_id: OwnerId,
        item_id: ItemId,
        tags: Vec<String>,
    ) -> Result<(), StorageError>;

    /// Commits all operations in this transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if the commit fails. Nothing
    /// is applied in that case.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Rolls back all operations in this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Receiver of post-commit invalidation events.
#[async_trait]
pub trait InvalidationSink: Send + Sync {
    /// Called once per successful commit with one event per distinct
    /// `(item, owner)` pair the transaction changed.
    async fn on_committed(&self, events: &[InvalidationEvent]);
}
