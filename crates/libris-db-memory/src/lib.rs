//! In-memory store backend for Libris.
//!
//! Provides an implementation of [`LibraryStore`] whose transactions stage
//! their operations and apply them atomically on commit, so rollback and
//! failed commits leave no trace. Used by tests and local tooling.
//!
//! # Example
//!
//! ```ignore
//! use libris_db_memory::InMemoryLibraryStore;
//! use libris_storage::{ItemId, ItemRecord, LibraryStore, OwnerId};
//!
//! let store = InMemoryLibraryStore::new();
//! let mut tx = store.begin_transaction().await?;
//! tx.upsert_item(ItemRecord::new(ItemId(1), OwnerId(7), "Dune", "Herbert", "epub", "sf")).await?;
//! tx.commit().await?;
//! ```

pub mod storage;

pub use libris_storage::{LibraryStore, StorageError};
pub use storage::{InMemoryLibraryStore, TransactionStats};

/// Creates a new shared in-memory store.
pub fn create_store() -> libris_storage::DynStore {
    std::sync::Arc::new(InMemoryLibraryStore::new())
}
