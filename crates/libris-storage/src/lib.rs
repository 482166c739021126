//! # libris-storage
//!
//! Store abstraction for the Libris library service.
//!
//! The relational schema lives behind [`LibraryStore`] and [`Transaction`];
//! this crate carries no SQL. What the cache layer needs from it is narrow:
//!
//! - read an owner's items when a cached projection is missing
//! - learn, after commit, which `(item, owner)` pairs changed
//!   ([`TrackedStore`] / [`InvalidationSink`])
//! - aggregate raw items into the composite homepage structure ([`organize`])

mod error;
pub mod organizer;
mod traits;
pub mod tracked;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use organizer::{ItemSummary, LibraryOverview, organize};
pub use tracked::{TrackedStore, TrackedTransaction};
pub use traits::{InvalidationSink, LibraryStore, Transaction};
pub use types::{InvalidationEvent, ItemId, ItemRecord, OwnerId};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared store trait object.
pub type DynStore = std::sync::Arc<dyn LibraryStore>;
