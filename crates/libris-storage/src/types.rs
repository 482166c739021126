//! Item and identifier types shared by the store and the cache tiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Identifier of the user who owns a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

/// Identifier of a single library item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<OwnerId> for i64 {
    fn from(id: OwnerId) -> Self {
        id.0
    }
}

impl From<ItemId> for i64 {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

/// A library item as stored in the relational store, joined with its
/// collection memberships (tags, favorite flag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub owner_id: OwnerId,
    pub title: String,
    pub author: String,
    /// Physical or digital format, e.g. "hardcover", "epub".
    pub format: String,
    pub genre: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
}

impl ItemRecord {
    /// Creates a new record with no tags, not marked favorite, added now.
    #[must_use]
    pub fn new(
        id: ItemId,
        owner_id: OwnerId,
        title: impl Into<String>,
        author: impl Into<String>,
        format: impl Into<String>,
        genre: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner_id,
            title: title.into(),
            author: author.into(),
            format: format.into(),
            genre: genre.into(),
            tags: Vec::new(),
            favorite: false,
            added_at: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    #[must_use]
    pub fn with_added_at(mut self, added_at: OffsetDateTime) -> Self {
        self.added_at = added_at;
        self
    }
}

/// Notification that a committed transaction changed an item.
///
/// Only produced after the store reports a successful commit, so it never
/// describes uncommitted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub item_id: ItemId,
    pub owner_id: OwnerId,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl InvalidationEvent {
    #[must_use]
    pub fn new(item_id: ItemId, owner_id: OwnerId) -> Self {
        Self {
            item_id,
            owner_id,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
