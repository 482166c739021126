//! Cache key space.
//!
//! ## Key Format
//!
//! `<domain-prefix><entity-prefix><ownerID>[:<itemID>][:<suffix>]`
//!
//! ```text
//! library:books:7               owner 7, full list
//! library:books:7:by_author     owner 7, grouped by author
//! library:homepage:7            owner 7, homepage projection
//! library:book:7:42             item 42 detail
//! library:book:7:42:metadata    item 42 metadata
//! ```
//!
//! External tooling greps these keys, so the format is stable: ASCII,
//! colon-delimited, no whitespace, at most [`MAX_KEY_LEN`] characters.

use std::fmt;

use libris_storage::{ItemId, OwnerId};

use crate::config::MAX_KEY_LEN;
use crate::error::CacheError;

/// Entity segment of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// Owner-scoped item collections.
    Books,
    /// A single item.
    Book,
    /// The aggregated homepage projection.
    Homepage,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Books => "books:",
            Self::Book => "book:",
            Self::Homepage => "homepage:",
        }
    }
}

/// Every family of cached read, keyed by owner (and item where relevant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadTarget {
    List,
    ByAuthor,
    ByFormat,
    ByGenre,
    ByTag,
    Homepage,
    Recent,
    Favorites,
    Detail(ItemId),
    Metadata(ItemId),
}

impl ReadTarget {
    /// Owner-scoped targets. Any mutation of any item of the owner can
    /// change every one of these.
    pub const OWNER_COLLECTIONS: [ReadTarget; 8] = [
        ReadTarget::List,
        ReadTarget::ByAuthor,
        ReadTarget::ByFormat,
        ReadTarget::ByGenre,
        ReadTarget::ByTag,
        ReadTarget::Homepage,
        ReadTarget::Recent,
        ReadTarget::Favorites,
    ];

    /// TTL category name, also used as metric label.
    pub fn category(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::ByAuthor => "by_author",
            Self::ByFormat => "by_format",
            Self::ByGenre => "by_genre",
            Self::ByTag => "by_tag",
            Self::Homepage => "homepage",
            Self::Recent => "recent",
            Self::Favorites => "favorites",
            Self::Detail(_) => "detail",
            Self::Metadata(_) => "metadata",
        }
    }

    fn entity(&self) -> EntityType {
        match self {
            Self::Homepage => EntityType::Homepage,
            Self::Detail(_) | Self::Metadata(_) => EntityType::Book,
            _ => EntityType::Books,
        }
    }

    fn item(&self) -> Option<ItemId> {
        match self {
            Self::Detail(item) | Self::Metadata(item) => Some(*item),
            _ => None,
        }
    }

    fn suffix(&self) -> Option<&'static str> {
        match self {
            Self::List | Self::Homepage | Self::Detail(_) => None,
            other => Some(other.category()),
        }
    }
}

/// Structured cache key. Rendering is deterministic: equal keys render to
/// equal strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey<'a> {
    pub domain: &'a str,
    pub entity: EntityType,
    pub owner: OwnerId,
    pub item: Option<ItemId>,
    pub suffix: Option<&'static str>,
}

impl CacheKey<'_> {
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.domain, self.entity.prefix(), self.owner)?;
        if let Some(item) = self.item {
            write!(f, ":{item}")?;
        }
        if let Some(suffix) = self.suffix {
            write!(f, ":{suffix}")?;
        }
        Ok(())
    }
}

/// Key builder bound to the configured domain prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    domain_prefix: String,
}

impl KeySpace {
    pub fn new(domain_prefix: impl Into<String>) -> Self {
        Self {
            domain_prefix: domain_prefix.into(),
        }
    }

    pub fn domain_prefix(&self) -> &str {
        &self.domain_prefix
    }

    pub fn cache_key(&self, owner: OwnerId, target: ReadTarget) -> CacheKey<'_> {
        CacheKey {
            domain: &self.domain_prefix,
            entity: target.entity(),
            owner,
            item: target.item(),
            suffix: target.suffix(),
        }
    }

    #[inline]
    pub fn key(&self, owner: OwnerId, target: ReadTarget) -> String {
        self.cache_key(owner, target).render()
    }

    /// Every key a mutation of `item` owned by `owner` can make stale:
    /// all owner collections, then the item's detail and metadata keys.
    ///
    /// Over-invalidates on purpose: aggregated responses are cached whole,
    /// so any change to one item touches every blob that lists it.
    pub fn fan_out(&self, item: ItemId, owner: OwnerId) -> Vec<String> {
        ReadTarget::OWNER_COLLECTIONS
            .iter()
            .copied()
            .chain([ReadTarget::Detail(item), ReadTarget::Metadata(item)])
            .map(|target| self.key(owner, target))
            .collect()
    }
}

/// Rejects an empty set or any key that is empty, too long, non-ASCII or
/// contains whitespace.
pub fn validate_key_set(keys: &[String]) -> Result<(), CacheError> {
    if keys.is_empty() {
        return Err(CacheError::validation("key set is empty"));
    }
    for key in keys {
        validate_key(key)?;
    }
    Ok(())
}

pub fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::validation("empty cache key"));
    }
    if !key.is_ascii() || key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CacheError::validation(format!(
            "cache key must be printable ASCII without whitespace: {key:?}"
        )));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(CacheError::validation(format!(
            "cache key exceeds {MAX_KEY_LEN} characters: {}...",
            &key[..32.min(key.len())]
        )));
    }
    Ok(())
}
