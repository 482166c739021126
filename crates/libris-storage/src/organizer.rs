//! Aggregation pipeline turning an owner's raw items into the composite
//! structure served by the homepage and the grouped list views.
//!
//! Pure function of its input: identical items produce an identical overview,
//! which is what lets a cached overview stand in for a fresh one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ItemId, ItemRecord};

/// Maximum number of entries in the `recent` section.
pub const RECENT_LIMIT: usize = 10;

/// Compact item view used inside groupings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: ItemId,
    pub title: String,
    pub author: String,
}

impl From<&ItemRecord> for ItemSummary {
    fn from(record: &ItemRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            author: record.author.clone(),
        }
    }
}

/// Composite projection of one owner's library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryOverview {
    pub total: usize,
    pub by_author: BTreeMap<String, Vec<ItemSummary>>,
    pub by_format: BTreeMap<String, Vec<ItemSummary>>,
    pub by_genre: BTreeMap<String, Vec<ItemSummary>>,
    pub by_tag: BTreeMap<String, Vec<ItemSummary>>,
    /// Newest first, at most [`RECENT_LIMIT`] entries.
    pub recent: Vec<ItemSummary>,
    pub favorites: Vec<ItemSummary>,
}

/// Builds the overview for a set of items.
///
/// Groups keep items ordered by id so the output does not depend on the
/// order the store returned rows in.
pub fn organize(items: &[ItemRecord]) -> LibraryOverview {
    let mut sorted: Vec<&ItemRecord> = items.iter().collect();
    sorted.sort_by_key(|item| item.id);

    let mut overview = LibraryOverview {
        total: sorted.len(),
        ..LibraryOverview::default()
    };

    for item in &sorted {
        let summary = ItemSummary::from(*item);
        push_group(&mut overview.by_author, &item.author, &summary);
        push_group(&mut overview.by_format, &item.format, &summary);
        push_group(&mut overview.by_genre, &item.genre, &summary);
        for tag in &item.tags {
            push_group(&mut overview.by_tag, tag, &summary);
        }
        if item.favorite {
            overview.favorites.push(summary);
        }
    }

    overview.recent = recent(items, RECENT_LIMIT);
    overview
}

/// Newest `limit` items, ties broken by descending id.
pub fn recent(items: &[ItemRecord], limit: usize) -> Vec<ItemSummary> {
    let mut by_date: Vec<&ItemRecord> = items.iter().collect();
    by_date.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(b.id.cmp(&a.id)));
    by_date.into_iter().take(limit).map(ItemSummary::from).collect()
}

fn push_group(groups: &mut BTreeMap<String, Vec<ItemSummary>>, key: &str, summary: &ItemSummary) {
    let key = key.trim();
    if key.is_empty() {
        return;
    }
    groups
        .entry(key.to_string())
        .or_default()
        .push(summary.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OwnerId;
    use time::{Duration, OffsetDateTime};

    fn item(id: i64, author: &str, tags: &[&str], age_days: i64) -> ItemRecord {
        ItemRecord::new(ItemId(id), OwnerId(7), format!("t{id}"), author, "epub", "sf")
            .with_tags(tags.iter().copied())
            .with_added_at(OffsetDateTime::UNIX_EPOCH + Duration::days(1000 - age_days))
    }

    #[test]
    fn test_organize_groups_and_counts() {
        let items = vec![
            item(2, "Le Guin", &["classic"], 3),
            item(1, "Herbert", &["classic", "desert"], 1),
            item(3, "Le Guin", &[], 2).with_favorite(true),
        ];
        let overview = organize(&items);

        assert_eq!(overview.total, 3);
        assert_eq!(overview.by_author["Le Guin"].len(), 2);
        assert_eq!(overview.by_author["Le Guin"][0].id, ItemId(2));
        assert_eq!(overview.by_tag["classic"].len(), 2);
        assert_eq!(overview.by_tag["desert"].len(), 1);
        assert_eq!(overview.by_format["epub"].len(), 3);
        assert_eq!(overview.favorites.len(), 1);
        assert_eq!(
            overview.recent.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![ItemId(1), ItemId(3), ItemId(2)]
        );
    }

    #[test]
    fn test_organize_is_order_independent() {
        let mut items = vec![item(1, "A", &["x"], 1), item(2, "B", &["x"], 2)];
        let first = organize(&items);
        items.reverse();
        assert_eq!(first, organize(&items));
    }

    #[test]
    fn test_recent_is_bounded() {
        let items: Vec<_> = (0..25).map(|i| item(i, "A", &[], i)).collect();
        assert_eq!(organize(&items).recent.len(), RECENT_LIMIT);
    }

    #[test]
    fn test_blank_groups_are_skipped() {
        let items = vec![item(1, "  ", &[""], 1)];
        let overview = organize(&items);
        assert!(overview.by_author.is_empty());
        assert!(overview.by_tag.is_empty());
    }
}
