//! Per-event setlist cache and the live/fallback merge.
//!
//! The cache is owned by the `SessionCore` and passed by reference into the
//! resolver; nothing else reads it.  An entry lives for one session: it is
//! populated on `SESSION_STARTED` and dropped on session end, disconnect, or
//! when the operator switches events.

use std::collections::{HashMap, HashSet};

use stage_proto::setlist::{sort_by_sequence, SetlistItem, SetlistSnapshot, SongBody};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct SetlistCache {
    entries: HashMap<String, SetlistSnapshot>,
}

impl SetlistCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn populate(&mut self, event_id: &str, snapshot: SetlistSnapshot) {
        debug!(
            "setlist cache: {} items for event {}",
            snapshot.len(),
            event_id
        );
        self.entries.insert(event_id.to_string(), snapshot);
    }

    pub fn get(&self, event_id: &str) -> Option<&SetlistSnapshot> {
        self.entries.get(event_id)
    }

    pub fn invalidate(&mut self, event_id: &str) -> bool {
        self.entries.remove(event_id).is_some()
    }

    /// Drop every entry except `event_id`'s.
    pub fn retain_only(&mut self, event_id: &str) {
        self.entries.retain(|id, _| id == event_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merge a possibly partial live list with the pre-session fallback list.
///
/// Every live item is kept (first occurrence per id).  Fallback items whose id
/// the live list lacks are added.  The result is stable-sorted by
/// `sequence_order`.  When both sources carry an id with different kinds the
/// live item wins; the disagreement is logged, not resolved.
pub fn merge_with_fallback(live: &[SetlistItem], fallback: &[SetlistItem]) -> Vec<SetlistItem> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(live.len() + fallback.len());
    let mut merged: Vec<SetlistItem> = Vec::with_capacity(live.len() + fallback.len());

    for item in live {
        if seen.insert(item.id.as_str()) {
            merged.push(item.clone());
        } else {
            warn!("live setlist repeats item id {}; keeping the first", item.id);
        }
    }

    for item in fallback {
        if seen.insert(item.id.as_str()) {
            debug!(
                "merge: item {} (order {}) missing from live setlist, taking fallback copy",
                item.id, item.sequence_order
            );
            merged.push(item.clone());
        } else if let Some(live_item) = merged.iter().find(|m| m.id == item.id) {
            if live_item.kind() != item.kind() {
                warn!(
                    "merge: item {} is {} live but {} in fallback; keeping live",
                    item.id,
                    live_item.kind(),
                    item.kind()
                );
            }
        }
    }

    sort_by_sequence(&mut merged);
    merged
}

/// Build the snapshot cached when a session starts.
///
/// With a non-empty live list the items are merged with the fallback list;
/// otherwise the fallback list is used as is.  Song bodies from the live
/// payload override fallback bodies with the same song id.
pub fn reconcile(
    live_items: Option<&[SetlistItem]>,
    live_songs: &HashMap<String, SongBody>,
    fallback: &SetlistSnapshot,
) -> SetlistSnapshot {
    let items = match live_items {
        Some(live) if !live.is_empty() => merge_with_fallback(live, &fallback.items),
        _ => fallback.items.clone(),
    };
    let mut songs = fallback.songs.clone();
    songs.extend(
        live_songs
            .iter()
            .map(|(id, body)| (id.clone(), body.clone())),
    );
    let snapshot = SetlistSnapshot::new(items, songs);
    if !snapshot.is_contiguous() {
        // Indexes still follow sort order; only the numbering is off.
        debug!(
            "reconciled setlist of {} item(s) has gaps or duplicates in sequenceOrder",
            snapshot.len()
        );
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_proto::setlist::{ItemContent, ItemKind};

    fn item(id: &str, order: u32, kind: ItemKind) -> SetlistItem {
        let content = match kind {
            ItemKind::Song => ItemContent::Song {
                song_id: format!("song-{}", id),
                title: None,
                artist: None,
            },
            ItemKind::Bible => ItemContent::Bible {
                reference: "Reading".into(),
            },
            ItemKind::Media => ItemContent::Media {
                url: "clip.mp4".into(),
                title: "Clip".into(),
            },
            ItemKind::Announcement => ItemContent::Announcement { slide_count: 2 },
        };
        SetlistItem {
            id: id.to_string(),
            sequence_order: order,
            content,
        }
    }

    fn ids(items: &[SetlistItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_missing_item_is_merged_once_in_sequence_position() {
        let live = vec![
            item("a", 1, ItemKind::Song),
            item("c", 3, ItemKind::Song),
            item("d", 4, ItemKind::Media),
        ];
        let fallback = vec![
            item("a", 1, ItemKind::Song),
            item("x", 2, ItemKind::Bible),
            item("c", 3, ItemKind::Song),
            item("d", 4, ItemKind::Media),
        ];

        let merged = merge_with_fallback(&live, &fallback);
        assert_eq!(ids(&merged), vec!["a", "x", "c", "d"]);
        assert_eq!(merged.iter().filter(|i| i.id == "x").count(), 1);
    }

    #[test]
    fn test_merge_never_duplicates_or_drops() {
        let live = vec![
            item("a", 1, ItemKind::Song),
            item("a", 1, ItemKind::Song),
            item("b", 2, ItemKind::Song),
        ];
        let fallback = vec![item("b", 2, ItemKind::Song), item("z", 9, ItemKind::Media)];

        let merged = merge_with_fallback(&live, &fallback);
        assert_eq!(ids(&merged), vec!["a", "b", "z"]);
    }

    #[test]
    fn test_kind_disagreement_keeps_live_item() {
        let live = vec![item("a", 1, ItemKind::Bible)];
        let fallback = vec![item("a", 1, ItemKind::Song)];
        let merged = merge_with_fallback(&live, &fallback);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind(), ItemKind::Bible);
    }

    #[test]
    fn test_reconcile_uses_fallback_when_live_list_absent_or_empty() {
        let fallback = SetlistSnapshot::new(
            vec![item("a", 1, ItemKind::Song), item("b", 2, ItemKind::Bible)],
            HashMap::new(),
        );
        let from_none = reconcile(None, &HashMap::new(), &fallback);
        assert_eq!(ids(&from_none.items), vec!["a", "b"]);

        let from_empty = reconcile(Some(&[][..]), &HashMap::new(), &fallback);
        assert_eq!(ids(&from_empty.items), vec!["a", "b"]);
    }

    #[test]
    fn test_reconcile_prefers_live_song_bodies() {
        let mut fallback_songs = HashMap::new();
        fallback_songs.insert(
            "song-a".to_string(),
            SongBody {
                title: "Old".into(),
                ..Default::default()
            },
        );
        let fallback = SetlistSnapshot::new(vec![item("a", 1, ItemKind::Song)], fallback_songs);

        let mut live_songs = HashMap::new();
        live_songs.insert(
            "song-a".to_string(),
            SongBody {
                title: "New".into(),
                ..Default::default()
            },
        );
        let snapshot = reconcile(None, &live_songs, &fallback);
        assert_eq!(snapshot.song_body("song-a").unwrap().title, "New");
    }

    #[test]
    fn test_cache_is_scoped_by_event() {
        let mut cache = SetlistCache::new();
        cache.populate("ev-1", SetlistSnapshot::default());
        cache.populate("ev-2", SetlistSnapshot::default());
        assert_eq!(cache.len(), 2);

        cache.retain_only("ev-2");
        assert!(cache.get("ev-1").is_none());
        assert!(cache.get("ev-2").is_some());

        assert!(cache.invalidate("ev-2"));
        assert!(!cache.invalidate("ev-2"));
        assert!(cache.is_empty());
    }
}
