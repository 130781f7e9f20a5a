//! Setlist data model: the ordered, polymorphic list of presentable items for
//! one event, plus the resolved song bodies the display needs.
//!
//! Upstream data is not always well formed.  Item ids arrive as strings or
//! numbers, optional variant fields go missing, and occasionally a single
//! element is garbage.  Decoding here is deliberately lenient: a bad element
//! is skipped with a warning instead of failing the surrounding event.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Discriminant of a setlist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    /// Songs run continuous capture, so this is also the fail-safe kind.
    #[default]
    Song,
    Bible,
    Media,
    Announcement,
}

impl ItemKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Song => "SONG",
            Self::Bible => "BIBLE",
            Self::Media => "MEDIA",
            Self::Announcement => "ANNOUNCEMENT",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Variant-specific payload, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ItemContent {
    Song {
        #[serde(default)]
        song_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        artist: Option<String>,
    },
    Bible {
        /// Often a placeholder ("Scripture reading"); the verse itself is
        /// resolved at presentation time.
        #[serde(default)]
        reference: String,
    },
    Media {
        #[serde(default)]
        url: String,
        #[serde(default)]
        title: String,
    },
    Announcement {
        #[serde(default)]
        slide_count: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetlistItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// 1-based display position, unique within an event.
    #[serde(default)]
    pub sequence_order: u32,
    #[serde(flatten)]
    pub content: ItemContent,
}

impl SetlistItem {
    pub fn kind(&self) -> ItemKind {
        match self.content {
            ItemContent::Song { .. } => ItemKind::Song,
            ItemContent::Bible { .. } => ItemKind::Bible,
            ItemContent::Media { .. } => ItemKind::Media,
            ItemContent::Announcement { .. } => ItemKind::Announcement,
        }
    }

    /// Short label for lists and log lines.
    pub fn title(&self) -> String {
        match &self.content {
            ItemContent::Song { title, song_id, .. } => {
                title.clone().unwrap_or_else(|| song_id.clone())
            }
            ItemContent::Bible { reference } => reference.clone(),
            ItemContent::Media { title, url } => {
                if title.is_empty() {
                    url.clone()
                } else {
                    title.clone()
                }
            }
            ItemContent::Announcement { slide_count } => {
                format!("Announcements ({} slides)", slide_count)
            }
        }
    }

    pub fn song_id(&self) -> Option<&str> {
        match &self.content {
            ItemContent::Song { song_id, .. } if !song_id.is_empty() => Some(song_id),
            _ => None,
        }
    }
}

/// Ids show up as `"17"` from one source and `17` from another.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "setlist item id must be a string or number, got {}",
            other
        ))),
    }
}

/// Decode each element on its own so one malformed item cannot take down the
/// whole list.
pub fn decode_items(values: Vec<Value>) -> Vec<SetlistItem> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(pos, value)| match serde_json::from_value::<SetlistItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("skipping malformed setlist item at position {}: {}", pos, e);
                None
            }
        })
        .collect()
}

/// `deserialize_with` helper for optional item lists inside event payloads.
pub fn deserialize_items_lenient<'de, D>(
    deserializer: D,
) -> Result<Option<Vec<SetlistItem>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(values)) => Ok(Some(decode_items(values))),
        Some(other) => {
            warn!("ignoring setlist items that are not a list: {}", other);
            Ok(None)
        }
    }
}

/// Kind of the item at `index` in an already ordered list.
pub fn kind_at(items: &[SetlistItem], index: usize) -> Option<ItemKind> {
    items.get(index).map(SetlistItem::kind)
}

/// Stable sort by `sequence_order`; equal orders keep their relative position.
pub fn sort_by_sequence(items: &mut [SetlistItem]) {
    items.sort_by_key(|item| item.sequence_order);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Slide {
    #[serde(default)]
    pub lines: Vec<String>,
}

/// Resolved song content: what the projector actually shows for a SONG item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SongBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub slides: Vec<Slide>,
}

/// An ordered setlist plus song bodies keyed by song id.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SetlistSnapshot {
    pub items: Vec<SetlistItem>,
    pub songs: HashMap<String, SongBody>,
}

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default, deserialize_with = "deserialize_items_lenient")]
    items: Option<Vec<SetlistItem>>,
    #[serde(default)]
    songs: HashMap<String, SongBody>,
}

impl<'de> Deserialize<'de> for SetlistSnapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawSnapshot::deserialize(deserializer)?;
        Ok(Self::new(raw.items.unwrap_or_default(), raw.songs))
    }
}

impl SetlistSnapshot {
    /// Build a snapshot, ordering items by `sequence_order`.
    pub fn new(mut items: Vec<SetlistItem>, songs: HashMap<String, SongBody>) -> Self {
        sort_by_sequence(&mut items);
        Self { items, songs }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn song_body(&self, song_id: &str) -> Option<&SongBody> {
        self.songs.get(song_id)
    }

    /// True when `sequence_order` runs 1..=N in list order.
    pub fn is_contiguous(&self) -> bool {
        self.items
            .iter()
            .enumerate()
            .all(|(i, item)| item.sequence_order as usize == i + 1)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{bible, song};
    use super::*;
    use std::io::Write;

    #[test]
    fn test_item_decodes_numeric_id_and_camel_case_fields() {
        let json = r#"{"id": 42, "sequenceOrder": 3, "kind": "ANNOUNCEMENT", "slideCount": 4}"#;
        let item: SetlistItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, "42");
        assert_eq!(item.sequence_order, 3);
        assert_eq!(item.kind(), ItemKind::Announcement);
        assert_eq!(item.content, ItemContent::Announcement { slide_count: 4 });
    }

    #[test]
    fn test_missing_variant_fields_default() {
        let json = r#"{"id": "a", "sequenceOrder": 1, "kind": "MEDIA"}"#;
        let item: SetlistItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.kind(), ItemKind::Media);
        assert_eq!(item.title(), "");
    }

    #[test]
    fn test_decode_items_skips_malformed_elements() {
        let values: Vec<Value> = serde_json::from_str(
            r#"[
                {"id": "1", "sequenceOrder": 1, "kind": "SONG", "songId": "s1"},
                {"id": "2", "sequenceOrder": 2, "kind": "HOLOGRAM"},
                {"sequenceOrder": 3, "kind": "BIBLE"},
                {"id": "4", "sequenceOrder": 4, "kind": "BIBLE", "reference": "John 3:16"}
            ]"#,
        )
        .unwrap();
        let items = decode_items(values);
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
    }

    #[test]
    fn test_snapshot_sorts_by_sequence_order() {
        let snapshot = SetlistSnapshot::new(
            vec![song("c", 3), bible("a", 1), song("b", 2)],
            HashMap::new(),
        );
        let ids: Vec<&str> = snapshot.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(kind_at(&snapshot.items, 0), Some(ItemKind::Bible));
        assert_eq!(kind_at(&snapshot.items, 9), None);
    }

    #[test]
    fn test_contiguity_follows_sort_order() {
        let snapshot = SetlistSnapshot::new(vec![song("b", 2), bible("a", 1)], HashMap::new());
        assert!(snapshot.is_contiguous());

        // Gaps and duplicates happen on partial lists.
        let gapped = SetlistSnapshot::new(vec![song("a", 1), song("c", 3)], HashMap::new());
        assert!(!gapped.is_contiguous());
        let doubled = SetlistSnapshot::new(vec![song("a", 1), song("b", 1)], HashMap::new());
        assert!(!doubled.is_contiguous());
    }

    #[test]
    fn test_load_setlist_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "items": [
                    {{"id": "2", "sequenceOrder": 2, "kind": "BIBLE", "reference": "Psalm 23"}},
                    {{"id": "1", "sequenceOrder": 1, "kind": "SONG", "songId": "amazing"}}
                ],
                "songs": {{
                    "amazing": {{"title": "Amazing Grace", "slides": [{{"lines": ["Amazing grace"]}}]}}
                }}
            }}"#
        )
        .unwrap();

        let snapshot = load_setlist_from_path(file.path()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.items[0].song_id(), Some("amazing"));
        let body = snapshot.song_body("amazing").unwrap();
        assert_eq!(body.slides[0].lines, vec!["Amazing grace".to_string()]);
    }

    #[tokio::test]
    async fn test_load_setlist_reports_missing_file() {
        let err = load_setlist("/definitely/not/here.json").await.unwrap_err();
        assert!(matches!(err, SetlistError::Io(_)));
    }
}
