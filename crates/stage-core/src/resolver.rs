//! Active-item resolution: which setlist position is current, and what kind
//! of item sits there.
//!
//! `resolve` is a pure function.  The caller owns the previous pointer and
//! the cached lists and hands them in by reference; nothing here remembers
//! anything between calls.

use serde::Serialize;
use stage_proto::protocol::{DisplayUpdate, ServerEvent};
use stage_proto::setlist::{kind_at, ItemKind, SetlistItem};

/// The authoritative "what is showing" pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveItemPointer {
    pub index: usize,
    pub kind: ItemKind,
}

impl ActiveItemPointer {
    pub fn new(index: usize, kind: ItemKind) -> Self {
        Self { index, kind }
    }
}

/// Lists consulted for the kind at an index, besides the event's own items.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemSources<'a> {
    /// The snapshot cached when the session started.
    pub cached: Option<&'a [SetlistItem]>,
    /// The pre-session list loaded before any session existed.
    pub fallback: &'a [SetlistItem],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Read `bible:`/`media:`/`announcement:` prefixes off `songId`.
    pub legacy_prefix_inference: bool,
}

/// Resolve the active pointer after `event`.
///
/// Returns `previous` unchanged for events that carry no position (including
/// an index-less `DISPLAY_UPDATE`).  A session start always yields a pointer.
pub fn resolve(
    event: &ServerEvent,
    previous: Option<ActiveItemPointer>,
    sources: ItemSources<'_>,
    options: ResolveOptions,
) -> Option<ActiveItemPointer> {
    match event {
        ServerEvent::SessionStarted(started) => {
            let index = started.start_index();
            let live = started.setlist_items.as_deref();
            let kind = kind_from_lists(index, live, sources).unwrap_or_default();
            Some(ActiveItemPointer::new(index, kind))
        }
        ServerEvent::DisplayUpdate(update) => match update.explicit_index() {
            Some(index) => Some(ActiveItemPointer::new(
                index,
                kind_for_update(index, update, sources, options),
            )),
            None => previous,
        },
        _ => previous,
    }
}

fn kind_for_update(
    index: usize,
    update: &DisplayUpdate,
    sources: ItemSources<'_>,
    options: ResolveOptions,
) -> ItemKind {
    if let Some(kind) = update.item_type {
        return kind;
    }
    if let Some(kind) = kind_from_lists(index, None, sources) {
        return kind;
    }
    if options.legacy_prefix_inference {
        if let Some(kind) = update.song_id.as_deref().and_then(kind_from_prefix) {
            return kind;
        }
    }
    ItemKind::Song
}

/// Live items first, then the cache, then the fallback list.
fn kind_from_lists(
    index: usize,
    live: Option<&[SetlistItem]>,
    sources: ItemSources<'_>,
) -> Option<ItemKind> {
    live.and_then(|items| kind_at(items, index))
        .or_else(|| sources.cached.and_then(|items| kind_at(items, index)))
        .or_else(|| kind_at(sources.fallback, index))
}

/// Older servers namespace non-song display ids.
pub fn kind_from_prefix(song_id: &str) -> Option<ItemKind> {
    let (prefix, _) = song_id.split_once(':')?;
    match prefix {
        "bible" => Some(ItemKind::Bible),
        "media" => Some(ItemKind::Media),
        "announcement" => Some(ItemKind::Announcement),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_proto::protocol::SessionStarted;
    use stage_proto::setlist::ItemContent;

    fn item(id: &str, order: u32, kind: ItemKind) -> SetlistItem {
        let content = match kind {
            ItemKind::Song => ItemContent::Song {
                song_id: id.to_string(),
                title: None,
                artist: None,
            },
            ItemKind::Bible => ItemContent::Bible {
                reference: "Scripture reading".into(),
            },
            ItemKind::Media => ItemContent::Media {
                url: "loop.mp4".into(),
                title: String::new(),
            },
            ItemKind::Announcement => ItemContent::Announcement { slide_count: 1 },
        };
        SetlistItem {
            id: id.to_string(),
            sequence_order: order,
            content,
        }
    }

    fn display(index: Option<i64>) -> ServerEvent {
        ServerEvent::DisplayUpdate(DisplayUpdate {
            current_item_index: index,
            ..Default::default()
        })
    }

    fn started(index: Option<i64>, items: Option<Vec<SetlistItem>>) -> ServerEvent {
        ServerEvent::SessionStarted(SessionStarted {
            current_item_index: index,
            setlist_items: items,
            ..Default::default()
        })
    }

    #[test]
    fn test_session_start_reads_kind_from_cache() {
        let cached = vec![
            item("a", 1, ItemKind::Song),
            item("b", 2, ItemKind::Song),
            item("c", 3, ItemKind::Bible),
        ];
        let sources = ItemSources {
            cached: Some(cached.as_slice()),
            fallback: &[],
        };
        let pointer = resolve(&started(Some(2), None), None, sources, Default::default());
        assert_eq!(pointer, Some(ActiveItemPointer::new(2, ItemKind::Bible)));

        let after = resolve(&display(None), pointer, sources, Default::default());
        assert_eq!(after, pointer);
    }

    #[test]
    fn test_live_items_win_over_cache() {
        let cached = vec![item("a", 1, ItemKind::Song)];
        let sources = ItemSources {
            cached: Some(cached.as_slice()),
            fallback: &[],
        };
        let event = started(Some(0), Some(vec![item("a", 1, ItemKind::Media)]));
        let pointer = resolve(&event, None, sources, Default::default());
        assert_eq!(pointer, Some(ActiveItemPointer::new(0, ItemKind::Media)));
    }

    #[test]
    fn test_fallback_list_consulted_last() {
        let fallback = vec![item("a", 1, ItemKind::Song), item("b", 2, ItemKind::Announcement)];
        let sources = ItemSources {
            cached: Some(&[][..]),
            fallback: &fallback,
        };
        let pointer = resolve(&display(Some(1)), None, sources, Default::default());
        assert_eq!(pointer, Some(ActiveItemPointer::new(1, ItemKind::Announcement)));
    }

    #[test]
    fn test_unknown_index_defaults_to_song() {
        let pointer = resolve(&display(Some(7)), None, ItemSources::default(), Default::default());
        assert_eq!(pointer, Some(ActiveItemPointer::new(7, ItemKind::Song)));
    }

    #[test]
    fn test_negative_or_missing_indices() {
        let previous = Some(ActiveItemPointer::new(3, ItemKind::Media));
        assert_eq!(
            resolve(&display(Some(-4)), previous, ItemSources::default(), Default::default()),
            previous
        );
        assert_eq!(
            resolve(&display(None), None, ItemSources::default(), Default::default()),
            None
        );
        assert_eq!(
            resolve(&started(None, None), previous, ItemSources::default(), Default::default()),
            Some(ActiveItemPointer::new(0, ItemKind::Song))
        );
    }

    #[test]
    fn test_explicit_item_type_beats_lists() {
        let cached = vec![item("a", 1, ItemKind::Song)];
        let sources = ItemSources {
            cached: Some(cached.as_slice()),
            fallback: &[],
        };
        let event = ServerEvent::DisplayUpdate(DisplayUpdate {
            current_item_index: Some(0),
            item_type: Some(ItemKind::Bible),
            ..Default::default()
        });
        let pointer = resolve(&event, None, sources, Default::default());
        assert_eq!(pointer, Some(ActiveItemPointer::new(0, ItemKind::Bible)));
    }

    #[test]
    fn test_prefix_inference_only_when_enabled() {
        let event = ServerEvent::DisplayUpdate(DisplayUpdate {
            current_item_index: Some(4),
            song_id: Some("bible:john-3-16".into()),
            ..Default::default()
        });
        let off = resolve(&event, None, ItemSources::default(), Default::default());
        assert_eq!(off.map(|p| p.kind), Some(ItemKind::Song));

        let options = ResolveOptions {
            legacy_prefix_inference: true,
        };
        let on = resolve(&event, None, ItemSources::default(), options);
        assert_eq!(on.map(|p| p.kind), Some(ItemKind::Bible));
    }

    #[test]
    fn test_scripture_overlay_does_not_reclassify_song() {
        let cached = vec![item("a", 1, ItemKind::Song)];
        let sources = ItemSources {
            cached: Some(cached.as_slice()),
            fallback: &[],
        };
        let event = ServerEvent::DisplayUpdate(DisplayUpdate {
            current_item_index: Some(0),
            scripture_reference: Some("Romans 8:28".into()),
            ..Default::default()
        });
        let pointer = resolve(&event, None, sources, Default::default());
        assert_eq!(pointer.map(|p| p.kind), Some(ItemKind::Song));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let cached = vec![item("a", 1, ItemKind::Song), item("b", 2, ItemKind::Media)];
        let sources = ItemSources {
            cached: Some(cached.as_slice()),
            fallback: &[],
        };
        let event = display(Some(1));
        let once = resolve(&event, None, sources, Default::default());
        let twice = resolve(&event, once, sources, Default::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_other_events_keep_previous() {
        let previous = Some(ActiveItemPointer::new(1, ItemKind::Bible));
        for event in [
            ServerEvent::SessionEnded,
            ServerEvent::EventSettingsUpdated(Default::default()),
            ServerEvent::Unrecognized { kind: "X".into() },
        ] {
            assert_eq!(
                resolve(&event, previous, ItemSources::default(), Default::default()),
                previous
            );
        }
    }

    #[test]
    fn test_kind_from_prefix() {
        assert_eq!(kind_from_prefix("media:intro"), Some(ItemKind::Media));
        assert_eq!(kind_from_prefix("announcement:1"), Some(ItemKind::Announcement));
        assert_eq!(kind_from_prefix("song-12"), None);
        assert_eq!(kind_from_prefix("hymn:12"), None);
    }
}
