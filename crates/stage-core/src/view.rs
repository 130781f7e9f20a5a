//! The published snapshot every reader renders from.
//!
//! Only the `SessionCore` writes it.  The terminal view and the HTTP API hold
//! a `ViewStore` clone and read.

use std::sync::Arc;

use serde::Serialize;
use stage_proto::settings::EventSettings;
use stage_proto::setlist::{ItemKind, SetlistItem};
use tokio::sync::RwLock;

use crate::gate::CaptureMode;
use crate::intent::NavigationHint;
use crate::lifecycle::{ControlAvailability, SessionPhase};
use crate::notices::Notice;
use crate::resolver::ActiveItemPointer;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSummary {
    pub id: String,
    pub sequence_order: u32,
    pub kind: ItemKind,
    pub title: String,
}

impl From<&SetlistItem> for ItemSummary {
    fn from(item: &SetlistItem) -> Self {
        Self {
            id: item.id.clone(),
            sequence_order: item.sequence_order,
            kind: item.kind(),
            title: item.title(),
        }
    }
}

/// What the projector is showing.  Tied to the pointer it was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct DisplayText {
    pub pointer: Option<ActiveItemPointer>,
    pub song_id: Option<String>,
    pub slide_index: usize,
    pub lines: Vec<String>,
    /// Scripture shown over the current item.  Never changes its kind.
    pub scripture_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionView {
    pub rev: u64,
    pub connected: bool,
    pub event_id: Option<String>,
    pub phase: SessionPhase,
    pub controls: ControlAvailability,
    pub active: Option<ActiveItemPointer>,
    pub items: Vec<ItemSummary>,
    pub display: Option<DisplayText>,
    pub settings: EventSettings,
    pub gate_mode: bool,
    pub capture: CaptureMode,
    pub navigation: NavigationHint,
    pub notice: Option<Notice>,
    pub persistent_error: Option<Notice>,
}

impl SessionView {
    pub fn active_item(&self) -> Option<&ItemSummary> {
        self.active.and_then(|p| self.items.get(p.index))
    }

    pub fn audio_gated(&self) -> bool {
        self.capture.is_gated()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewStore {
    view: Arc<RwLock<SessionView>>,
}

impl ViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc(&self) -> Arc<RwLock<SessionView>> {
        Arc::clone(&self.view)
    }

    pub async fn get(&self) -> SessionView {
        self.view.read().await.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.view.read().await.rev
    }

    /// Replace the snapshot, bumping `rev`.  Returns the new revision.
    pub async fn publish(&self, view: SessionView) -> u64 {
        let mut current = self.view.write().await;
        let rev = current.rev + 1;
        *current = SessionView { rev, ..view };
        rev
    }
}
