//! Audio-gate policy.
//!
//! The capture pipeline runs continuously during songs.  For spoken items it
//! can be gated so that it only listens when woken.  The decision is derived
//! and never stored on its own.

use serde::Serialize;
use stage_proto::setlist::ItemKind;

/// How the external capture collaborator should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CaptureMode {
    #[default]
    Continuous,
    Gated,
}

impl CaptureMode {
    pub fn from_gate(gated: bool) -> Self {
        if gated {
            Self::Gated
        } else {
            Self::Continuous
        }
    }

    pub fn is_gated(self) -> bool {
        self == Self::Gated
    }
}

/// `master && mode && kind != SONG`.  Songs are never gated.
pub fn effective_gate(master_on: bool, mode_on: bool, active: ItemKind) -> bool {
    master_on && mode_on && active != ItemKind::Song
}

/// Gate decision with no active item: the fail-safe kind is SONG.
pub fn gate_for(master_on: bool, mode_on: bool, active: Option<ItemKind>) -> bool {
    effective_gate(master_on, mode_on, active.unwrap_or_default())
}
