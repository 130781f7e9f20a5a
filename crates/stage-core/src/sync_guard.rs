//! Outbound settings sync.
//!
//! Local edits travel console → server through one slot per synced field.
//! Each slot remembers what it last sent, so a value is transmitted only when
//! it differs, and holds at most one pending value with a settle deadline.
//! Remote pushes are applied to local state elsewhere and never enter this
//! module, except to adopt a new baseline via [`SyncSlot::adopt`].

use std::time::Duration;

use stage_proto::settings::SettingsPatch;
use tokio::time::Instant;
use tracing::debug;

/// Decide whether `new` has to be sent.
///
/// Returns `(should_send, updated_last_sent)`.  Outside an active session
/// nothing is sent and the marker is cleared, so the first value after the
/// next activation always goes out.
pub fn sync_if_changed<T: Clone + PartialEq>(
    session_active: bool,
    new: &T,
    last_sent: Option<&T>,
) -> (bool, Option<T>) {
    if !session_active {
        return (false, None);
    }
    let changed = last_sent != Some(new);
    (changed, Some(new.clone()))
}

#[derive(Debug, Clone)]
struct Pending<T> {
    value: T,
    due_at: Instant,
}

/// One synced field.
#[derive(Debug, Clone)]
pub struct SyncSlot<T> {
    last_sent: Option<T>,
    pending: Option<Pending<T>>,
}

impl<T> Default for SyncSlot<T> {
    fn default() -> Self {
        Self {
            last_sent: None,
            pending: None,
        }
    }
}

impl<T: Clone + PartialEq> SyncSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `value` to go out at `due_at`, replacing any pending value.
    pub fn propose(&mut self, session_active: bool, value: T, due_at: Instant) {
        if !session_active {
            self.reset();
            return;
        }
        if self.last_sent.as_ref() == Some(&value) {
            self.pending = None;
            return;
        }
        self.pending = Some(Pending { value, due_at });
    }

    /// Record `value` as already known to the server without sending it.
    pub fn adopt(&mut self, session_active: bool, value: T) {
        self.pending = None;
        self.last_sent = session_active.then_some(value);
    }

    pub fn due_at(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.due_at)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_sent(&self) -> Option<&T> {
        self.last_sent.as_ref()
    }

    /// The pending value if its deadline has passed and it still differs.
    pub fn take_due(&mut self, session_active: bool, now: Instant) -> Option<T> {
        match self.due_at() {
            Some(due_at) if due_at <= now => self.flush(session_active),
            _ => None,
        }
    }

    /// The pending value regardless of its deadline.
    pub fn flush(&mut self, session_active: bool) -> Option<T> {
        let pending = self.pending.take()?;
        let (send, marker) = sync_if_changed(session_active, &pending.value, self.last_sent.as_ref());
        self.last_sent = marker;
        send.then_some(pending.value)
    }

    /// Drop the pending value and forget what was sent.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.pending = None;
    }
}

/// The four synced fields and their shared settle time.
#[derive(Debug, Clone)]
pub struct SettingsSync {
    settle: Duration,
    pub font: SyncSlot<String>,
    pub gate: SyncSlot<bool>,
    pub bible_version: SyncSlot<Option<String>>,
    pub background: SyncSlot<Option<String>>,
}

impl SettingsSync {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            font: SyncSlot::new(),
            gate: SyncSlot::new(),
            bible_version: SyncSlot::new(),
            background: SyncSlot::new(),
        }
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Deadline for a value proposed at `now`.
    pub fn due_from(&self, now: Instant) -> Instant {
        now + self.settle
    }

    /// Earliest pending deadline across all slots.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.font.due_at(),
            self.gate.due_at(),
            self.bible_version.due_at(),
            self.background.due_at(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn has_pending(&self) -> bool {
        self.next_deadline().is_some()
    }

    /// Collect every slot that is due into one patch.
    pub fn take_due(&mut self, session_active: bool, now: Instant) -> Option<SettingsPatch> {
        let patch = SettingsPatch {
            projector_font: self.font.take_due(session_active, now),
            audio_gated: self.gate.take_due(session_active, now),
            bible_version_id: self.bible_version.take_due(session_active, now),
            background_image_url: self.background.take_due(session_active, now),
            ..Default::default()
        };
        non_empty(patch)
    }

    /// Collect every pending slot regardless of deadline.
    pub fn flush(&mut self, session_active: bool) -> Option<SettingsPatch> {
        let patch = SettingsPatch {
            projector_font: self.font.flush(session_active),
            audio_gated: self.gate.flush(session_active),
            bible_version_id: self.bible_version.flush(session_active),
            background_image_url: self.background.flush(session_active),
            ..Default::default()
        };
        non_empty(patch)
    }

    pub fn reset(&mut self) {
        if self.has_pending() {
            debug!("settings sync: dropping pending values");
        }
        self.font.reset();
        self.gate.reset();
        self.bible_version.reset();
        self.background.reset();
    }
}

fn non_empty(patch: SettingsPatch) -> Option<SettingsPatch> {
    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}
