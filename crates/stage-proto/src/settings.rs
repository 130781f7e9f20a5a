//! Event settings: the presentation knobs that live on the remote event record
//! and are mirrored locally.

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSettings {
    #[serde(default = "default_projector_font")]
    pub projector_font: String,
    #[serde(default)]
    pub background_image_url: Option<String>,
    #[serde(default)]
    pub bible_mode: bool,
    #[serde(default)]
    pub bible_version_id: Option<String>,
    #[serde(default)]
    pub bible_follow: bool,
    /// Audio-gate master toggle ("smart listen").
    #[serde(default)]
    pub smart_listen: bool,
}

fn default_projector_font() -> String {
    "sans".to_string()
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            projector_font: default_projector_font(),
            background_image_url: None,
            bible_mode: false,
            bible_version_id: None,
            bible_follow: false,
            smart_listen: false,
        }
    }
}

/// Distinguishes an absent field from an explicit `null`.
///
/// `#[serde(default)]` yields `None` when the key is missing; a present key
/// always lands in `Some`, so `null` becomes `Some(None)`.
fn deserialize_nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial settings record.  Used inbound for `EVENT_SETTINGS_UPDATED` and
/// outbound for `UPDATE_SETTINGS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projector_font: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub background_image_url: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bible_mode: Option<bool>,
    #[serde(
        default,
        deserialize_with = "deserialize_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub bible_version_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bible_follow: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_listen: Option<bool>,
    /// The derived gate decision.  Outbound only; the server never drives it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_gated: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl EventSettings {
    /// Apply every field present in `patch`.  Returns true if anything changed.
    pub fn apply(&mut self, patch: &SettingsPatch) -> bool {
        let before = self.clone();
        if let Some(font) = &patch.projector_font {
            self.projector_font = font.clone();
        }
        if let Some(background) = &patch.background_image_url {
            self.background_image_url = background.clone();
        }
        if let Some(mode) = patch.bible_mode {
            self.bible_mode = mode;
        }
        if let Some(version) = &patch.bible_version_id {
            self.bible_version_id = version.clone();
        }
        if let Some(follow) = patch.bible_follow {
            self.bible_follow = follow;
        }
        if let Some(smart) = patch.smart_listen {
            self.smart_listen = smart;
        }
        *self != before
    }
}

/// Who wrote the local settings copy last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WriteSource {
    #[default]
    Defaults,
    Local,
    Remote,
}

/// Local settings cache with last-writer tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrackedSettings {
    pub value: EventSettings,
    pub last_write: WriteSource,
    pub written_at: Option<DateTime<Local>>,
}

impl TrackedSettings {
    pub fn new(value: EventSettings) -> Self {
        Self {
            value,
            last_write: WriteSource::Defaults,
            written_at: None,
        }
    }

    /// Operator edit.  Returns true if the value changed.
    pub fn write_local(&mut self, patch: &SettingsPatch) -> bool {
        self.write(patch, WriteSource::Local)
    }

    /// Server push.  Returns true if the value changed.
    pub fn write_remote(&mut self, patch: &SettingsPatch) -> bool {
        self.write(patch, WriteSource::Remote)
    }

    fn write(&mut self, patch: &SettingsPatch, source: WriteSource) -> bool {
        let changed = self.value.apply(patch);
        if changed {
            self.last_write = source;
            self.written_at = Some(Local::now());
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_distinguishes_null_from_absent() {
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"backgroundImageUrl": null, "bibleMode": true}"#).unwrap();
        assert_eq!(patch.background_image_url, Some(None));
        assert_eq!(patch.bible_version_id, None);
        assert_eq!(patch.bible_mode, Some(true));

        let mut settings = EventSettings {
            background_image_url: Some("loop.mp4".into()),
            bible_version_id: Some("kjv".into()),
            ..Default::default()
        };
        assert!(settings.apply(&patch));
        assert_eq!(settings.background_image_url, None);
        assert_eq!(settings.bible_version_id.as_deref(), Some("kjv"));
        assert!(settings.bible_mode);
    }

    #[test]
    fn test_outbound_patch_omits_absent_fields() {
        let patch = SettingsPatch {
            audio_gated: Some(true),
            bible_version_id: Some(None),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"audioGated": true, "bibleVersionId": null})
        );
    }

    #[test]
    fn test_tracked_settings_records_writer_only_on_change() {
        let mut tracked = TrackedSettings::new(EventSettings::default());
        let same = SettingsPatch {
            projector_font: Some("sans".into()),
            ..Default::default()
        };
        assert!(!tracked.write_remote(&same));
        assert_eq!(tracked.last_write, WriteSource::Defaults);

        let patch = SettingsPatch {
            projector_font: Some("serif".into()),
            ..Default::default()
        };
        assert!(tracked.write_remote(&patch));
        assert_eq!(tracked.last_write, WriteSource::Remote);
        assert!(tracked.written_at.is_some());
    }
}
