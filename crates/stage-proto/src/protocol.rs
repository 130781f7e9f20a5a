use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::setlist::{deserialize_items_lenient, ItemKind, SetlistItem, SongBody};
use crate::settings::{EventSettings, SettingsPatch};

/// Error code the server answers with when no session exists yet.  Expected
/// whenever state is queried before a start; never a fault.
pub const NO_ACTIVE_SESSION: &str = "NO_ACTIVE_SESSION";
pub const EMPTY_SETLIST: &str = "EMPTY_SETLIST";
pub const EVENT_NOT_FOUND: &str = "EVENT_NOT_FOUND";

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the 4 MiB limit")]
    FrameTooLarge(usize),
}

// ── Inbound: server → console ─────────────────────────────────────────────────

/// Events pushed by the session server.  On the wire each one is an envelope
/// `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum ServerEvent {
    SessionStarted(SessionStarted),
    DisplayUpdate(DisplayUpdate),
    EventSettingsUpdated(SettingsPatch),
    SessionEnded,
    Error(ErrorPayload),
    /// A `type` tag this build does not know.  Ignored by the core.
    Unrecognized { kind: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_index: Option<i64>,
    /// Legacy name for `current_item_index`, still sent by older servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_song_index: Option<i64>,
    #[serde(
        default,
        deserialize_with = "deserialize_items_lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub setlist_items: Option<Vec<SetlistItem>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub songs: HashMap<String, SongBody>,
    #[serde(flatten)]
    pub settings: SettingsPatch,
}

impl SessionStarted {
    /// The starting position: `currentItemIndex`, then `currentSongIndex`,
    /// then 0.  Negative values count as absent.
    pub fn start_index(&self) -> usize {
        non_negative(self.current_item_index)
            .or_else(|| non_negative(self.current_song_index))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DisplayUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_index: Option<i64>,
    /// Free-form id of what is on screen.  Older servers namespace it
    /// (`bible:...`, `media:...`, `announcement:...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_index: Option<i64>,
    #[serde(
        default,
        deserialize_with = "deserialize_kind_lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub item_type: Option<ItemKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
    /// Scripture looked up while another item stays active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripture_reference: Option<String>,
}

impl DisplayUpdate {
    pub fn explicit_index(&self) -> Option<usize> {
        non_negative(self.current_item_index)
    }

    pub fn slide(&self) -> usize {
        non_negative(self.slide_index).unwrap_or(0)
    }
}

fn non_negative(index: Option<i64>) -> Option<usize> {
    index.filter(|i| *i >= 0).map(|i| i as usize)
}

fn deserialize_kind_lenient<'de, D>(deserializer: D) -> Result<Option<ItemKind>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match serde_json::from_value::<ItemKind>(value.clone()) {
            Ok(kind) => Ok(Some(kind)),
            Err(_) => {
                warn!("ignoring unknown item type {}", value);
                Ok(None)
            }
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Expected in normal operation; not a fault.
    Benign,
    /// Ends the session attempt until the operator retries.
    Fatal,
    /// Logged and surfaced, state unchanged.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorPayload {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn severity_of(code: &str) -> ErrorSeverity {
    match code {
        NO_ACTIVE_SESSION => ErrorSeverity::Benign,
        EMPTY_SETLIST | EVENT_NOT_FOUND => ErrorSeverity::Fatal,
        _ => ErrorSeverity::Transient,
    }
}

/// Wire shape shared by every server event.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl TryFrom<Envelope> for ServerEvent {
    type Error = serde_json::Error;

    fn try_from(envelope: Envelope) -> Result<Self, serde_json::Error> {
        // Servers send `{}`, `null`, or nothing at all for empty payloads.
        let payload = match envelope.payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Ok(match envelope.kind.as_str() {
            "SESSION_STARTED" => ServerEvent::SessionStarted(serde_json::from_value(payload)?),
            "DISPLAY_UPDATE" => ServerEvent::DisplayUpdate(serde_json::from_value(payload)?),
            "EVENT_SETTINGS_UPDATED" => {
                ServerEvent::EventSettingsUpdated(serde_json::from_value(payload)?)
            }
            "SESSION_ENDED" => ServerEvent::SessionEnded,
            "ERROR" => ServerEvent::Error(serde_json::from_value(payload)?),
            _ => ServerEvent::Unrecognized {
                kind: envelope.kind,
            },
        })
    }
}

impl From<ServerEvent> for Envelope {
    fn from(event: ServerEvent) -> Self {
        let (kind, payload) = match event {
            ServerEvent::SessionStarted(p) => ("SESSION_STARTED".to_string(), to_payload(&p)),
            ServerEvent::DisplayUpdate(p) => ("DISPLAY_UPDATE".to_string(), to_payload(&p)),
            ServerEvent::EventSettingsUpdated(p) => {
                ("EVENT_SETTINGS_UPDATED".to_string(), to_payload(&p))
            }
            ServerEvent::SessionEnded => ("SESSION_ENDED".to_string(), Value::Object(Default::default())),
            ServerEvent::Error(p) => ("ERROR".to_string(), to_payload(&p)),
            ServerEvent::Unrecognized { kind } => (kind, Value::Null),
        };
        Self { kind, payload }
    }
}

/// Payload structs have string keys only, so serializing them cannot fail.
fn to_payload<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_default()
}

// ── Outbound: console → server ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    StartSession {
        event_id: String,
        settings: EventSettings,
    },
    UpdateSettings {
        event_id: String,
        patch: SettingsPatch,
    },
    StopSession {
        event_id: String,
    },
    Navigate {
        event_id: String,
        target: NavigateTarget,
    },
    /// Ask the server to re-announce a running session (answered with
    /// `SESSION_STARTED` or a `NO_ACTIVE_SESSION` error).
    GetSessionState {
        event_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavigateTarget {
    Prev,
    Next,
    Goto { index: usize },
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Encode as a 4-byte big-endian length header followed by JSON.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(json.len()));
    }
    let len = json.len() as u32;
    let mut result = Vec::with_capacity(4 + json.len());
    result.extend_from_slice(&len.to_be_bytes());
    result.extend_from_slice(&json);
    Ok(result)
}

/// Accumulates bytes from a stream and yields complete frames.
///
/// A frame whose JSON does not decode is consumed and reported, so one bad
/// message does not stall the stream.  An oversized length header means the
/// stream is out of sync; the caller should drop the connection.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, or `None` if more bytes are needed.
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> Option<Result<T, ProtocolError>> {
        if self.buf.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Some(Err(ProtocolError::FrameTooLarge(len)));
        }
        if self.buf.len() < 4 + len {
            return None;
        }
        let decoded = serde_json::from_slice(&self.buf[4..4 + len]).map_err(ProtocolError::from);
        self.buf.drain(..4 + len);
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> ServerEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_session_started_prefers_item_index_over_song_index() {
        let event = parse(json!({
            "type": "SESSION_STARTED",
            "payload": {"currentItemIndex": 2, "currentSongIndex": 5, "projectorFont": "serif"}
        }));
        match event {
            ServerEvent::SessionStarted(p) => {
                assert_eq!(p.start_index(), 2);
                assert_eq!(p.settings.projector_font.as_deref(), Some("serif"));
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_session_started_index_fallbacks() {
        let legacy = SessionStarted {
            current_item_index: Some(-1),
            current_song_index: Some(3),
            ..Default::default()
        };
        assert_eq!(legacy.start_index(), 3);
        assert_eq!(SessionStarted::default().start_index(), 0);
    }

    #[test]
    fn test_session_ended_accepts_missing_or_null_payload() {
        assert_eq!(parse(json!({"type": "SESSION_ENDED"})), ServerEvent::SessionEnded);
        assert_eq!(
            parse(json!({"type": "SESSION_ENDED", "payload": null})),
            ServerEvent::SessionEnded
        );
        assert_eq!(
            parse(json!({"type": "SESSION_ENDED", "payload": {}})),
            ServerEvent::SessionEnded
        );
    }

    #[test]
    fn test_unknown_event_type_is_not_an_error() {
        let event = parse(json!({"type": "TRANSCRIPT_PARTIAL", "payload": {"text": "amen"}}));
        assert_eq!(
            event,
            ServerEvent::Unrecognized {
                kind: "TRANSCRIPT_PARTIAL".into()
            }
        );
    }

    #[test]
    fn test_display_update_tolerates_unknown_item_type() {
        let event = parse(json!({
            "type": "DISPLAY_UPDATE",
            "payload": {"songId": "bible:john-3", "slideIndex": 1, "itemType": "HOLOGRAM"}
        }));
        match event {
            ServerEvent::DisplayUpdate(p) => {
                assert_eq!(p.item_type, None);
                assert_eq!(p.explicit_index(), None);
                assert_eq!(p.slide(), 1);
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_error_event_decodes_payload() {
        let event = parse(json!({
            "type": "ERROR",
            "payload": {"code": "EMPTY_SETLIST", "message": "no items"}
        }));
        assert_eq!(
            event,
            ServerEvent::Error(ErrorPayload {
                code: EMPTY_SETLIST.into(),
                message: "no items".into(),
                details: None,
            })
        );
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(severity_of(NO_ACTIVE_SESSION), ErrorSeverity::Benign);
        assert_eq!(severity_of(EMPTY_SETLIST), ErrorSeverity::Fatal);
        assert_eq!(severity_of(EVENT_NOT_FOUND), ErrorSeverity::Fatal);
        assert_eq!(severity_of("RATE_LIMITED"), ErrorSeverity::Transient);
    }

    #[test]
    fn test_client_command_wire_shape() {
        let cmd = ClientCommand::Navigate {
            event_id: "ev-1".into(),
            target: NavigateTarget::Goto { index: 4 },
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({
                "type": "NAVIGATE",
                "payload": {"eventId": "ev-1", "target": {"direction": "GOTO", "index": 4}}
            })
        );
    }

    #[test]
    fn test_frame_buffer_handles_split_and_bad_frames() {
        let good = encode_frame(&ServerEvent::SessionEnded).unwrap();
        let mut bad = Vec::new();
        bad.extend_from_slice(&5u32.to_be_bytes());
        bad.extend_from_slice(b"nope!");

        let mut stream = bad.clone();
        stream.extend_from_slice(&good);

        let mut buffer = FrameBuffer::new();
        buffer.extend(&stream[..7]);
        assert!(buffer.next_frame::<ServerEvent>().is_none());

        buffer.extend(&stream[7..]);
        assert!(matches!(
            buffer.next_frame::<ServerEvent>(),
            Some(Err(ProtocolError::Json(_)))
        ));
        match buffer.next_frame::<ServerEvent>() {
            Some(Ok(ServerEvent::SessionEnded)) => {}
            other => panic!("Wrong frame: {:?}", other),
        }
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_frame_buffer_rejects_oversized_header() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&u32::MAX.to_be_bytes());
        assert!(matches!(
            buffer.next_frame::<ServerEvent>(),
            Some(Err(ProtocolError::FrameTooLarge(_)))
        ));
    }
}
