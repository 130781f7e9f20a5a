#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use stage_core::{CoreBroadcast, CoreEvent, CoreSettings, OperatorAction, SessionCore, SessionView};
use stage_proto::protocol::{ClientCommand, ServerEvent};
use stage_proto::setlist::SetlistSnapshot;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

pub const EVENT_ID: &str = "sunday-am";

/// Drives a `SessionCore` directly, without the run loop, so tests control
/// exactly when deadlines fire.
pub struct Harness {
    pub core: SessionCore,
    pub commands: mpsc::Receiver<ClientCommand>,
    pub broadcasts: broadcast::Receiver<CoreBroadcast>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(CoreSettings {
            event_id: Some(EVENT_ID.to_string()),
            ..Default::default()
        })
    }

    pub fn with_settings(settings: CoreSettings) -> Self {
        let (command_tx, commands) = mpsc::channel(64);
        let (broadcast_tx, broadcasts) = broadcast::channel(256);
        Self {
            core: SessionCore::new(settings, command_tx, broadcast_tx),
            commands,
            broadcasts,
        }
    }

    pub async fn send(&mut self, event: CoreEvent) {
        self.core.handle(event).await.unwrap();
    }

    /// Feed a server event given in its wire form.
    pub async fn server(&mut self, wire: Value) {
        let event: ServerEvent = serde_json::from_value(wire).unwrap();
        self.send(CoreEvent::Server(event)).await;
    }

    pub async fn operator(&mut self, action: OperatorAction) {
        self.send(CoreEvent::Operator(action)).await;
    }

    pub async fn advance(&mut self, by: Duration) {
        tokio::time::advance(by).await;
        self.core.tick(Instant::now()).await;
    }

    pub fn drain(&mut self) -> Vec<ClientCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            out.push(cmd);
        }
        out
    }

    pub fn drain_broadcasts(&mut self) -> Vec<CoreBroadcast> {
        let mut out = Vec::new();
        while let Ok(msg) = self.broadcasts.try_recv() {
            out.push(msg);
        }
        out
    }

    pub async fn view(&self) -> SessionView {
        self.core.view_store().get().await
    }

    /// Connected, started, and past the first gate sync.
    pub async fn start_active(&mut self, started_payload: Value) {
        self.send(CoreEvent::Connected).await;
        self.operator(OperatorAction::StartSession).await;
        self.server(json!({"type": "SESSION_STARTED", "payload": started_payload}))
            .await;
        self.advance(Duration::from_millis(300)).await;
        self.drain();
        self.drain_broadcasts();
    }
}

pub fn setlist(items: Value) -> SetlistSnapshot {
    serde_json::from_value(json!({ "items": items })).unwrap()
}

/// Song, song, bible, media, announcement.
pub fn service_items() -> Value {
    json!([
        {"id": "1", "sequenceOrder": 1, "kind": "SONG", "songId": "opening"},
        {"id": "2", "sequenceOrder": 2, "kind": "SONG", "songId": "response"},
        {"id": "3", "sequenceOrder": 3, "kind": "BIBLE", "reference": "Scripture reading"},
        {"id": "4", "sequenceOrder": 4, "kind": "MEDIA", "url": "https://cdn.example/loop.mp4", "title": "Loop"},
        {"id": "5", "sequenceOrder": 5, "kind": "ANNOUNCEMENT", "slideCount": 3}
    ])
}

pub fn display_update(index: Option<i64>) -> Value {
    match index {
        Some(i) => json!({"type": "DISPLAY_UPDATE", "payload": {"currentItemIndex": i}}),
        None => json!({"type": "DISPLAY_UPDATE", "payload": {"slideIndex": 1}}),
    }
}

pub fn server_error(code: &str) -> Value {
    json!({"type": "ERROR", "payload": {"code": code, "message": "from test"}})
}

pub fn update_patches(commands: &[ClientCommand]) -> Vec<&stage_proto::settings::SettingsPatch> {
    commands
        .iter()
        .filter_map(|cmd| match cmd {
            ClientCommand::UpdateSettings { patch, .. } => Some(patch),
            _ => None,
        })
        .collect()
}
