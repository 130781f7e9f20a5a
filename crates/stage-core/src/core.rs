/// SessionCore: single-owner event loop for all engine state.
///
/// Every input (server events, operator actions, connection changes, setlist
/// loads) arrives as a `CoreEvent` on one mpsc channel and is handled in
/// order.  SessionCore owns the lifecycle, the setlist cache, the active
/// pointer, the local settings copy and the outbound sync slots; no other task
/// touches them.
///
/// The only timers are the connect-then-start poll, the settings settle
/// deadlines and the navigation confirmation timeout.  They are kept as
/// deadlines and awaited in the same `select!` as the channel, so dropping a
/// deadline cancels the timer.
///
/// After each handled event the core publishes a fresh `SessionView` and
/// broadcasts `CoreBroadcast::StateUpdated`.
use std::time::Duration;

use stage_proto::config::Config;
use stage_proto::protocol::{
    ClientCommand, DisplayUpdate, ErrorPayload, NavigateTarget, ServerEvent, SessionStarted,
};
use stage_proto::settings::{EventSettings, SettingsPatch, TrackedSettings};
use stage_proto::setlist::{SetlistItem, SetlistSnapshot};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::{reconcile, SetlistCache};
use crate::gate::{gate_for, CaptureMode};
use crate::intent::{NavigationIntent, NAVIGATION_TIMEOUT};
use crate::lifecycle::{ErrorDisposition, Lifecycle};
use crate::notices::{ErrorThrottle, Notice};
use crate::resolver::{resolve, ActiveItemPointer, ItemSources, ResolveOptions};
use crate::sync_guard::SettingsSync;
use crate::view::{DisplayText, ItemSummary, SessionView, ViewStore};

// ── Events ────────────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A decoded frame from the session server.
    Server(ServerEvent),
    /// Something the operator did (terminal keys or HTTP API).
    Operator(OperatorAction),
    Connected,
    Disconnected,
    /// The pre-session setlist for `event_id` finished loading.
    SetlistLoaded {
        event_id: String,
        snapshot: SetlistSnapshot,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorAction {
    SelectEvent(String),
    StartSession,
    StopSession,
    Retry,
    Navigate(NavigateTarget),
    SetProjectorFont(String),
    SetBackground(Option<String>),
    SetBibleVersion(Option<String>),
    /// Audio-gate master toggle.
    SetGateMaster(bool),
    /// Gated-capture mode toggle.
    SetGateMode(bool),
    /// Ask the capture collaborator for a listening window.
    WakeCapture,
}

/// Messages fanned out to every listener after the core acts.
#[derive(Debug, Clone)]
pub enum CoreBroadcast {
    StateUpdated,
    CaptureModeChanged(CaptureMode),
    /// Only sent while capture is gated.
    CaptureWindowRequested,
    Notice(Notice),
    /// A new event was selected and has no fallback setlist yet.
    SetlistWanted(String),
}

/// Timing and policy knobs, read from `Config`.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub event_id: Option<String>,
    pub start_poll_interval: Duration,
    pub start_timeout: Duration,
    pub settings_debounce: Duration,
    pub error_cooldown: Duration,
    pub navigation_timeout: Duration,
    pub resolve: ResolveOptions,
    pub defaults: EventSettings,
}

impl CoreSettings {
    pub fn from_config(config: &Config) -> Self {
        let event_id = Some(config.session.event_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        Self {
            event_id,
            start_poll_interval: config.session.start_poll_interval(),
            start_timeout: config.session.start_timeout(),
            settings_debounce: config.session.settings_debounce(),
            error_cooldown: config.session.error_cooldown(),
            navigation_timeout: NAVIGATION_TIMEOUT,
            resolve: ResolveOptions {
                legacy_prefix_inference: config.resolver.legacy_prefix_inference,
            },
            defaults: config.defaults.clone(),
        }
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            event_id: None,
            start_poll_interval: Duration::from_millis(500),
            start_timeout: Duration::from_secs(10),
            settings_debounce: Duration::from_millis(300),
            error_cooldown: Duration::from_secs(30),
            navigation_timeout: NAVIGATION_TIMEOUT,
            resolve: ResolveOptions::default(),
            defaults: EventSettings::default(),
        }
    }
}

/// A connect-then-start attempt in flight.
#[derive(Debug, Clone, Copy)]
struct StartAttempt {
    deadline: Instant,
    next_poll: Instant,
    /// START_SESSION went out on the current connection.
    sent: bool,
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    settings: CoreSettings,
    view: ViewStore,
    command_tx: mpsc::Sender<ClientCommand>,
    broadcast_tx: broadcast::Sender<CoreBroadcast>,
    connected: bool,
    event_id: Option<String>,
    lifecycle: Lifecycle,
    start_attempt: Option<StartAttempt>,
    /// Pre-session list for `event_id`.
    fallback: SetlistSnapshot,
    cache: SetlistCache,
    pointer: Option<ActiveItemPointer>,
    display: Option<DisplayText>,
    local: TrackedSettings,
    gate_mode: bool,
    capture: CaptureMode,
    sync: SettingsSync,
    throttle: ErrorThrottle,
    navigation: NavigationIntent,
    notice: Option<Notice>,
    persistent_error: Option<Notice>,
}

impl SessionCore {
    pub fn new(
        settings: CoreSettings,
        command_tx: mpsc::Sender<ClientCommand>,
        broadcast_tx: broadcast::Sender<CoreBroadcast>,
    ) -> Self {
        Self {
            event_id: settings.event_id.clone(),
            local: TrackedSettings::new(settings.defaults.clone()),
            sync: SettingsSync::new(settings.settings_debounce),
            throttle: ErrorThrottle::new(settings.error_cooldown),
            navigation: NavigationIntent::new(settings.navigation_timeout),
            settings,
            view: ViewStore::new(),
            command_tx,
            broadcast_tx,
            connected: false,
            lifecycle: Lifecycle::new(),
            start_attempt: None,
            fallback: SetlistSnapshot::default(),
            cache: SetlistCache::new(),
            pointer: None,
            display: None,
            gate_mode: false,
            capture: CaptureMode::Continuous,
            notice: None,
            persistent_error: None,
        }
    }

    /// Shared handle to the published view (for the UI and HTTP server).
    pub fn view_store(&self) -> ViewStore {
        self.view.clone()
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");
        self.publish().await;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("SessionCore: event channel closed, shutting down");
                        break;
                    }
                    Some(CoreEvent::Shutdown) => {
                        info!("SessionCore: shutdown requested");
                        break;
                    }
                    Some(evt) => {
                        if let Err(e) = self.handle(evt).await {
                            error!("SessionCore: handler error: {:#}", e);
                        }
                    }
                },
                _ = sleep_until_deadline(deadline) => {
                    self.tick(Instant::now()).await;
                }
            }
        }

        self.teardown().await;
        Ok(())
    }

    /// Handle one input and publish the resulting view.
    pub async fn handle(&mut self, event: CoreEvent) -> anyhow::Result<()> {
        let now = Instant::now();
        let result = match event {
            CoreEvent::Server(evt) => self.handle_server_event(evt, now).await,
            CoreEvent::Operator(action) => self.handle_operator(action, now).await,
            CoreEvent::Connected => self.on_connected(now).await,
            CoreEvent::Disconnected => {
                self.on_disconnected();
                Ok(())
            }
            CoreEvent::SetlistLoaded { event_id, snapshot } => {
                self.on_setlist_loaded(event_id, snapshot);
                Ok(())
            }
            CoreEvent::Shutdown => {
                self.teardown().await;
                Ok(())
            }
        };
        self.publish().await;
        result
    }

    /// Fire whatever deadlines have passed.
    pub async fn tick(&mut self, now: Instant) {
        let active = self.sync_active();
        if let Some(patch) = self.sync.take_due(active, now) {
            self.send_settings(patch).await;
        }

        if let Some(attempt) = self.start_attempt {
            if now >= attempt.deadline {
                self.abandon_start();
            } else if !attempt.sent && now >= attempt.next_poll {
                self.poll_start(now).await;
            }
        }

        self.navigation.tick(now);
        self.publish().await;
    }

    /// Earliest pending deadline, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        let attempt = self.start_attempt.map(|a| {
            if a.sent {
                a.deadline
            } else {
                a.deadline.min(a.next_poll)
            }
        });
        [self.sync.next_deadline(), attempt, self.navigation.deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    // ── Server events ─────────────────────────────────────────────────────────

    async fn handle_server_event(&mut self, evt: ServerEvent, now: Instant) -> anyhow::Result<()> {
        match &evt {
            ServerEvent::SessionStarted(started) => self.on_session_started(&evt, started, now),
            ServerEvent::DisplayUpdate(update) => self.on_display_update(&evt, update, now),
            ServerEvent::EventSettingsUpdated(patch) => self.on_settings_pushed(patch),
            ServerEvent::SessionEnded => {
                if self.lifecycle.session_ended() {
                    info!("session ended by server");
                }
                self.end_session_state();
            }
            ServerEvent::Error(payload) => self.on_server_error(payload, now),
            ServerEvent::Unrecognized { kind } => {
                debug!("ignoring unrecognized server event {}", kind);
            }
        }
        Ok(())
    }

    fn on_session_started(&mut self, evt: &ServerEvent, started: &SessionStarted, now: Instant) {
        let event_id = match (&started.event_id, &self.event_id) {
            (Some(announced), Some(selected)) if announced != selected => {
                warn!(
                    "ignoring SESSION_STARTED for event {} while {} is selected",
                    announced, selected
                );
                return;
            }
            (Some(announced), _) => announced.clone(),
            (None, Some(selected)) => selected.clone(),
            (None, None) => {
                warn!("ignoring SESSION_STARTED with no event selected");
                return;
            }
        };
        self.event_id = Some(event_id.clone());

        self.lifecycle.session_started();
        self.start_attempt = None;
        self.persistent_error = None;
        self.local.write_remote(&started.settings);

        let snapshot = reconcile(
            started.setlist_items.as_deref(),
            &started.songs,
            &self.fallback,
        );
        self.cache.retain_only(&event_id);
        self.cache.populate(&event_id, snapshot);

        let pointer = self.resolve_pointer(evt);
        info!(
            "session started for {} at {:?} ({} items)",
            event_id,
            pointer,
            self.current_items().len()
        );
        self.set_pointer(pointer);
        if let Some(p) = pointer {
            let song_id = self
                .current_items()
                .get(p.index)
                .and_then(|i| i.song_id())
                .map(str::to_string);
            let lines = self.song_lines(song_id.as_deref(), 0);
            self.display = Some(DisplayText {
                pointer,
                song_id,
                slide_index: 0,
                lines,
                scripture_reference: None,
            });
        }

        // The first decision of a session goes out once.
        self.refresh_gate(now);
    }

    fn on_display_update(&mut self, evt: &ServerEvent, update: &DisplayUpdate, now: Instant) {
        let pointer = self.resolve_pointer(evt);
        self.set_pointer(pointer);
        self.navigation.on_index(update.explicit_index());

        let song_id = update.song_id.clone().or_else(|| {
            pointer
                .and_then(|p| self.current_items().get(p.index))
                .and_then(|i| i.song_id())
                .map(str::to_string)
        });
        let slide_index = update.slide();
        let lines = if update.lines.is_empty() {
            self.song_lines(song_id.as_deref(), slide_index)
        } else {
            update.lines.clone()
        };
        debug!(
            "display: {:?} slide {} ({} lines){}",
            pointer,
            slide_index,
            lines.len(),
            update
                .scripture_reference
                .as_deref()
                .map(|r| format!(" scripture {}", r))
                .unwrap_or_default()
        );
        self.display = Some(DisplayText {
            pointer,
            song_id,
            slide_index,
            lines,
            scripture_reference: update.scripture_reference.clone(),
        });

        self.refresh_gate(now);
    }

    fn on_server_error(&mut self, payload: &ErrorPayload, now: Instant) {
        let code = payload.code.as_str();
        match self.lifecycle.on_error(code) {
            ErrorDisposition::Benign { ended_session } => {
                debug!("server: {} ({})", code, self.lifecycle.phase());
                if ended_session {
                    info!("server holds no session for this event; back to idle");
                    self.end_session_state();
                }
            }
            ErrorDisposition::Fatal { escalated: true } => {
                error!("server: fatal {}: {}", code, payload.message);
                self.start_attempt = None;
                self.end_session_state();
                let notice = Notice::persistent(code, describe(payload));
                self.persistent_error = Some(notice.clone());
                let _ = self.broadcast_tx.send(CoreBroadcast::Notice(notice));
            }
            ErrorDisposition::Fatal { escalated: false } => {
                warn!(
                    "server: {} outside a session ({}): {}",
                    code,
                    self.lifecycle.phase(),
                    payload.message
                );
                self.raise(Notice::transient(code, describe(payload)));
            }
            ErrorDisposition::Transient => {
                if self.throttle.admit(code, now) {
                    warn!("server: {}: {}", code, payload.message);
                    self.raise(Notice::transient(code, describe(payload)));
                } else {
                    debug!("server: {} (throttled)", code);
                }
            }
        }
    }

    // ── Operator actions ──────────────────────────────────────────────────────

    async fn handle_operator(&mut self, action: OperatorAction, now: Instant) -> anyhow::Result<()> {
        info!("operator: {:?}", action);
        match action {
            OperatorAction::SelectEvent(event_id) => self.select_event(event_id).await,
            OperatorAction::StartSession => {
                if self.event_id.is_none() {
                    self.raise(Notice::info("select an event before starting"));
                    return Ok(());
                }
                match self.lifecycle.request_start() {
                    Ok(()) => self.begin_start_attempt(now).await,
                    Err(e) => self.raise(Notice::info(e.to_string())),
                }
            }
            OperatorAction::Retry => match self.lifecycle.retry() {
                Ok(()) => {
                    self.persistent_error = None;
                    self.throttle.clear();
                    self.begin_start_attempt(now).await;
                }
                Err(e) => self.raise(Notice::info(e.to_string())),
            },
            OperatorAction::StopSession => self.stop_session().await,
            OperatorAction::Navigate(target) => self.navigate(target, now).await,
            OperatorAction::SetProjectorFont(font) => {
                self.local.write_local(&SettingsPatch {
                    projector_font: Some(font.clone()),
                    ..Default::default()
                });
                let (active, due) = (self.sync_active(), self.sync.due_from(now));
                self.sync.font.propose(active, font, due);
                self.refresh_gate(now);
            }
            OperatorAction::SetBackground(background) => {
                self.local.write_local(&SettingsPatch {
                    background_image_url: Some(background.clone()),
                    ..Default::default()
                });
                let (active, due) = (self.sync_active(), self.sync.due_from(now));
                self.sync.background.propose(active, background, due);
                self.refresh_gate(now);
            }
            OperatorAction::SetBibleVersion(version) => {
                self.local.write_local(&SettingsPatch {
                    bible_version_id: Some(version.clone()),
                    ..Default::default()
                });
                let (active, due) = (self.sync_active(), self.sync.due_from(now));
                self.sync.bible_version.propose(active, version, due);
                self.refresh_gate(now);
            }
            OperatorAction::SetGateMaster(on) => {
                self.local.write_local(&SettingsPatch {
                    smart_listen: Some(on),
                    ..Default::default()
                });
                self.refresh_gate(now);
            }
            OperatorAction::SetGateMode(on) => {
                self.gate_mode = on;
                self.refresh_gate(now);
            }
            OperatorAction::WakeCapture => {
                if self.capture.is_gated() {
                    let _ = self.broadcast_tx.send(CoreBroadcast::CaptureWindowRequested);
                } else {
                    self.raise(Notice::info("capture is continuous; nothing to wake"));
                }
            }
        }
        Ok(())
    }

    async fn select_event(&mut self, event_id: String) {
        let event_id = event_id.trim().to_string();
        if event_id.is_empty() || self.event_id.as_deref() == Some(event_id.as_str()) {
            return;
        }
        if self.lifecycle.is_active() || self.lifecycle.is_starting() {
            self.raise(Notice::info("stop the running session before switching events"));
            return;
        }
        info!("selected event {}", event_id);
        self.cache.retain_only(&event_id);
        self.fallback = SetlistSnapshot::default();
        self.pointer = None;
        self.display = None;
        self.event_id = Some(event_id.clone());
        let _ = self
            .broadcast_tx
            .send(CoreBroadcast::SetlistWanted(event_id.clone()));
        if self.connected {
            self.send_command(ClientCommand::GetSessionState { event_id }).await;
        }
    }

    async fn begin_start_attempt(&mut self, now: Instant) {
        self.start_attempt = Some(StartAttempt {
            deadline: now + self.settings.start_timeout,
            next_poll: now,
            sent: false,
        });
        self.poll_start(now).await;
    }

    /// One connect-then-start poll: send START_SESSION if the link is up,
    /// otherwise check again after the poll interval.
    async fn poll_start(&mut self, now: Instant) {
        let Some(mut attempt) = self.start_attempt else {
            return;
        };
        let Some(event_id) = self.event_id.clone() else {
            return;
        };
        if self.connected {
            let settings = self.local.value.clone();
            attempt.sent = self
                .send_command(ClientCommand::StartSession { event_id, settings })
                .await;
        } else {
            debug!("start: waiting for connection");
        }
        attempt.next_poll = now + self.settings.start_poll_interval;
        self.start_attempt = Some(attempt);
    }

    fn abandon_start(&mut self) {
        self.start_attempt = None;
        if self.lifecycle.start_abandoned() {
            warn!(
                "start: no session after {:?}; giving up",
                self.settings.start_timeout
            );
            self.raise(Notice::info("session did not start in time; press retry"));
        }
    }

    async fn stop_session(&mut self) {
        let was_active = self.sync_active();
        let attempt_sent = self.start_attempt.map(|a| a.sent).unwrap_or(false);
        if let Err(e) = self.lifecycle.request_stop() {
            self.raise(Notice::info(e.to_string()));
            return;
        }
        // Pending edits go out before the stop.
        if let Some(patch) = self.sync.flush(was_active) {
            self.send_settings(patch).await;
        }
        if let Some(event_id) = self.event_id.clone() {
            if was_active || attempt_sent {
                self.send_command(ClientCommand::StopSession { event_id }).await;
            }
        }
        self.start_attempt = None;
        self.end_session_state();
    }

    async fn navigate(&mut self, target: NavigateTarget, now: Instant) {
        if !self.lifecycle.controls(self.connected).can_navigate {
            self.raise(Notice::info("navigation needs an active, connected session"));
            return;
        }
        let Some(event_id) = self.event_id.clone() else {
            return;
        };
        if self
            .send_command(ClientCommand::Navigate { event_id, target })
            .await
        {
            let from = self.pointer.map(|p| p.index);
            let len = self.current_items().len();
            self.navigation.request(target, from, len, now);
        }
    }

    // ── Connection ────────────────────────────────────────────────────────────

    async fn on_connected(&mut self, now: Instant) -> anyhow::Result<()> {
        info!("connected to session server");
        self.connected = true;
        if let Some(event_id) = self.event_id.clone() {
            self.send_command(ClientCommand::GetSessionState { event_id }).await;
        }
        if self.start_attempt.is_some() {
            self.poll_start(now).await;
        }
        Ok(())
    }

    fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        warn!("lost connection to session server");
        self.connected = false;
        self.sync.reset();
        self.cache.clear();
        self.pointer = None;
        self.display = None;
        self.navigation.clear();
        if let Some(attempt) = self.start_attempt.as_mut() {
            attempt.sent = false;
        }
        self.refresh_capture();
    }

    fn on_setlist_loaded(&mut self, event_id: String, snapshot: SetlistSnapshot) {
        match &self.event_id {
            Some(selected) if *selected != event_id => {
                warn!(
                    "ignoring setlist for {} while {} is selected",
                    event_id, selected
                );
            }
            _ => {
                info!("loaded setlist for {}: {} items", event_id, snapshot.len());
                if self.event_id.is_none() {
                    self.event_id = Some(event_id);
                }
                self.fallback = snapshot;
            }
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Outbound settings flow only during a live, connected session.
    fn sync_active(&self) -> bool {
        self.connected && self.lifecycle.is_active()
    }

    fn cached_snapshot(&self) -> Option<&SetlistSnapshot> {
        self.event_id.as_deref().and_then(|id| self.cache.get(id))
    }

    /// The list the operator sees: the session's cached list, or the
    /// pre-session list before a session exists.
    fn current_items(&self) -> &[SetlistItem] {
        match self.cached_snapshot() {
            Some(snapshot) => &snapshot.items,
            None => &self.fallback.items,
        }
    }

    fn resolve_pointer(&self, evt: &ServerEvent) -> Option<ActiveItemPointer> {
        let sources = ItemSources {
            cached: self.cached_snapshot().map(|s| s.items.as_slice()),
            fallback: &self.fallback.items,
        };
        resolve(evt, self.pointer, sources, self.settings.resolve)
    }

    /// Moving the pointer invalidates display text produced for the old one.
    fn set_pointer(&mut self, pointer: Option<ActiveItemPointer>) {
        if pointer == self.pointer {
            return;
        }
        debug!("active item: {:?} → {:?}", self.pointer, pointer);
        self.pointer = pointer;
        if self.display.as_ref().map(|d| d.pointer) != Some(pointer) {
            self.display = None;
        }
    }

    fn song_lines(&self, song_id: Option<&str>, slide: usize) -> Vec<String> {
        let body = song_id.and_then(|id| {
            self.cached_snapshot()
                .and_then(|s| s.song_body(id))
                .or_else(|| self.fallback.song_body(id))
        });
        body.and_then(|b| b.slides.get(slide))
            .map(|s| s.lines.clone())
            .unwrap_or_default()
    }

    fn refresh_capture(&mut self) -> bool {
        let gated = gate_for(
            self.local.value.smart_listen,
            self.gate_mode,
            self.pointer.map(|p| p.kind),
        );
        let mode = CaptureMode::from_gate(gated);
        if mode != self.capture {
            info!("capture: {:?} → {:?}", self.capture, mode);
            self.capture = mode;
            let _ = self.broadcast_tx.send(CoreBroadcast::CaptureModeChanged(mode));
        }
        gated
    }

    /// Recompute the gate and queue it for the server.
    fn refresh_gate(&mut self, now: Instant) {
        let gated = self.refresh_capture();
        let active = self.sync_active();
        let due = self.sync.due_from(now);
        self.sync.gate.propose(active, gated, due);
    }

    /// A server push becomes the baseline for every synced field it carries.
    /// Slots it does not touch keep their pending edits.
    fn on_settings_pushed(&mut self, patch: &SettingsPatch) {
        let gated_before = self.capture.is_gated();
        if self.local.write_remote(patch) {
            debug!("settings: applied server update {:?}", patch);
        }
        let active = self.sync_active();
        if let Some(font) = &patch.projector_font {
            self.sync.font.adopt(active, font.clone());
        }
        if let Some(version) = &patch.bible_version_id {
            self.sync.bible_version.adopt(active, version.clone());
        }
        if let Some(background) = &patch.background_image_url {
            self.sync.background.adopt(active, background.clone());
        }
        let gated = self.refresh_capture();
        if patch.smart_listen.is_some() && gated != gated_before {
            self.sync.gate.adopt(active, gated);
        }
    }

    /// Drop everything scoped to the session that just ended.
    fn end_session_state(&mut self) {
        self.sync.reset();
        self.start_attempt = None;
        self.navigation.clear();
        self.pointer = None;
        self.display = None;
        if let Some(event_id) = self.event_id.clone() {
            self.cache.invalidate(&event_id);
        }
        self.refresh_capture();
    }

    async fn teardown(&mut self) {
        info!("SessionCore: teardown");
        let active = self.sync_active();
        if let Some(patch) = self.sync.flush(active) {
            self.send_settings(patch).await;
        }
        self.sync.reset();
        self.start_attempt = None;
        self.navigation.clear();
        self.publish().await;
    }

    async fn send_settings(&mut self, patch: SettingsPatch) {
        let Some(event_id) = self.event_id.clone() else {
            return;
        };
        debug!("settings: sending {:?}", patch);
        self.send_command(ClientCommand::UpdateSettings { event_id, patch })
            .await;
    }

    /// Returns true if the command was queued for the connection.
    async fn send_command(&mut self, cmd: ClientCommand) -> bool {
        if !self.connected {
            debug!("not connected; dropping {:?}", cmd);
            return false;
        }
        match self.command_tx.send(cmd).await {
            Ok(()) => true,
            Err(e) => {
                error!("connection writer gone; dropping {:?}", e.0);
                false
            }
        }
    }

    fn raise(&mut self, notice: Notice) {
        self.notice = Some(notice.clone());
        let _ = self.broadcast_tx.send(CoreBroadcast::Notice(notice));
    }

    fn snapshot_view(&self) -> SessionView {
        SessionView {
            rev: 0,
            connected: self.connected,
            event_id: self.event_id.clone(),
            phase: self.lifecycle.phase().clone(),
            controls: self.lifecycle.controls(self.connected),
            active: self.pointer,
            items: self.current_items().iter().map(ItemSummary::from).collect(),
            display: self.display.clone(),
            settings: self.local.value.clone(),
            gate_mode: self.gate_mode,
            capture: self.capture,
            navigation: self.navigation.hint(),
            notice: self.notice.clone(),
            persistent_error: self.persistent_error.clone(),
        }
    }

    async fn publish(&mut self) {
        let view = self.snapshot_view();
        self.view.publish(view).await;
        let _ = self.broadcast_tx.send(CoreBroadcast::StateUpdated);
    }
}

fn describe(payload: &ErrorPayload) -> String {
    if payload.message.is_empty() {
        payload.code.clone()
    } else {
        format!("{}: {}", payload.code, payload.message)
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
