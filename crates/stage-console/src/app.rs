//! App: terminal operator view.
//!
//! - Renders the latest `SessionView` published by the core.
//! - Keys become `OperatorAction`s sent into the core's event channel.
//! - Core notices show up as toasts.

use std::io;
use std::time::Duration;

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use stage_core::intent::NavigationHint;
use stage_core::lifecycle::SessionPhase;
use stage_core::{CoreBroadcast, CoreEvent, OperatorAction, SessionView, ViewStore};
use stage_proto::protocol::NavigateTarget;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::theme::{
    kind_color, style_accent, style_active_row, style_border, style_default, style_muted,
    style_secondary, C_BG, C_ERROR, C_LIVE, C_MUTED, C_NUMBER_HINT, C_SCRIPTURE, C_STARTING,
};
use crate::toast::ToastManager;

/// Fonts the `f` key cycles through.
const FONTS: &[&str] = &["sans", "serif", "mono", "condensed"];

enum AppMessage {
    Event(Event),
    StateUpdated(SessionView),
    Broadcast(CoreBroadcast),
}

#[derive(Debug, Clone, PartialEq)]
enum KeyAction {
    Quit,
    Core(OperatorAction),
}

pub struct App {
    view_store: ViewStore,
    view: SessionView,
    event_tx: mpsc::Sender<CoreEvent>,
    toasts: ToastManager,
    list_state: ListState,
    should_quit: bool,
}

impl App {
    pub fn new(view_store: ViewStore, event_tx: mpsc::Sender<CoreEvent>) -> Self {
        Self {
            view_store,
            view: SessionView::default(),
            event_tx,
            toasts: ToastManager::new(),
            list_state: ListState::default(),
            should_quit: false,
        }
    }

    pub async fn run(mut self, mut broadcast_rx: broadcast::Receiver<CoreBroadcast>) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        debug!("run(): terminal created, size={:?}", terminal.size());

        let (tx, mut rx) = mpsc::channel::<AppMessage>(256);
        self.view = self.view_store.get().await;

        // ── Background task: keyboard events ──────────────────────────────────
        let key_tx = tx.clone();
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if key_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // ── Background task: core broadcasts ──────────────────────────────────
        let bc_tx = tx.clone();
        let bc_view = self.view_store.clone();
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(msg) => {
                        let app_msg = match msg {
                            CoreBroadcast::StateUpdated => AppMessage::StateUpdated(bc_view.get().await),
                            other => AppMessage::Broadcast(other),
                        };
                        if bc_tx.send(app_msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("broadcast receiver lagged by {} messages", n);
                        // Catch up from the store; the snapshot is always whole.
                        if bc_tx
                            .send(AppMessage::StateUpdated(bc_view.get().await))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Toast expiry.
        let mut toast_tick = tokio::time::interval(Duration::from_millis(250));
        toast_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(msg) = rx.recv() => {
                    needs_redraw = self.handle_message(msg).await;
                    while let Ok(next) = rx.try_recv() {
                        needs_redraw |= self.handle_message(next).await;
                    }
                }
                _ = toast_tick.tick() => {
                    if !self.toasts.is_empty() {
                        self.toasts.tick();
                        needs_redraw = true;
                    }
                }
            }
        }

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        info!("terminal restored");
        Ok(())
    }

    /// Returns whether a redraw is needed.
    async fn handle_message(&mut self, msg: AppMessage) -> bool {
        match msg {
            AppMessage::Event(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                match action_for_key(&key, &self.view) {
                    Some(KeyAction::Quit) => self.should_quit = true,
                    Some(KeyAction::Core(action)) => {
                        debug!("key {:?} → {:?}", key.code, action);
                        if self.event_tx.send(CoreEvent::Operator(action)).await.is_err() {
                            warn!("core is gone; quitting");
                            self.should_quit = true;
                        }
                    }
                    None => return false,
                }
                true
            }
            AppMessage::Event(Event::Resize(_, _)) => true,
            AppMessage::Event(_) => false,
            AppMessage::StateUpdated(view) => {
                if view.rev < self.view.rev {
                    return false;
                }
                if view.persistent_error.is_none() && self.view.persistent_error.is_some() {
                    self.toasts.dismiss_persistent();
                }
                self.view = view;
                true
            }
            AppMessage::Broadcast(CoreBroadcast::Notice(notice)) => {
                self.toasts.push(&notice);
                true
            }
            AppMessage::Broadcast(CoreBroadcast::CaptureWindowRequested) => {
                info!("capture window requested");
                false
            }
            AppMessage::Broadcast(CoreBroadcast::CaptureModeChanged(mode)) => {
                debug!("capture mode is now {:?}", mode);
                false
            }
            AppMessage::Broadcast(CoreBroadcast::StateUpdated)
            | AppMessage::Broadcast(CoreBroadcast::SetlistWanted(_)) => false,
        }
    }

    // ── Drawing ───────────────────────────────────────────────────────────────

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();
        frame.render_widget(Block::default().style(Style::default().bg(C_BG)), area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(5),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(area);

        frame.render_widget(Paragraph::new(header_line(&self.view)), rows[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(rows[1]);
        self.draw_setlist(frame, body[0]);
        draw_display(frame, body[1], &self.view);

        frame.render_widget(Paragraph::new(status_line(&self.view)), rows[2]);
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                " s start  x stop  r retry  ←/→ prev/next  1-9 goto  g gate  m mode  w wake  f font  q quit",
                style_muted(),
            ))),
            rows[3],
        );

        self.toasts.draw(frame, area);
    }

    fn draw_setlist(&mut self, frame: &mut Frame, area: Rect) {
        let active = self.view.active.map(|p| p.index);
        let items: Vec<ListItem> = self
            .view
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let marker = if Some(i) == active { "▶ " } else { "  " };
                let hint = if i < 9 {
                    format!("{} ", i + 1)
                } else {
                    "  ".to_string()
                };
                let line = Line::from(vec![
                    Span::styled(marker, style_accent()),
                    Span::styled(hint, Style::default().fg(C_NUMBER_HINT)),
                    Span::styled(
                        format!("{:<13}", item.kind.to_string()),
                        Style::default().fg(kind_color(item.kind)),
                    ),
                    Span::styled(item.title.clone(), style_default()),
                ]);
                let style = if Some(i) == active {
                    style_active_row()
                } else {
                    Style::default()
                };
                ListItem::new(line).style(style)
            })
            .collect();

        let title = match self.view.items.len() {
            0 => " Setlist ".to_string(),
            n => format!(" Setlist ({}) ", n),
        };
        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(style_border(self.view.phase == SessionPhase::Active))
                .title(Span::styled(title, style_secondary())),
        );
        self.list_state.select(active);
        frame.render_stateful_widget(list, area, &mut self.list_state);
    }
}

fn header_line(view: &SessionView) -> Line<'static> {
    let (badge, color) = match &view.phase {
        SessionPhase::Active => ("● LIVE".to_string(), C_LIVE),
        SessionPhase::Starting => ("◌ starting".to_string(), C_STARTING),
        SessionPhase::Error(code) => (format!("✗ {}", code), C_ERROR),
        SessionPhase::Idle => ("○ idle".to_string(), C_MUTED),
    };
    let link = if view.connected {
        Span::styled("online", Style::default().fg(C_LIVE))
    } else {
        Span::styled("offline", Style::default().fg(C_ERROR))
    };
    let mut spans = vec![
        Span::styled(" stagehand ", style_accent().add_modifier(Modifier::BOLD)),
        Span::styled(format!(" {} ", badge), Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::styled("  event ", style_muted()),
        Span::styled(
            view.event_id.clone().unwrap_or_else(|| "none".to_string()),
            style_default(),
        ),
        Span::styled("  server ", style_muted()),
        link,
    ];
    if view.controls.can_retry {
        spans.push(Span::styled("  [r] retry", Style::default().fg(C_STARTING)));
    }
    Line::from(spans)
}

fn draw_display(frame: &mut Frame, area: Rect, view: &SessionView) {
    let mut lines: Vec<Line> = Vec::new();
    let title = match view.active_item() {
        Some(item) => format!(" {} · {} ", item.kind, item.title),
        None => match view.active {
            Some(p) => format!(" {} · item {} ", p.kind, p.index + 1),
            None => " Display ".to_string(),
        },
    };

    match &view.display {
        Some(display) => {
            if let Some(reference) = &display.scripture_reference {
                lines.push(Line::from(Span::styled(
                    format!("✚ {}", reference),
                    Style::default().fg(C_SCRIPTURE).add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::default());
            }
            if display.lines.is_empty() {
                lines.push(Line::from(Span::styled("(no text on this slide)", style_muted())));
            } else {
                lines.extend(
                    display
                        .lines
                        .iter()
                        .map(|l| Line::from(Span::styled(l.clone(), style_default()))),
                );
            }
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                format!("slide {}", display.slide_index + 1),
                style_muted(),
            )));
        }
        None => lines.push(Line::from(Span::styled("nothing on screen", style_muted()))),
    }

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(style_border(false))
            .title(Span::styled(title, style_secondary())),
    );
    frame.render_widget(paragraph, area);
}

fn status_line(view: &SessionView) -> Line<'static> {
    let gate = if view.audio_gated() {
        Span::styled(" GATED ", Style::default().fg(C_STARTING).add_modifier(Modifier::BOLD))
    } else {
        Span::styled(" OPEN ", Style::default().fg(C_LIVE).add_modifier(Modifier::BOLD))
    };
    let on_off = |b: bool| if b { "on" } else { "off" };
    let mut spans = vec![
        Span::styled(" audio", style_muted()),
        gate,
        Span::styled(
            format!(
                " master {}  mode {}  font {}",
                on_off(view.settings.smart_listen),
                if view.gate_mode { "gated" } else { "continuous" },
                view.settings.projector_font
            ),
            style_secondary(),
        ),
    ];
    match view.navigation {
        NavigationHint::Pending { .. } => spans.push(Span::styled("  moving…", style_muted())),
        NavigationHint::Unconfirmed { .. } => {
            spans.push(Span::styled("  move not confirmed", Style::default().fg(C_ERROR)))
        }
        NavigationHint::Settled => {}
    }
    if let Some(notice) = view.persistent_error.as_ref().or(view.notice.as_ref()) {
        spans.push(Span::styled(format!("  │ {}", notice.message), style_muted()));
    }
    Line::from(spans)
}

fn action_for_key(key: &KeyEvent, view: &SessionView) -> Option<KeyAction> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(KeyAction::Quit);
    }
    let action = match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Some(KeyAction::Quit),
        KeyCode::Char('s') => OperatorAction::StartSession,
        KeyCode::Char('x') => OperatorAction::StopSession,
        KeyCode::Char('r') => OperatorAction::Retry,
        KeyCode::Left => OperatorAction::Navigate(NavigateTarget::Prev),
        KeyCode::Right => OperatorAction::Navigate(NavigateTarget::Next),
        KeyCode::Char(c @ '1'..='9') => {
            let index = c.to_digit(10)? as usize - 1;
            OperatorAction::Navigate(NavigateTarget::Goto { index })
        }
        KeyCode::Char('g') => OperatorAction::SetGateMaster(!view.settings.smart_listen),
        KeyCode::Char('m') => OperatorAction::SetGateMode(!view.gate_mode),
        KeyCode::Char('w') => OperatorAction::WakeCapture,
        KeyCode::Char('f') => OperatorAction::SetProjectorFont(next_font(&view.settings.projector_font)),
        _ => return None,
    };
    Some(KeyAction::Core(action))
}

fn next_font(current: &str) -> String {
    let next = FONTS
        .iter()
        .position(|f| *f == current)
        .map(|i| (i + 1) % FONTS.len())
        .unwrap_or(0);
    FONTS[next].to_string()
}
